//! Edge scoring and position sizing across the whole price range.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};

use edgegate::engine::budget::DailyState;
use edgegate::strategy::kelly::{
    GATE_BALANCE_FLOOR, GATE_DAILY_BUDGET, GATE_KELLY, GATE_MAX_POSITIONS, GATE_MAX_TRADE,
    GATE_MIN_CONTRACTS, GATE_MIN_EDGE,
};
use edgegate::strategy::{
    EdgeCalculator, EdgeConfig, EdgeContext, EventType, PositionSizer, SizingBlock, SizingConfig,
    SizingResult, WeatherMarketType,
};
use edgegate::types::{Prediction, Side, SignalSide};

fn contexts() -> Vec<EdgeContext> {
    vec![
        EdgeContext::Bracket { event_type: EventType::Hourly, distance_from_underlying: Some(120.0) },
        EdgeContext::Bracket { event_type: EventType::Daily, distance_from_underlying: None },
        EdgeContext::Weather {
            city: "CHI".into(),
            month: 2,
            market_type: WeatherMarketType::HighBracket,
            forecast_probability: None,
        },
        EdgeContext::Weather {
            city: "NOWHERE".into(),
            month: 7,
            market_type: WeatherMarketType::LowThreshold,
            forecast_probability: Some(0.10),
        },
    ]
}

fn make_prediction(market_price: f64, probability: f64, edge: f64) -> Prediction {
    Prediction {
        ticker: "KXINX-26FEB13H1600-B7062".into(),
        strategy: "spx_bracket".into(),
        side: Side::No,
        market_price,
        calibrated_probability: probability,
        edge,
        confidence_score: 0.8,
        kelly_fraction: 0.0,
        recommended_contracts: 0,
        recommended_cost: Decimal::ZERO,
    }
}

fn today() -> DailyState {
    DailyState::new(NaiveDate::from_ymd_opt(2026, 2, 13).unwrap())
}

#[test]
fn test_price_sweep_is_total_and_bounded() {
    let calculator = EdgeCalculator::new(EdgeConfig::default());
    for ctx in contexts() {
        for price in 0..=100u32 {
            let signal = calculator.signal(price, &ctx);
            assert!((0.0..=1.0).contains(&signal.win_rate), "{price}¢ {ctx:?}: {signal:?}");
            assert!((0.0..=1.0).contains(&signal.confidence), "{price}¢ {ctx:?}: {signal:?}");
            assert!(signal.edge.is_finite() && signal.edge.abs() <= 1.0);
            assert!(signal.kelly_pct.is_finite() && signal.kelly_pct >= 0.0);
            assert!(!signal.reason.is_empty());
            if signal.side == SignalSide::Skip {
                assert!(!signal.grade.is_actionable());
            }
        }
        assert_eq!(calculator.signal(0, &ctx).side, SignalSide::Skip);
        assert_eq!(calculator.signal(100, &ctx).side, SignalSide::Skip);
    }
}

#[test]
fn test_signal_is_pure() {
    let calculator = EdgeCalculator::new(EdgeConfig::default());
    for ctx in contexts() {
        for price in 0..=100u32 {
            assert_eq!(calculator.signal(price, &ctx), calculator.signal(price, &ctx));
        }
    }
}

#[test]
fn test_kelly_fraction_never_exceeds_caps() {
    let sizer = PositionSizer::new(SizingConfig::default());
    let daily = today();
    let balances = [dec!(80), dec!(500), dec!(1500), dec!(10000)];

    for balance in balances {
        for price in (5..=95).step_by(5) {
            let mp = f64::from(price) / 100.0;
            let breakeven = 1.0 - mp;
            for bump in [0.05, 0.10, 0.20, 0.40] {
                let p = (breakeven + bump).min(1.0);
                let result = sizer.size(&make_prediction(mp, p, p - breakeven), balance, &daily, 0).unwrap();
                if let SizingResult::Sized(size) = result {
                    assert!(size.kelly_fraction > 0.0 && size.kelly_fraction <= 0.10);
                    assert!(size.cost <= dec!(20), "{balance} {price}¢: {size:?}");
                    assert!(size.contracts >= 1);
                    assert_eq!(size.cost, Decimal::from(size.contracts) * size.cost_per_contract);
                }
            }
        }
    }
}

#[test]
fn test_undefined_odds_are_rejected() {
    let sizer = PositionSizer::new(SizingConfig::default());
    for mp in [0.0, 1.0, -0.2, 1.5] {
        assert_err!(sizer.size(&make_prediction(mp, 0.9, 0.2), dec!(500), &today(), 0));
    }
    assert_err!(sizer.size(&make_prediction(0.25, 1.2, 0.2), dec!(500), &today(), 0));
    assert_ok!(sizer.size(&make_prediction(0.25, 0.87, 0.12), dec!(500), &today(), 0));
}

#[test]
fn test_gates_short_circuit_in_order() {
    let sizer = PositionSizer::new(SizingConfig::default());
    let mut spent = today();
    spent.deployed_total = dec!(200);

    // Everything fails: the floor is reported.
    let weak = make_prediction(0.25, 0.76, 0.01);
    match sizer.size(&weak, dec!(50), &spent, 50).unwrap() {
        SizingResult::Blocked(block) => assert_eq!(block.gate(), GATE_BALANCE_FLOOR),
        other => panic!("unexpected {other:?}"),
    }
    // Floor clears: budget is next.
    match sizer.size(&weak, dec!(500), &spent, 50).unwrap() {
        SizingResult::Blocked(block) => assert_eq!(block.gate(), GATE_DAILY_BUDGET),
        other => panic!("unexpected {other:?}"),
    }
    // Budget clears: open positions.
    match sizer.size(&weak, dec!(500), &today(), 50).unwrap() {
        SizingResult::Blocked(block) => assert_eq!(block.gate(), GATE_MAX_POSITIONS),
        other => panic!("unexpected {other:?}"),
    }
    // Positions clear: minimum edge.
    match sizer.size(&weak, dec!(500), &today(), 0).unwrap() {
        SizingResult::Blocked(SizingBlock::EdgeBelowMinimum { edge, min }) => {
            assert_eq!(edge, 0.01);
            assert_eq!(min, 0.05);
        }
        other => panic!("unexpected {other:?}"),
    }
    // Edge is claimed but the probability says otherwise: Kelly.
    let contradictory = make_prediction(0.25, 0.60, 0.10);
    match sizer.size(&contradictory, dec!(500), &today(), 0).unwrap() {
        SizingResult::Blocked(block) => assert_eq!(block.gate(), GATE_KELLY),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_end_to_end_sizing() {
    // $500 balance, YES at 25¢: NO costs 75¢ with +12% edge.
    let sizer = PositionSizer::new(SizingConfig::default());
    let prediction = make_prediction(0.25, 0.87, 0.12);
    match sizer.size(&prediction, dec!(500), &today(), 0).unwrap() {
        SizingResult::Sized(size) => {
            assert_eq!(size.kelly_fraction, 0.10);
            assert_eq!(size.cost_per_contract, dec!(0.75));
            assert_eq!(size.contracts, 26);
            assert_eq!(size.cost, dec!(19.50));
            assert_eq!(
                size.passed_gates,
                vec![
                    GATE_BALANCE_FLOOR,
                    GATE_DAILY_BUDGET,
                    GATE_MAX_POSITIONS,
                    GATE_MIN_EDGE,
                    GATE_KELLY,
                    GATE_MAX_TRADE,
                    GATE_MIN_CONTRACTS,
                ]
            );
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_remaining_budget_caps_size() {
    let sizer = PositionSizer::new(SizingConfig::default());
    let mut daily = today();
    daily.deployed_total = dec!(190);
    match sizer.size(&make_prediction(0.25, 0.87, 0.12), dec!(500), &daily, 0).unwrap() {
        SizingResult::Sized(size) => {
            assert_eq!(size.contracts, 13);
            assert_eq!(size.cost, dec!(9.75));
        }
        other => panic!("unexpected {other:?}"),
    }
}
