//! Daily budget under racing scanners.

use chrono::{FixedOffset, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;

use edgegate::engine::budget::{BudgetLimits, DailyBudgetTracker, ExecutionBlock};
use edgegate::types::{Side, TradeLeg};

use crate::mock_exchange::manual_clock;

fn make_leg(ticker: &str, contracts: u32, price_cents: u32) -> TradeLeg {
    TradeLeg {
        ticker: ticker.into(),
        side: Side::No,
        contracts,
        price_cents,
        description: String::new(),
        metadata: BTreeMap::new(),
    }
}

fn limits(daily_budget: Decimal) -> BudgetLimits {
    BudgetLimits {
        daily_budget,
        max_trade_cap: dec!(20),
        max_trades_per_day: 100,
        max_daily_loss: dec!(50),
    }
}

fn make_tracker() -> Arc<DailyBudgetTracker> {
    let (clock, _) = manual_clock(Utc.with_ymd_and_hms(2026, 2, 13, 17, 0, 0).unwrap());
    let eastern = FixedOffset::west_opt(5 * 3600).unwrap();
    Arc::new(DailyBudgetTracker::new(eastern, clock))
}

#[tokio::test]
async fn test_two_scanners_race_for_one_ceiling() {
    let tracker = make_tracker();
    let limits = limits(dec!(20));

    // Two $15 legs (20 × 75¢) on different tickers against $20.
    let a = {
        let tracker = tracker.clone();
        let limits = limits.clone();
        tokio::spawn(async move { tracker.try_reserve(&make_leg("A", 20, 75), &limits) })
    };
    let b = {
        let tracker = tracker.clone();
        let limits = limits.clone();
        tokio::spawn(async move { tracker.try_reserve(&make_leg("B", 20, 75), &limits) })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    let full: Vec<_> = results.iter().flatten().filter(|r| r.contracts == 20).collect();
    assert_eq!(full.len(), 1);
    let other = results.iter().find(|r| !matches!(r, Ok(res) if res.contracts == 20)).unwrap();
    match other {
        Ok(shrunk) => {
            assert_eq!(shrunk.contracts, 6);
            assert_eq!(shrunk.shrunk_from, Some(20));
        }
        Err(block) => assert!(matches!(block, ExecutionBlock::BudgetExhausted { .. })),
    }

    for reservation in results.iter().flatten() {
        tracker.commit_fill(reservation, reservation.amount);
    }
    let state = tracker.snapshot();
    assert!(state.deployed_total <= dec!(20));
    assert!(tracker.remaining(dec!(20)) >= Decimal::ZERO);
}

#[tokio::test]
async fn test_many_scanners_never_exceed_ceiling() {
    let tracker = make_tracker();
    let limits = limits(dec!(200));

    let mut handles = Vec::new();
    for i in 0..60u32 {
        let tracker = tracker.clone();
        let limits = limits.clone();
        handles.push(tokio::spawn(async move {
            let leg = make_leg(&format!("T{i}"), 5 + i % 20, 40 + i % 50);
            let reservation = tracker.try_reserve(&leg, &limits).ok()?;
            tokio::task::yield_now().await;
            // Every third order fails and gives its hold back.
            if i % 3 == 0 {
                tracker.release(&reservation);
                None
            } else {
                tracker.commit_fill(&reservation, reservation.amount);
                Some(reservation.amount)
            }
        }));
    }

    let mut spent = Decimal::ZERO;
    for handle in handles {
        if let Some(amount) = handle.await.unwrap() {
            spent += amount;
        }
    }

    let state = tracker.snapshot();
    assert_eq!(state.deployed_total, spent);
    assert!(state.deployed_total <= dec!(200));
    assert_eq!(state.reserved_total, Decimal::ZERO);
    assert!(state.in_flight_tickers.is_empty());
}

#[tokio::test]
async fn test_duplicate_ticker_is_blocked_while_held_and_after_fill() {
    let tracker = make_tracker();
    let limits = limits(dec!(200));

    let first = tracker.try_reserve(&make_leg("A", 5, 80), &limits).unwrap();
    assert_eq!(
        tracker.try_reserve(&make_leg("A", 5, 80), &limits),
        Err(ExecutionBlock::DuplicateTicker("A".into()))
    );

    tracker.commit_fill(&first, first.amount);
    assert!(tracker.already_executed("A"));
    assert_eq!(
        tracker.try_reserve(&make_leg("A", 1, 80), &limits),
        Err(ExecutionBlock::DuplicateTicker("A".into()))
    );
}

#[tokio::test]
async fn test_released_hold_frees_ticker_and_budget() {
    let tracker = make_tracker();
    let limits = limits(dec!(20));

    let held = tracker.try_reserve(&make_leg("A", 20, 75), &limits).unwrap();
    assert_eq!(tracker.remaining(dec!(20)), dec!(5));
    tracker.release(&held);
    assert_eq!(tracker.remaining(dec!(20)), dec!(20));
    assert!(tracker.try_reserve(&make_leg("A", 20, 75), &limits).is_ok());
}
