//! Propose, approve and execute through the gate against the mock exchange.

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;

use edgegate::alerts::{apply_decision, Decision};
use edgegate::engine::accountant::Accountant;
use edgegate::engine::approvals::{ApprovalOutcome, TradeApprovalRegistry, TradeStatus};
use edgegate::engine::budget::{BudgetLimits, DailyBudgetTracker, ExecutionBlock};
use edgegate::engine::executor::{ExecutionConfig, ExecutionGate, LegOutcome, LegReport};
use edgegate::storage::journal::SqliteJournal;
use edgegate::storage::{restore_daily_budget, DailyStateStore};
use edgegate::types::{Clock, ExecutionStatus, Side, TradeLeg, TradeProposal};

use crate::mock_exchange::{manual_clock, FillMode, MockExchange};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 13, 17, 0, 0).unwrap()
}

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

fn make_proposal(legs: Vec<TradeLeg>) -> TradeProposal {
    TradeProposal {
        strategy: "spx_bracket".into(),
        summary: "integration".into(),
        legs,
    }
}

struct Harness {
    exchange: Arc<MockExchange>,
    budget: Arc<DailyBudgetTracker>,
    journal: Arc<SqliteJournal>,
    gate: Arc<ExecutionGate>,
    registry: Arc<TradeApprovalRegistry>,
    clock: Clock,
}

async fn make_harness(balance: Decimal, daily_budget: Decimal) -> (Harness, Arc<std::sync::Mutex<DateTime<Utc>>>) {
    let (clock, now) = manual_clock(start());
    let exchange = Arc::new(MockExchange::new(balance));
    let eastern = FixedOffset::west_opt(5 * 3600).unwrap();
    let budget = Arc::new(DailyBudgetTracker::new(eastern, clock.clone()));
    let journal = Arc::new(SqliteJournal::in_memory().await.unwrap());
    let gate = Arc::new(ExecutionGate::new(
        exchange.clone(),
        exchange.clone(),
        budget.clone(),
        journal.clone(),
        ExecutionConfig {
            limits: BudgetLimits {
                daily_budget,
                max_trade_cap: dec!(20),
                max_trades_per_day: 15,
                max_daily_loss: dec!(50),
            },
            balance_floor: dec!(75),
            order_timeout: std::time::Duration::from_millis(200),
            resting_recheck_delay: std::time::Duration::from_millis(1),
        },
    ));
    let registry = Arc::new(TradeApprovalRegistry::new(Duration::minutes(30), clock.clone()));
    (
        Harness { exchange, budget, journal, gate, registry, clock },
        now,
    )
}

fn executed(outcome: ApprovalOutcome) -> Vec<LegReport> {
    match outcome {
        ApprovalOutcome::Executed(reports) => reports,
        other => panic!("expected execution, got {other:?}"),
    }
}

#[tokio::test]
async fn test_end_to_end_approval_fills_and_journals() {
    let (h, _) = make_harness(dec!(500), dec!(200)).await;
    let request = h.registry.create(make_proposal(vec![make_leg("KXINX-B7062", 26, 75)])).unwrap();
    assert_eq!(request.total_cost(), dec!(19.50));

    let reports = executed(h.registry.approve(&request.id, &h.gate).await.unwrap());
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_filled());
    assert_eq!(reports[0].cost(), dec!(19.50));

    let state = h.budget.snapshot();
    assert_eq!(state.deployed_total, dec!(19.50));
    assert_eq!(state.trade_count, 1);
    assert!(state.executed_tickers.contains("KXINX-B7062"));
    assert_eq!(h.registry.get(&request.id).unwrap().status, TradeStatus::Executed);

    let entries = h.journal.entries_for_trade(request.id.as_str()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, "filled");
    assert_eq!(entries[0].cost, dec!(19.50));
}

#[tokio::test]
async fn test_approval_after_window_expires_without_sweep() {
    let (h, now) = make_harness(dec!(500), dec!(200)).await;
    let request = h.registry.create(make_proposal(vec![make_leg("A", 5, 80)])).unwrap();

    *now.lock().unwrap() = start() + Duration::minutes(30) + Duration::seconds(1);
    let outcome = h.registry.approve(&request.id, &h.gate).await.unwrap();
    assert_eq!(outcome, ApprovalOutcome::Expired);
    assert_eq!(h.registry.get(&request.id).unwrap().status, TradeStatus::Expired);
    assert!(h.exchange.orders().is_empty());
    assert_eq!(h.budget.snapshot().committed(), Decimal::ZERO);

    // The sweep has nothing left to do for it.
    assert!(h.registry.sweep_expired().is_empty());
}

#[tokio::test]
async fn test_concurrent_approvals_share_one_ceiling() {
    let (h, _) = make_harness(dec!(500), dec!(20)).await;
    let first = h.registry.create(make_proposal(vec![make_leg("A", 20, 75)])).unwrap();
    let second = h.registry.create(make_proposal(vec![make_leg("B", 20, 75)])).unwrap();

    let (a, b) = tokio::join!(
        h.registry.approve(&first.id, &h.gate),
        h.registry.approve(&second.id, &h.gate),
    );
    let mut reports = executed(a.unwrap());
    reports.extend(executed(b.unwrap()));

    let full = reports.iter().filter(|r| r.is_filled() && r.cost() == dec!(15)).count();
    assert_eq!(full, 1);
    let other = reports.iter().find(|r| r.cost() != dec!(15)).unwrap();
    match &other.outcome {
        LegOutcome::Placed(result) => {
            assert_eq!(result.status, ExecutionStatus::Filled);
            assert_eq!(result.fill_count, 6);
        }
        LegOutcome::Blocked(block) => {
            assert!(matches!(block, ExecutionBlock::BudgetExhausted { .. }))
        }
    }

    let state = h.budget.snapshot();
    assert!(state.deployed_total <= dec!(20));
    assert_eq!(state.reserved_total, Decimal::ZERO);
}

#[tokio::test]
async fn test_skip_via_channel_decision_places_nothing() {
    let (h, _) = make_harness(dec!(500), dec!(200)).await;
    let request = h.registry.create(make_proposal(vec![make_leg("A", 5, 80)])).unwrap();

    let (resolved, outcome) =
        apply_decision(&h.registry, &h.gate, &Decision::Skip(request.id.clone())).await.unwrap();
    assert_eq!(resolved.id, request.id);
    assert_eq!(outcome, ApprovalOutcome::Skipped);
    assert!(apply_decision(&h.registry, &h.gate, &Decision::Approve(request.id.clone()))
        .await
        .is_err());
    assert!(h.exchange.orders().is_empty());
}

#[tokio::test]
async fn test_timeout_is_error_and_not_retried() {
    let (h, _) = make_harness(dec!(500), dec!(200)).await;
    h.exchange.set_delay(std::time::Duration::from_secs(2));
    let request = h.registry.create(make_proposal(vec![make_leg("A", 5, 80)])).unwrap();

    // Balance reads are not delayed, only order placement.
    let reports = executed(h.registry.approve(&request.id, &h.gate).await.unwrap());
    match &reports[0].outcome {
        LegOutcome::Placed(result) => {
            assert_eq!(result.status, ExecutionStatus::Error);
            assert!(result.detail.as_deref().unwrap_or_default().contains("timed out"));
        }
        other => panic!("unexpected {other:?}"),
    }
    let state = h.budget.snapshot();
    assert_eq!(state.committed(), Decimal::ZERO);
    assert!(!state.is_claimed("A"));
    assert_eq!(h.registry.get(&request.id).unwrap().status, TradeStatus::Executed);
}

#[tokio::test]
async fn test_resting_order_keeps_hold_then_settles() {
    let (h, _) = make_harness(dec!(500), dec!(200)).await;
    h.exchange.set_mode(FillMode::Rest);
    let request = h.registry.create(make_proposal(vec![make_leg("REST", 10, 80)])).unwrap();
    let reports = executed(h.registry.approve(&request.id, &h.gate).await.unwrap());
    assert_eq!(reports[0].label(), "resting");

    let state = h.budget.snapshot();
    assert_eq!(state.reserved_total, dec!(8));
    assert!(state.is_claimed("REST"));

    // A filled position later settles as a loss and counts against the day.
    h.exchange.set_mode(FillMode::Fill);
    let filled = h.registry.create(make_proposal(vec![make_leg("LOSS", 10, 80)])).unwrap();
    executed(h.registry.approve(&filled.id, &h.gate).await.unwrap());
    h.exchange.settle("LOSS", Side::Yes);

    let accountant = Accountant::new(h.exchange.clone(), h.journal.clone(), h.budget.clone(), h.clock.clone());
    let summary = accountant.settle_open_positions().await.unwrap();
    assert_eq!(summary.settled, 1);
    assert_eq!(summary.realized_loss, dec!(8));
    assert_eq!(h.budget.snapshot().realized_loss_total, dec!(8));
}

#[tokio::test]
async fn test_oversized_leg_is_cut_to_trade_cap() {
    let (h, _) = make_harness(dec!(500), dec!(200)).await;
    // $75 requested against the $20 per-trade cap.
    let request = h.registry.create(make_proposal(vec![make_leg("BIG", 100, 75)])).unwrap();

    let reports = executed(h.registry.approve(&request.id, &h.gate).await.unwrap());
    assert!(reports[0].is_filled());
    assert_eq!(reports[0].cost(), dec!(19.50));
    assert_eq!(h.exchange.orders()[0].contracts, 26);
    assert_eq!(h.budget.snapshot().deployed_total, dec!(19.50));
}

#[tokio::test]
async fn test_restart_without_snapshot_keeps_todays_spend() {
    let (h, _) = make_harness(dec!(500), dec!(200)).await;
    let request = h.registry.create(make_proposal(vec![make_leg("KXINX-B7062", 26, 75)])).unwrap();
    executed(h.registry.approve(&request.id, &h.gate).await.unwrap());

    // The snapshot never made it to disk; only the journal survived.
    let missing = std::env::temp_dir().join(format!("edgegate_missing_{}.json", uuid::Uuid::new_v4()));
    let eastern = FixedOffset::west_opt(5 * 3600).unwrap();
    let restored = restore_daily_budget(&DailyStateStore::new(missing), &h.journal, eastern, h.clock.clone())
        .await
        .unwrap();

    assert_eq!(restored.remaining(dec!(200)), dec!(180.50));
    let state = restored.snapshot();
    assert_eq!(state.trade_count, 1);
    assert!(state.is_claimed("KXINX-B7062"));
}
