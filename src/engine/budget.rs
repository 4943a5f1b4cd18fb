//! Day-scoped risk budget.
//!
//! One [`DailyState`] per trading day, keyed by the date at a fixed
//! reference offset. Every operation rolls the day over first, under the
//! same lock as the mutation, so no caller ever sees yesterday's totals.
//!
//! The execution path uses the reservation API: [`DailyBudgetTracker::try_reserve`]
//! makes the duplicate, count, loss and budget decisions and places a hold
//! in a single critical section. The hold is later committed, kept (for a
//! resting order) or released.

use chrono::{FixedOffset, NaiveDate};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::types::{cents_to_dollars, Clock, TradeLeg};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Spend and activity for exactly one trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyState {
    pub date: NaiveDate,
    /// Cost of filled orders.
    pub deployed_total: Decimal,
    /// Holds for orders in flight or resting.
    pub reserved_total: Decimal,
    pub trade_count: u32,
    pub realized_loss_total: Decimal,
    pub executed_tickers: BTreeSet<String>,
    pub in_flight_tickers: BTreeSet<String>,
    /// Bumped on every mutation; guards snapshot writes.
    pub version: u64,
}

impl DailyState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            deployed_total: Decimal::ZERO,
            reserved_total: Decimal::ZERO,
            trade_count: 0,
            realized_loss_total: Decimal::ZERO,
            executed_tickers: BTreeSet::new(),
            in_flight_tickers: BTreeSet::new(),
            version: 0,
        }
    }

    /// Deployed plus reserved.
    pub fn committed(&self) -> Decimal {
        self.deployed_total + self.reserved_total
    }

    /// Room left under `ceiling`, never negative.
    pub fn remaining(&self, ceiling: Decimal) -> Decimal {
        (ceiling - self.committed()).max(Decimal::ZERO)
    }

    /// Whether a ticker has been filled or is currently held today.
    pub fn is_claimed(&self, ticker: &str) -> bool {
        self.executed_tickers.contains(ticker) || self.in_flight_tickers.contains(ticker)
    }

    fn touch(&mut self) {
        self.version += 1;
    }
}

/// Per-day limits enforced at reservation time.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetLimits {
    pub daily_budget: Decimal,
    /// Largest cost a single leg may carry.
    pub max_trade_cap: Decimal,
    pub max_trades_per_day: u32,
    pub max_daily_loss: Decimal,
}

// ---------------------------------------------------------------------------
// Reservations
// ---------------------------------------------------------------------------

/// A budget hold for one leg. Stamped with the day it was taken on.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub ticker: String,
    pub date: NaiveDate,
    pub contracts: u32,
    pub price_cents: u32,
    pub amount: Decimal,
    /// Original contract count when the leg was shrunk to fit.
    pub shrunk_from: Option<u32>,
}

/// Why a leg was refused before reaching the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionBlock {
    Invalid(String),
    BalanceFloor { balance: Decimal, cost: Decimal, floor: Decimal },
    DuplicateTicker(String),
    TradeLimit { count: u32, max: u32 },
    DailyLossLimit { loss: Decimal, max: Decimal },
    BudgetExhausted { remaining: Decimal, contract_cost: Decimal },
    TradeCap { cap: Decimal, contract_cost: Decimal },
}

impl fmt::Display for ExecutionBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionBlock::Invalid(reason) => write!(f, "Invalid leg: {reason}"),
            ExecutionBlock::BalanceFloor { balance, cost, floor } => write!(
                f,
                "Balance ${balance:.2} minus cost ${cost:.2} would breach floor ${floor:.2}"
            ),
            ExecutionBlock::DuplicateTicker(ticker) => {
                write!(f, "Already traded {ticker} today")
            }
            ExecutionBlock::TradeLimit { count, max } => {
                write!(f, "Daily trade limit reached ({count}/{max})")
            }
            ExecutionBlock::DailyLossLimit { loss, max } => {
                write!(f, "Daily loss limit reached (${loss:.2}/${max:.2})")
            }
            ExecutionBlock::BudgetExhausted { remaining, contract_cost } => write!(
                f,
                "Daily budget exhausted (${remaining:.2} left, ${contract_cost:.2} per contract)"
            ),
            ExecutionBlock::TradeCap { cap, contract_cost } => write!(
                f,
                "One contract at ${contract_cost:.2} exceeds the ${cap:.2} per-trade cap"
            ),
        }
    }
}

/// Whole contracts at `contract_cost` that fit in `amount`.
fn whole_contracts(amount: Decimal, contract_cost: Decimal) -> u32 {
    if contract_cost <= Decimal::ZERO {
        return 0;
    }
    (amount / contract_cost).floor().to_u32().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

pub struct DailyBudgetTracker {
    offset: FixedOffset,
    clock: Clock,
    state: Mutex<DailyState>,
}

impl DailyBudgetTracker {
    pub fn new(offset: FixedOffset, clock: Clock) -> Self {
        let today = (clock)().with_timezone(&offset).date_naive();
        Self {
            offset,
            clock,
            state: Mutex::new(DailyState::new(today)),
        }
    }

    /// Resume from a persisted snapshot. A snapshot from another day is discarded.
    pub fn restore(snapshot: DailyState, offset: FixedOffset, clock: Clock) -> Self {
        let tracker = Self::new(offset, clock);
        let today = tracker.today();
        if snapshot.date == today {
            info!(
                date = %snapshot.date,
                deployed = format!("${:.2}", snapshot.deployed_total),
                trades = snapshot.trade_count,
                "Restored daily budget state"
            );
            *tracker.lock() = snapshot;
        } else {
            info!(saved = %snapshot.date, today = %today, "Discarding stale daily budget state");
        }
        tracker
    }

    /// Current trading day at the reference offset.
    pub fn today(&self) -> NaiveDate {
        (self.clock)().with_timezone(&self.offset).date_naive()
    }

    fn lock(&self) -> MutexGuard<'_, DailyState> {
        // A panic mid-update cannot leave partial totals: every mutation is a
        // handful of field writes with no early return.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` on today's state, rolling over first if the day changed.
    fn with_state<R>(&self, f: impl FnOnce(&mut DailyState) -> R) -> R {
        let today = self.today();
        let mut state = self.lock();
        if state.date != today {
            info!(
                from = %state.date,
                to = %today,
                deployed = format!("${:.2}", state.deployed_total),
                trades = state.trade_count,
                "Daily budget rollover"
            );
            let version = state.version + 1;
            *state = DailyState::new(today);
            state.version = version;
        }
        f(&mut state)
    }

    pub fn remaining(&self, ceiling: Decimal) -> Decimal {
        self.with_state(|s| s.remaining(ceiling))
    }

    pub fn record_deploy(&self, cost: Decimal) {
        self.with_state(|s| {
            s.deployed_total += cost;
            s.touch();
        });
    }

    /// Add a realized loss. Non-positive amounts are ignored.
    pub fn record_loss(&self, amount: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        self.with_state(|s| {
            s.realized_loss_total += amount;
            s.touch();
        });
    }

    pub fn mark_executed(&self, ticker: &str) {
        self.with_state(|s| {
            if s.executed_tickers.insert(ticker.to_string()) {
                s.touch();
            }
        });
    }

    pub fn already_executed(&self, ticker: &str) -> bool {
        self.with_state(|s| s.executed_tickers.contains(ticker))
    }

    /// Merge tickers known to have filled today, e.g. from the trade journal.
    pub fn merge_executed<I: IntoIterator<Item = String>>(&self, tickers: I) {
        self.with_state(|s| {
            let before = s.executed_tickers.len();
            s.executed_tickers.extend(tickers);
            if s.executed_tickers.len() != before {
                s.touch();
            }
        });
    }

    /// Raise today's spend and fill count to journaled totals. Never lowers them.
    pub fn merge_fill_totals(&self, deployed: Decimal, trade_count: u32) {
        self.with_state(|s| {
            if deployed <= s.deployed_total && trade_count <= s.trade_count {
                return;
            }
            warn!(
                snapshot_deployed = format!("${:.2}", s.deployed_total),
                journal_deployed = format!("${:.2}", deployed),
                snapshot_trades = s.trade_count,
                journal_trades = trade_count,
                "Daily state behind journal, catching up"
            );
            s.deployed_total = s.deployed_total.max(deployed);
            s.trade_count = s.trade_count.max(trade_count);
            s.touch();
        });
    }

    pub fn snapshot(&self) -> DailyState {
        self.with_state(|s| s.clone())
    }

    // -- Reservation API --

    /// Decide and hold budget for one leg, shrinking it to the room left.
    pub fn try_reserve(
        &self,
        leg: &TradeLeg,
        limits: &BudgetLimits,
    ) -> Result<Reservation, ExecutionBlock> {
        self.with_state(|s| {
            if s.is_claimed(&leg.ticker) {
                return Err(ExecutionBlock::DuplicateTicker(leg.ticker.clone()));
            }
            let active = s.trade_count + s.in_flight_tickers.len() as u32;
            if active >= limits.max_trades_per_day {
                return Err(ExecutionBlock::TradeLimit {
                    count: active,
                    max: limits.max_trades_per_day,
                });
            }
            if s.realized_loss_total >= limits.max_daily_loss {
                return Err(ExecutionBlock::DailyLossLimit {
                    loss: s.realized_loss_total,
                    max: limits.max_daily_loss,
                });
            }

            let remaining = s.remaining(limits.daily_budget);
            let contract_cost = cents_to_dollars(leg.price_cents);
            let affordable = whole_contracts(remaining, contract_cost);
            if leg.contracts.min(affordable) == 0 {
                return Err(ExecutionBlock::BudgetExhausted { remaining, contract_cost });
            }
            let capped = whole_contracts(limits.max_trade_cap, contract_cost);
            if capped == 0 {
                return Err(ExecutionBlock::TradeCap { cap: limits.max_trade_cap, contract_cost });
            }
            let contracts = leg.contracts.min(affordable).min(capped);

            let amount = Decimal::from(contracts) * contract_cost;
            s.reserved_total += amount;
            s.in_flight_tickers.insert(leg.ticker.clone());
            s.touch();

            let shrunk_from = (contracts < leg.contracts).then_some(leg.contracts);
            if let Some(requested) = shrunk_from {
                info!(
                    ticker = %leg.ticker,
                    requested,
                    reserved = contracts,
                    remaining = format!("${:.2}", remaining),
                    cap = format!("${:.2}", limits.max_trade_cap),
                    "Leg shrunk to fit budget and per-trade cap"
                );
            }
            debug!(
                ticker = %leg.ticker,
                amount = format!("${:.2}", amount),
                reserved_total = format!("${:.2}", s.reserved_total),
                "Budget reserved"
            );

            Ok(Reservation {
                ticker: leg.ticker.clone(),
                date: s.date,
                contracts,
                price_cents: leg.price_cents,
                amount,
                shrunk_from,
            })
        })
    }

    /// Convert a hold into deployed spend. The fill counts against the
    /// current day even if the hold was taken before a rollover.
    pub fn commit_fill(&self, reservation: &Reservation, actual_cost: Decimal) {
        self.with_state(|s| {
            if s.date == reservation.date {
                s.reserved_total = (s.reserved_total - reservation.amount).max(Decimal::ZERO);
                s.in_flight_tickers.remove(&reservation.ticker);
            } else {
                warn!(
                    ticker = %reservation.ticker,
                    reserved_on = %reservation.date,
                    "Fill for a reservation from a previous day"
                );
            }
            s.deployed_total += actual_cost;
            s.trade_count += 1;
            s.executed_tickers.insert(reservation.ticker.clone());
            s.touch();
        });
    }

    /// Keep the hold for a resting order. The ticker stays claimed.
    pub fn hold_resting(&self, reservation: &Reservation) {
        debug!(
            ticker = %reservation.ticker,
            amount = format!("${:.2}", reservation.amount),
            "Holding budget for resting order"
        );
    }

    /// Drop a hold without spending it.
    pub fn release(&self, reservation: &Reservation) {
        self.with_state(|s| {
            if s.date != reservation.date {
                debug!(ticker = %reservation.ticker, "Stale reservation, nothing to release");
                return;
            }
            s.reserved_total = (s.reserved_total - reservation.amount).max(Decimal::ZERO);
            s.in_flight_tickers.remove(&reservation.ticker);
            s.touch();
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Side;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Clock that only moves when told to.
    pub(crate) fn manual_clock(start: DateTime<Utc>) -> (Clock, Arc<Mutex<DateTime<Utc>>>) {
        let now = Arc::new(Mutex::new(start));
        let handle = now.clone();
        let clock: Clock = Arc::new(move || *handle.lock().unwrap());
        (clock, now)
    }

    pub(crate) fn eastern() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).unwrap()
    }

    fn noon() -> DateTime<Utc> {
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

    fn limits() -> BudgetLimits {
        BudgetLimits {
            daily_budget: dec!(200),
            max_trade_cap: dec!(20),
            max_trades_per_day: 15,
            max_daily_loss: dec!(50),
        }
    }

    #[test]
    fn test_record_and_remaining() {
        let (clock, _) = manual_clock(noon());
        let tracker = DailyBudgetTracker::new(eastern(), clock);
        tracker.record_deploy(dec!(40));
        tracker.record_deploy(dec!(15.50));
        assert_eq!(tracker.remaining(dec!(200)), dec!(144.50));
        assert_eq!(tracker.remaining(dec!(50)), Decimal::ZERO);
        tracker.mark_executed("A");
        assert!(tracker.already_executed("A"));
        assert!(!tracker.already_executed("B"));
    }

    #[test]
    fn test_rollover_at_reference_offset() {
        // 04:59 UTC is still the previous day at UTC-5.
        let (clock, now) = manual_clock(Utc.with_ymd_and_hms(2026, 2, 14, 4, 59, 0).unwrap());
        let tracker = DailyBudgetTracker::new(eastern(), clock);
        tracker.record_deploy(dec!(100));
        tracker.mark_executed("A");
        assert_eq!(tracker.snapshot().date, NaiveDate::from_ymd_opt(2026, 2, 13).unwrap());

        *now.lock().unwrap() = Utc.with_ymd_and_hms(2026, 2, 14, 5, 0, 0).unwrap();
        let snap = tracker.snapshot();
        assert_eq!(snap.date, NaiveDate::from_ymd_opt(2026, 2, 14).unwrap());
        assert_eq!(snap.deployed_total, Decimal::ZERO);
        assert!(snap.executed_tickers.is_empty());
        assert!(!tracker.already_executed("A"));
    }

    #[test]
    fn test_version_increases_across_rollover() {
        let (clock, now) = manual_clock(noon());
        let tracker = DailyBudgetTracker::new(eastern(), clock);
        tracker.record_deploy(dec!(1));
        let v1 = tracker.snapshot().version;
        *now.lock().unwrap() = noon() + chrono::Duration::days(1);
        assert!(tracker.snapshot().version > v1);
    }

    #[test]
    fn test_restore_only_same_day() {
        let (clock, _) = manual_clock(noon());
        let mut saved = DailyState::new(NaiveDate::from_ymd_opt(2026, 2, 13).unwrap());
        saved.deployed_total = dec!(80);
        let tracker = DailyBudgetTracker::restore(saved.clone(), eastern(), clock.clone());
        assert_eq!(tracker.snapshot().deployed_total, dec!(80));

        saved.date = NaiveDate::from_ymd_opt(2026, 2, 12).unwrap();
        let tracker = DailyBudgetTracker::restore(saved, eastern(), clock);
        assert_eq!(tracker.snapshot().deployed_total, Decimal::ZERO);
    }

    #[test]
    fn test_merge_fill_totals_only_raises() {
        let (clock, _) = manual_clock(noon());
        let tracker = DailyBudgetTracker::new(eastern(), clock);
        tracker.record_deploy(dec!(30));

        tracker.merge_fill_totals(dec!(19.50), 1);
        let snap = tracker.snapshot();
        assert_eq!(snap.deployed_total, dec!(30));
        assert_eq!(snap.trade_count, 1);

        tracker.merge_fill_totals(dec!(45), 3);
        assert_eq!(tracker.remaining(dec!(200)), dec!(155));
        assert_eq!(tracker.snapshot().trade_count, 3);
    }

    #[test]
    fn test_record_loss_ignores_non_positive() {
        let (clock, _) = manual_clock(noon());
        let tracker = DailyBudgetTracker::new(eastern(), clock);
        tracker.record_loss(dec!(-5));
        tracker.record_loss(dec!(12));
        assert_eq!(tracker.snapshot().realized_loss_total, dec!(12));
    }

    #[test]
    fn test_reserve_commit_release() {
        let (clock, _) = manual_clock(noon());
        let tracker = DailyBudgetTracker::new(eastern(), clock);

        let r = tracker.try_reserve(&make_leg("A", 20, 75), &limits()).unwrap();
        assert_eq!(r.amount, dec!(15));
        assert_eq!(tracker.snapshot().reserved_total, dec!(15));
        assert_eq!(tracker.remaining(dec!(200)), dec!(185));

        tracker.commit_fill(&r, dec!(11.25));
        let snap = tracker.snapshot();
        assert_eq!(snap.reserved_total, Decimal::ZERO);
        assert_eq!(snap.deployed_total, dec!(11.25));
        assert_eq!(snap.trade_count, 1);
        assert!(snap.executed_tickers.contains("A"));

        let r = tracker.try_reserve(&make_leg("B", 10, 50), &limits()).unwrap();
        tracker.release(&r);
        let snap = tracker.snapshot();
        assert_eq!(snap.reserved_total, Decimal::ZERO);
        assert!(!snap.in_flight_tickers.contains("B"));
        assert_eq!(snap.trade_count, 1);
    }

    #[test]
    fn test_duplicate_ticker_blocked_while_in_flight_and_after_fill() {
        let (clock, _) = manual_clock(noon());
        let tracker = DailyBudgetTracker::new(eastern(), clock);
        let r = tracker.try_reserve(&make_leg("A", 1, 50), &limits()).unwrap();
        assert_eq!(
            tracker.try_reserve(&make_leg("A", 1, 50), &limits()),
            Err(ExecutionBlock::DuplicateTicker("A".into()))
        );
        tracker.commit_fill(&r, dec!(0.50));
        assert!(matches!(
            tracker.try_reserve(&make_leg("A", 1, 50), &limits()),
            Err(ExecutionBlock::DuplicateTicker(_))
        ));
    }

    #[test]
    fn test_reserve_shrinks_then_blocks() {
        let (clock, _) = manual_clock(noon());
        let tracker = DailyBudgetTracker::new(eastern(), clock);
        tracker.record_deploy(dec!(195));
        let r = tracker.try_reserve(&make_leg("A", 26, 75), &limits()).unwrap();
        assert_eq!(r.contracts, 6);
        assert_eq!(r.shrunk_from, Some(26));
        assert_eq!(
            tracker.try_reserve(&make_leg("B", 1, 75), &limits()),
            Err(ExecutionBlock::BudgetExhausted {
                remaining: dec!(0.50),
                contract_cost: dec!(0.75),
            })
        );
    }

    #[test]
    fn test_reserve_enforces_per_trade_cap() {
        let (clock, _) = manual_clock(noon());
        let tracker = DailyBudgetTracker::new(eastern(), clock);

        // 100 × 75¢ is $75 against a $20 cap: 26 contracts, $19.50.
        let r = tracker.try_reserve(&make_leg("A", 100, 75), &limits()).unwrap();
        assert_eq!(r.contracts, 26);
        assert_eq!(r.amount, dec!(19.50));
        assert_eq!(r.shrunk_from, Some(100));

        let tiny_cap = BudgetLimits { max_trade_cap: dec!(0.50), ..limits() };
        assert_eq!(
            tracker.try_reserve(&make_leg("B", 5, 75), &tiny_cap),
            Err(ExecutionBlock::TradeCap {
                cap: dec!(0.50),
                contract_cost: dec!(0.75),
            })
        );
        assert_eq!(tracker.snapshot().reserved_total, dec!(19.50));
    }

    #[test]
    fn test_trade_and_loss_limits() {
        let (clock, _) = manual_clock(noon());
        let tracker = DailyBudgetTracker::new(eastern(), clock);
        let tight = BudgetLimits { max_trades_per_day: 1, ..limits() };
        let _held = tracker.try_reserve(&make_leg("A", 1, 10), &tight).unwrap();
        assert!(matches!(
            tracker.try_reserve(&make_leg("B", 1, 10), &tight),
            Err(ExecutionBlock::TradeLimit { count: 1, max: 1 })
        ));

        tracker.record_loss(dec!(50));
        assert!(matches!(
            tracker.try_reserve(&make_leg("C", 1, 10), &limits()),
            Err(ExecutionBlock::DailyLossLimit { .. })
        ));
    }

    #[test]
    fn test_stale_reservation_not_released_against_new_day() {
        let (clock, now) = manual_clock(noon());
        let tracker = DailyBudgetTracker::new(eastern(), clock);
        let stale = tracker.try_reserve(&make_leg("A", 10, 50), &limits()).unwrap();

        *now.lock().unwrap() = noon() + chrono::Duration::days(1);
        let fresh = tracker.try_reserve(&make_leg("B", 10, 50), &limits()).unwrap();
        tracker.release(&stale);
        assert_eq!(tracker.snapshot().reserved_total, fresh.amount);

        // A fill that lands after rollover still counts today.
        tracker.commit_fill(&stale, dec!(5));
        let snap = tracker.snapshot();
        assert_eq!(snap.deployed_total, dec!(5));
        assert_eq!(snap.reserved_total, fresh.amount);
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_ceiling() {
        let (clock, _) = manual_clock(noon());
        let tracker = Arc::new(DailyBudgetTracker::new(eastern(), clock));
        let ceiling = BudgetLimits { daily_budget: dec!(20), ..limits() };

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = tracker.clone();
                let ceiling = ceiling.clone();
                std::thread::spawn(move || {
                    tracker
                        .try_reserve(&make_leg(&format!("T{i}"), 20, 75), &ceiling)
                        .ok()
                })
            })
            .collect();
        let reserved: Decimal = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .map(|r| r.amount)
            .sum();

        assert!(reserved <= dec!(20));
        assert_eq!(tracker.snapshot().reserved_total, reserved);
    }
}
