//! Execution gate.
//!
//! The last check before money moves. Each approved leg is re-validated
//! against live balance and the shared daily budget, placed once (never
//! retried), classified, committed into the budget tracker and journaled.
//! Every leg yields exactly one [`LegReport`], including legs that were
//! blocked before reaching the exchange.

use chrono::Utc;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::engine::budget::{BudgetLimits, DailyBudgetTracker, ExecutionBlock, Reservation};
use crate::platforms::{BalanceProvider, OrderAck, OrderPlacer, OrderRequest};
use crate::storage::{DailyStateStore, ExecutionJournal, JournalEntry};
use crate::types::{cents_to_dollars, EdgegateError, ExecutionResult, ExecutionStatus, Side, TradeLeg};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub limits: BudgetLimits,
    /// Cash that must remain after a leg's cost.
    pub balance_floor: Decimal,
    /// Bound on balance fetches and order placement.
    pub order_timeout: Duration,
    /// Wait before the single status re-check of a resting order.
    pub resting_recheck_delay: Duration,
}

// ---------------------------------------------------------------------------
// Leg reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum LegOutcome {
    Blocked(ExecutionBlock),
    Placed(ExecutionResult),
}

/// Outcome of one leg.
#[derive(Debug, Clone, PartialEq)]
pub struct LegReport {
    pub ticker: String,
    pub side: Side,
    pub requested_contracts: u32,
    pub outcome: LegOutcome,
}

impl LegReport {
    pub fn is_filled(&self) -> bool {
        matches!(&self.outcome, LegOutcome::Placed(r) if r.status == ExecutionStatus::Filled)
    }

    /// Cost actually deployed by this leg.
    pub fn cost(&self) -> Decimal {
        match &self.outcome {
            LegOutcome::Placed(r) => r.cost,
            LegOutcome::Blocked(_) => Decimal::ZERO,
        }
    }

    /// Short outcome label, as journaled.
    pub fn label(&self) -> String {
        match &self.outcome {
            LegOutcome::Blocked(_) => "blocked".to_string(),
            LegOutcome::Placed(r) => r.status.to_string(),
        }
    }
}

impl fmt::Display for LegReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} x{}: ", self.ticker, self.side, self.requested_contracts)?;
        match &self.outcome {
            LegOutcome::Blocked(block) => write!(f, "blocked ({block})"),
            LegOutcome::Placed(result) => write!(f, "{result}"),
        }
    }
}

/// Map a raw exchange acknowledgement onto a status.
pub fn classify(ack: &OrderAck) -> ExecutionStatus {
    let status = ack.status.to_lowercase();
    if status == "executed" || (ack.fill_count > 0 && ack.remaining_count == 0) {
        ExecutionStatus::Filled
    } else if status == "resting" || ack.remaining_count > 0 {
        ExecutionStatus::Resting
    } else if status == "canceled" || status == "cancelled" {
        ExecutionStatus::Canceled
    } else {
        ExecutionStatus::Error
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct ExecutionGate {
    placer: Arc<dyn OrderPlacer>,
    balance: Arc<dyn BalanceProvider>,
    budget: Arc<DailyBudgetTracker>,
    journal: Arc<dyn ExecutionJournal>,
    state_store: Option<Arc<DailyStateStore>>,
    config: ExecutionConfig,
}

impl ExecutionGate {
    pub fn new(
        placer: Arc<dyn OrderPlacer>,
        balance: Arc<dyn BalanceProvider>,
        budget: Arc<DailyBudgetTracker>,
        journal: Arc<dyn ExecutionJournal>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            placer,
            balance,
            budget,
            journal,
            state_store: None,
            config,
        }
    }

    /// Persist a [`DailyState`](crate::engine::budget::DailyState) snapshot after every leg.
    pub fn with_state_store(mut self, store: Arc<DailyStateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn budget(&self) -> &Arc<DailyBudgetTracker> {
        &self.budget
    }

    /// Run one leg through validation, reservation, placement and commit.
    pub async fn execute_leg(&self, trade_id: &str, strategy: &str, leg: &TradeLeg) -> LegReport {
        let (outcome, placed_contracts) = self.run_leg(leg).await;
        let report = LegReport {
            ticker: leg.ticker.clone(),
            side: leg.side,
            requested_contracts: leg.contracts,
            outcome,
        };

        match &report.outcome {
            LegOutcome::Blocked(block) => {
                info!(trade_id, ticker = %leg.ticker, reason = %block, "Leg blocked")
            }
            LegOutcome::Placed(result) if result.status == ExecutionStatus::Error => {
                warn!(trade_id, ticker = %leg.ticker, result = %result, "Leg failed")
            }
            LegOutcome::Placed(result) => {
                info!(trade_id, ticker = %leg.ticker, result = %result, "Leg placed")
            }
        }

        self.journal_leg(trade_id, strategy, leg, placed_contracts, &report).await;
        self.persist_state();
        report
    }

    /// Returns the outcome and the contract count sent to the exchange (0 if never sent).
    async fn run_leg(&self, leg: &TradeLeg) -> (LegOutcome, u32) {
        // 1. Shape of the leg.
        if leg.contracts == 0 {
            return (LegOutcome::Blocked(ExecutionBlock::Invalid("zero contracts".into())), 0);
        }
        if !(1..=99).contains(&leg.price_cents) {
            return (
                LegOutcome::Blocked(ExecutionBlock::Invalid(format!(
                    "price {}¢ outside 1-99",
                    leg.price_cents
                ))),
                0,
            );
        }

        // 2. Live balance against the floor.
        let balance = match tokio::time::timeout(self.config.order_timeout, self.balance.balance()).await {
            Ok(Ok(b)) => b,
            Ok(Err(e)) => {
                return (
                    LegOutcome::Placed(ExecutionResult::error(None, format!("Balance unavailable: {e:#}"))),
                    0,
                )
            }
            Err(_) => {
                let e = EdgegateError::Timeout(self.config.order_timeout);
                return (
                    LegOutcome::Placed(ExecutionResult::error(None, format!("Balance unavailable: {e}"))),
                    0,
                );
            }
        };
        let cost = leg.cost();
        if balance - cost < self.config.balance_floor {
            return (
                LegOutcome::Blocked(ExecutionBlock::BalanceFloor {
                    balance,
                    cost,
                    floor: self.config.balance_floor,
                }),
                0,
            );
        }

        // 3. Atomic budget decision and hold.
        let reservation = match self.budget.try_reserve(leg, &self.config.limits) {
            Ok(r) => r,
            Err(block) => return (LegOutcome::Blocked(block), 0),
        };

        // 4-6. Place once, classify, settle the hold.
        let result = self.place_and_settle(leg, &reservation).await;
        (LegOutcome::Placed(result), reservation.contracts)
    }

    async fn place_and_settle(&self, leg: &TradeLeg, reservation: &Reservation) -> ExecutionResult {
        let order = OrderRequest::for_leg(leg, reservation.contracts);
        debug!(order = %order, client_order_id = %order.client_order_id, "Placing order");

        let mut ack = match tokio::time::timeout(self.config.order_timeout, self.placer.place_order(&order)).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(e)) => {
                error!(order = %order, error = %e, "Order placement failed");
                self.budget.release(reservation);
                return ExecutionResult::error(None, format!("{e:#}"));
            }
            Err(_) => {
                let e = EdgegateError::Timeout(self.config.order_timeout);
                error!(order = %order, error = %e, "Order placement timed out");
                self.budget.release(reservation);
                return ExecutionResult::error(None, e.to_string());
            }
        };

        let mut status = classify(&ack);
        if status == ExecutionStatus::Resting {
            tokio::time::sleep(self.config.resting_recheck_delay).await;
            match tokio::time::timeout(self.config.order_timeout, self.placer.order_status(&ack.order_id)).await {
                Ok(Ok(latest)) => {
                    status = classify(&latest);
                    ack = latest;
                }
                Ok(Err(e)) => warn!(order_id = %ack.order_id, error = %e, "Resting order re-check failed"),
                Err(_) => warn!(order_id = %ack.order_id, "Resting order re-check timed out"),
            }
            // Anything other than a terminal answer stays resting.
            if status == ExecutionStatus::Error {
                status = ExecutionStatus::Resting;
            }
        }

        let cost = match status {
            ExecutionStatus::Filled => {
                let actual = Decimal::from(ack.fill_count) * cents_to_dollars(reservation.price_cents);
                self.budget.commit_fill(reservation, actual);
                actual
            }
            ExecutionStatus::Resting => {
                self.budget.hold_resting(reservation);
                Decimal::ZERO
            }
            ExecutionStatus::Canceled | ExecutionStatus::Error => {
                self.budget.release(reservation);
                Decimal::ZERO
            }
        };

        ExecutionResult {
            status,
            order_id: Some(ack.order_id),
            fill_count: ack.fill_count,
            cost,
            detail: Some(ack.status),
        }
    }

    async fn journal_leg(
        &self,
        trade_id: &str,
        strategy: &str,
        leg: &TradeLeg,
        placed_contracts: u32,
        report: &LegReport,
    ) {
        let (order_id, fill_count, cost, detail) = match &report.outcome {
            LegOutcome::Blocked(block) => (None, 0, Decimal::ZERO, Some(block.to_string())),
            LegOutcome::Placed(r) => (r.order_id.clone(), r.fill_count, r.cost, r.detail.clone()),
        };
        let entry = JournalEntry {
            trade_id: trade_id.to_string(),
            strategy: strategy.to_string(),
            ticker: leg.ticker.clone(),
            side: leg.side,
            requested_contracts: if placed_contracts > 0 { placed_contracts } else { leg.contracts },
            price_cents: leg.price_cents,
            outcome: report.label(),
            order_id,
            fill_count,
            cost,
            detail,
            trading_day: self.budget.today(),
            recorded_at: Utc::now(),
        };

        if let Err(e) = self.journal.record(&entry).await {
            error!(trade_id, ticker = %leg.ticker, error = %e, "Failed to journal leg outcome");
        }
    }

    fn persist_state(&self) {
        if let Some(store) = &self.state_store {
            if let Err(e) = store.save(&self.budget.snapshot()) {
                error!(path = %store.path().display(), error = %e, "Failed to persist daily state");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
