//! Accountant: settlement and realized P&L.
//!
//! Polls the result of every open (filled, unsettled) position, records
//! the settlement in the journal and feeds realized losses into today's
//! budget so the daily loss limit sees them. Winning payouts go to an
//! optional [`PayoutReceiver`] (the paper exchange).

use anyhow::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::budget::DailyBudgetTracker;
use crate::platforms::{MarketDataProvider, PayoutReceiver};
use crate::storage::journal::{OpenPosition, Settlement, SqliteJournal};
use crate::storage::DailyStateStore;
use crate::types::{Clock, Side};

/// Totals from one settlement pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettlementSummary {
    pub checked: usize,
    pub settled: usize,
    pub pnl: Decimal,
    pub realized_loss: Decimal,
}

/// Cash returned by a position: $1 per contract on the winning side.
pub fn position_payout(position: &OpenPosition, winning_side: Side) -> Decimal {
    if position.side == winning_side {
        Decimal::from(position.contracts)
    } else {
        Decimal::ZERO
    }
}

/// Profit or loss of a position given the winning side. Contracts pay $1.
pub fn position_pnl(position: &OpenPosition, winning_side: Side) -> Decimal {
    if position.side == winning_side {
        Decimal::from(position.contracts) - position.cost
    } else {
        -position.cost
    }
}

pub struct Accountant {
    markets: Arc<dyn MarketDataProvider>,
    journal: Arc<SqliteJournal>,
    budget: Arc<DailyBudgetTracker>,
    state_store: Option<Arc<DailyStateStore>>,
    payouts: Option<Arc<dyn PayoutReceiver>>,
    clock: Clock,
}

impl Accountant {
    pub fn new(
        markets: Arc<dyn MarketDataProvider>,
        journal: Arc<SqliteJournal>,
        budget: Arc<DailyBudgetTracker>,
        clock: Clock,
    ) -> Self {
        Self {
            markets,
            journal,
            budget,
            state_store: None,
            payouts: None,
            clock,
        }
    }

    pub fn with_state_store(mut self, store: Arc<DailyStateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn with_payouts(mut self, receiver: Arc<dyn PayoutReceiver>) -> Self {
        self.payouts = Some(receiver);
        self
    }

    /// Check every open position once. A failed lookup leaves the position
    /// open for the next pass.
    pub async fn settle_open_positions(&self) -> Result<SettlementSummary> {
        let positions = self.journal.open_positions().await?;
        let mut summary = SettlementSummary { checked: positions.len(), ..Default::default() };

        for position in &positions {
            let winning_side = match self.markets.market_result(&position.ticker).await {
                Ok(Some(side)) => side,
                Ok(None) => {
                    debug!(ticker = %position.ticker, "Not settled yet");
                    continue;
                }
                Err(e) => {
                    warn!(ticker = %position.ticker, error = %e, "Settlement lookup failed");
                    continue;
                }
            };

            let pnl = position_pnl(position, winning_side);
            let settlement = Settlement {
                ticker: position.ticker.clone(),
                winning_side,
                pnl,
                settled_at: (self.clock)(),
            };
            if !self.journal.record_settlement(&settlement).await? {
                continue;
            }

            let payout = position_payout(position, winning_side);
            if let Some(receiver) = self.payouts.as_ref().filter(|_| payout > Decimal::ZERO) {
                if let Err(e) = receiver.credit_payout(&position.ticker, payout).await {
                    warn!(ticker = %position.ticker, error = %e, "Failed to credit payout");
                }
            }

            if pnl < Decimal::ZERO {
                self.budget.record_loss(-pnl);
                summary.realized_loss += -pnl;
            }
            summary.settled += 1;
            summary.pnl += pnl;
            info!(
                ticker = %position.ticker,
                side = %position.side,
                result = %winning_side,
                pnl = format!("${:.2}", pnl),
                "Position settled"
            );
        }

        if summary.settled > 0 {
            if let Some(store) = &self.state_store {
                if let Err(e) = store.save(&self.budget.snapshot()) {
                    warn!(error = %e, "Failed to persist daily state after settlement");
                }
            }
            info!(
                settled = summary.settled,
                pnl = format!("${:.2}", summary.pnl),
                loss = format!("${:.2}", summary.realized_loss),
                "Settlement pass complete"
            );
        }
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
