//! Exchange integrations.
//!
//! Defines the collaborator traits the engine consumes and provides:
//! - Kalshi: public market data (read-only, no auth)
//! - Paper: in-process dry-run exchange for order placement, balance and payouts

pub mod kalshi;
pub mod paper;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{MarketSnapshot, Side, TradeLeg};

/// Source of open contracts for a series.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch all open markets in a series, e.g. `KXINX`.
    async fn fetch_markets(&self, series: &str) -> Result<Vec<MarketSnapshot>>;

    /// Winning side of a settled contract, `None` while it is still live.
    async fn market_result(&self, ticker: &str) -> Result<Option<Side>>;
}

/// Available cash on the trading account.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    async fn balance(&self) -> Result<Decimal>;
}

/// Order entry. Implementations must not retry internally.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderPlacer: Send + Sync {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    /// Re-read an order previously acknowledged.
    async fn order_status(&self, order_id: &str) -> Result<OrderAck>;
}

/// Receives settlement payouts. A live venue credits the account itself,
/// so only simulated exchanges implement this.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayoutReceiver: Send + Sync {
    /// Credit `amount` for a winning position in `ticker`.
    async fn credit_payout(&self, ticker: &str, amount: Decimal) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Order wire types
// ---------------------------------------------------------------------------

/// A limit buy for one leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub ticker: String,
    pub side: Side,
    pub contracts: u32,
    /// Limit price of the side bought, in cents.
    pub price_cents: u32,
    /// Idempotency key sent to the exchange.
    pub client_order_id: String,
}

impl OrderRequest {
    pub fn for_leg(leg: &TradeLeg, contracts: u32) -> Self {
        Self {
            ticker: leg.ticker.clone(),
            side: leg.side,
            contracts,
            price_cents: leg.price_cents,
            client_order_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl fmt::Display for OrderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BUY {} {} x{} @ {}¢",
            self.ticker, self.side, self.contracts, self.price_cents
        )
    }
}

/// Exchange acknowledgement. `status` is the raw exchange string
/// (`executed`, `resting`, `canceled`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
    pub fill_count: u32,
    pub remaining_count: u32,
}
