//! Shared types for the EDGEGATE agent.
//!
//! These types form the data model used across all modules.
//! They are kept free of engine logic so that strategy, engine,
//! platform and alert modules can depend on them without cycles.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now" for day rollover and approval expiry.
///
/// Production code uses [`system_clock`]; tests substitute a manual clock.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Wall-clock time.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Convert a price in cents to dollars.
pub fn cents_to_dollars(cents: u32) -> Decimal {
    Decimal::new(i64::from(cents), 2)
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Contract side actually bought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// The opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    /// Wire name used by the exchange API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }

    /// Price paid per contract (cents) for this side, given the YES price.
    pub fn cost_cents(&self, yes_price_cents: u32) -> u32 {
        match self {
            Side::Yes => yes_price_cents,
            Side::No => 100u32.saturating_sub(yes_price_cents),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yes" => Ok(Side::Yes),
            "no" => Ok(Side::No),
            _ => Err(anyhow::anyhow!("Unknown side: {s}")),
        }
    }
}

/// Direction recommended by the edge calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSide {
    Yes,
    No,
    Skip,
}

impl SignalSide {
    /// The side to buy, if any.
    pub fn tradable(&self) -> Option<Side> {
        match self {
            SignalSide::Yes => Some(Side::Yes),
            SignalSide::No => Some(Side::No),
            SignalSide::Skip => None,
        }
    }
}

impl fmt::Display for SignalSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalSide::Yes => write!(f, "YES"),
            SignalSide::No => write!(f, "NO"),
            SignalSide::Skip => write!(f, "SKIP"),
        }
    }
}

/// Coarse human-facing quality label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    B,
    C,
    F,
}

impl Grade {
    pub const ALL: &'static [Grade] = &[Grade::APlus, Grade::A, Grade::B, Grade::C, Grade::F];

    /// Whether this grade is worth proposing to a human at all.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Grade::F)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::APlus => write!(f, "A+"),
            Grade::A => write!(f, "A"),
            Grade::B => write!(f, "B"),
            Grade::C => write!(f, "C"),
            Grade::F => write!(f, "F"),
        }
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Current state of one open contract. Prices are in cents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ticker: String,
    pub series: String,
    pub title: String,
    pub yes_bid: u32,
    pub yes_ask: u32,
    pub no_bid: u32,
    pub no_ask: u32,
    pub volume: u64,
    pub close_time: Option<DateTime<Utc>>,
    /// Lower bound of a bracket contract, if any.
    pub floor_strike: Option<f64>,
    /// Upper bound of a bracket contract, if any.
    pub cap_strike: Option<f64>,
}

impl fmt::Display for MarketSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (YES {}/{}¢ | NO {}/{}¢ | vol {})",
            self.ticker, self.yes_bid, self.yes_ask, self.no_bid, self.no_ask, self.volume,
        )
    }
}

impl MarketSnapshot {
    /// Mid YES price in whole cents, used as the market-implied price.
    /// Returns 0 when there is no two-sided quote.
    pub fn yes_mid_cents(&self) -> u32 {
        if self.yes_bid == 0 || self.yes_ask == 0 {
            return self.yes_ask.max(self.yes_bid);
        }
        (self.yes_bid + self.yes_ask) / 2
    }

    /// Midpoint of the bracket range, if both strikes are known.
    pub fn bracket_midpoint(&self) -> Option<f64> {
        match (self.floor_strike, self.cap_strike) {
            (Some(lo), Some(hi)) => Some((lo + hi) / 2.0),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

/// A candidate trade produced by a strategy scan.
///
/// Sizing fields are written once by [`Prediction::apply_sizing`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub ticker: String,
    pub strategy: String,
    pub side: Side,
    /// Market-implied YES probability (0.0–1.0, exclusive).
    pub market_price: f64,
    /// Calibrated probability that the chosen side wins.
    pub calibrated_probability: f64,
    /// Calibrated win probability minus breakeven for the chosen side.
    pub edge: f64,
    pub confidence_score: f64,
    pub kelly_fraction: f64,
    pub recommended_contracts: u32,
    pub recommended_cost: Decimal,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} @ {:.0}¢ | p={:.1}% edge={:+.1}% conf={:.0}%",
            self.strategy,
            self.side,
            self.ticker,
            self.market_price * 100.0,
            self.calibrated_probability * 100.0,
            self.edge * 100.0,
            self.confidence_score * 100.0,
        )
    }
}

impl Prediction {
    /// Price of one contract of the chosen side in dollars (0.0–1.0).
    pub fn cost_per_contract(&self) -> f64 {
        match self.side {
            Side::Yes => self.market_price,
            Side::No => 1.0 - self.market_price,
        }
    }

    /// Record the sizing outcome on the candidate.
    pub fn apply_sizing(&mut self, kelly_fraction: f64, contracts: u32, cost: Decimal) {
        self.kelly_fraction = kelly_fraction;
        self.recommended_contracts = contracts;
        self.recommended_cost = cost;
    }
}

// ---------------------------------------------------------------------------
// Trade proposals
// ---------------------------------------------------------------------------

/// One order in a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLeg {
    pub ticker: String,
    pub side: Side,
    pub contracts: u32,
    /// Limit price of the side bought, in cents (1–99).
    pub price_cents: u32,
    pub description: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TradeLeg {
    /// Total cost in dollars at the limit price.
    pub fn cost(&self) -> Decimal {
        Decimal::from(self.contracts) * cents_to_dollars(self.price_cents)
    }

    /// Payout minus cost if the leg wins.
    pub fn profit_if_win(&self) -> Decimal {
        Decimal::from(self.contracts) * cents_to_dollars(100u32.saturating_sub(self.price_cents))
    }
}

impl fmt::Display for TradeLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} BUY {} {}x @ {}¢ (${:.2})",
            self.ticker,
            self.side,
            self.contracts,
            self.price_cents,
            self.cost(),
        )
    }
}

/// A single trade or an N-leg batch awaiting one human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeProposal {
    pub strategy: String,
    pub summary: String,
    pub legs: Vec<TradeLeg>,
}

impl TradeProposal {
    pub fn total_cost(&self) -> Decimal {
        self.legs.iter().map(TradeLeg::cost).sum()
    }

    pub fn total_profit_if_win(&self) -> Decimal {
        self.legs.iter().map(TradeLeg::profit_if_win).sum()
    }
}

// ---------------------------------------------------------------------------
// Execution results
// ---------------------------------------------------------------------------

/// Classified outcome of an order placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Filled,
    Resting,
    Canceled,
    Error,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Filled => write!(f, "filled"),
            ExecutionStatus::Resting => write!(f, "resting"),
            ExecutionStatus::Canceled => write!(f, "canceled"),
            ExecutionStatus::Error => write!(f, "error"),
        }
    }
}

/// Result of sending one leg to the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub order_id: Option<String>,
    pub fill_count: u32,
    /// Actual cost of filled contracts.
    pub cost: Decimal,
    /// Exchange status string or error message.
    pub detail: Option<String>,
}

impl ExecutionResult {
    /// An error result for a leg that never reached (or never heard back from) the exchange.
    pub fn error(order_id: Option<String>, detail: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            order_id,
            fill_count: 0,
            cost: Decimal::ZERO,
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} fills={} cost=${:.2} [{}]",
            self.status,
            self.fill_count,
            self.cost,
            self.order_id.as_deref().unwrap_or("-"),
        )?;
        if let Some(detail) = &self.detail {
            write!(f, " {detail}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for collaborator and startup failures.
#[derive(Debug, thiserror::Error)]
pub enum EdgegateError {
    #[error("Platform error ({platform}): {message}")]
    Platform { platform: String, message: String },

    #[error("Alert channel error ({channel}): {message}")]
    Alert { channel: String, message: String },

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
