//! Kelly criterion position sizing behind seven safety gates.
//!
//! Converts a candidate [`Prediction`] into a whole number of contracts.
//! Gates run in a fixed order and the first failure short-circuits, so a
//! blocked result always names the earliest gate that tripped. The sizer
//! reads a [`DailyState`] snapshot but never mutates it; the execution
//! path re-checks the budget atomically before any order goes out.

use anyhow::{bail, Result};
use rust_decimal::prelude::*;
use serde::Deserialize;
use std::fmt;
use tracing::debug;

use crate::engine::budget::DailyState;
use crate::types::{Prediction, Side};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// One step of the balance-scaled Kelly multiplier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KellyTier {
    /// Tier applies at or above this balance.
    pub min_balance: Decimal,
    /// Fraction of full Kelly to bet.
    pub fraction: f64,
}

#[derive(Debug, Clone)]
pub struct SizingConfig {
    pub balance_floor: Decimal,
    pub daily_budget: Decimal,
    pub max_open_positions: usize,
    pub min_edge: f64,
    pub max_trade_cap: Decimal,
    /// Hard ceiling on the fraction of balance risked per trade.
    pub max_kelly_fraction: f64,
    pub min_contracts: u32,
    pub kelly_tiers: Vec<KellyTier>,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            balance_floor: Decimal::from(75),
            daily_budget: Decimal::from(200),
            max_open_positions: 20,
            min_edge: 0.05,
            max_trade_cap: Decimal::from(20),
            max_kelly_fraction: 0.10,
            min_contracts: 1,
            kelly_tiers: vec![
                KellyTier { min_balance: Decimal::ZERO, fraction: 0.40 },
                KellyTier { min_balance: Decimal::from(1000), fraction: 0.38 },
                KellyTier { min_balance: Decimal::from(2500), fraction: 0.35 },
                KellyTier { min_balance: Decimal::from(5000), fraction: 0.30 },
            ],
        }
    }
}

impl SizingConfig {
    /// Tiers must be non-empty, sorted by balance, with fractions that
    /// never increase as the balance grows.
    pub fn validate_tiers(&self) -> Result<()> {
        if self.kelly_tiers.is_empty() {
            bail!("sizing.kelly_tiers must not be empty");
        }
        for tier in &self.kelly_tiers {
            if !(tier.fraction > 0.0 && tier.fraction <= 1.0) {
                bail!("Kelly tier fraction {} out of range (0, 1]", tier.fraction);
            }
        }
        for pair in self.kelly_tiers.windows(2) {
            if pair[1].min_balance <= pair[0].min_balance {
                bail!(
                    "Kelly tiers must be sorted by min_balance ({} then {})",
                    pair[0].min_balance,
                    pair[1].min_balance
                );
            }
            if pair[1].fraction > pair[0].fraction {
                bail!(
                    "Kelly tier fractions must not increase with balance ({} then {})",
                    pair[0].fraction,
                    pair[1].fraction
                );
            }
        }
        Ok(())
    }

    /// Kelly multiplier for a balance. Below the lowest tier uses the lowest tier.
    pub fn tier_fraction(&self, balance: Decimal) -> f64 {
        self.kelly_tiers
            .iter()
            .rev()
            .find(|t| balance >= t.min_balance)
            .or_else(|| self.kelly_tiers.first())
            .map(|t| t.fraction)
            .unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Malformed sizing input. Returned before any gate runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid market price {0}: must be strictly between 0 and 1")]
    InvalidMarketPrice(f64),

    #[error("Invalid probability {0}: must be within [0, 1]")]
    InvalidProbability(f64),

    #[error("Negative balance ${0}")]
    NegativeBalance(Decimal),
}

/// The gate that stopped a sizing request.
#[derive(Debug, Clone, PartialEq)]
pub enum SizingBlock {
    BalanceBelowFloor { balance: Decimal, floor: Decimal },
    DailyBudgetExhausted { committed: Decimal, budget: Decimal },
    MaxOpenPositions { open: usize, max: usize },
    EdgeBelowMinimum { edge: f64, min: f64 },
    NoEdge { kelly: f64 },
    BelowMinimumContracts { contracts: u32, min: u32 },
}

impl SizingBlock {
    /// Stable gate name, shared with [`PositionSize::passed_gates`].
    pub fn gate(&self) -> &'static str {
        match self {
            SizingBlock::BalanceBelowFloor { .. } => GATE_BALANCE_FLOOR,
            SizingBlock::DailyBudgetExhausted { .. } => GATE_DAILY_BUDGET,
            SizingBlock::MaxOpenPositions { .. } => GATE_MAX_POSITIONS,
            SizingBlock::EdgeBelowMinimum { .. } => GATE_MIN_EDGE,
            SizingBlock::NoEdge { .. } => GATE_KELLY,
            SizingBlock::BelowMinimumContracts { .. } => GATE_MIN_CONTRACTS,
        }
    }
}

impl fmt::Display for SizingBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizingBlock::BalanceBelowFloor { balance, floor } => {
                write!(f, "Balance ${balance:.2} below floor ${floor:.2}")
            }
            SizingBlock::DailyBudgetExhausted { committed, budget } => {
                write!(f, "Daily budget reached (${committed:.2}/${budget:.2})")
            }
            SizingBlock::MaxOpenPositions { open, max } => {
                write!(f, "Max positions reached ({open}/{max})")
            }
            SizingBlock::EdgeBelowMinimum { edge, min } => {
                write!(f, "Edge {:.1}% below minimum {:.1}%", edge * 100.0, min * 100.0)
            }
            SizingBlock::NoEdge { kelly } => write!(f, "Non-positive Kelly ({kelly:.4}), no edge"),
            SizingBlock::BelowMinimumContracts { contracts, min } => {
                write!(f, "{contracts} contracts below minimum {min}")
            }
        }
    }
}

pub const GATE_BALANCE_FLOOR: &str = "balance_floor";
pub const GATE_DAILY_BUDGET: &str = "daily_budget";
pub const GATE_MAX_POSITIONS: &str = "max_positions";
pub const GATE_MIN_EDGE: &str = "min_edge";
pub const GATE_KELLY: &str = "kelly_criterion";
pub const GATE_MAX_TRADE: &str = "max_single_trade";
pub const GATE_MIN_CONTRACTS: &str = "min_contracts";

/// A sized position that cleared every gate.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSize {
    /// Fraction of balance risked after tier scaling and the hard cap.
    pub kelly_fraction: f64,
    pub full_kelly: f64,
    pub contracts: u32,
    pub cost_per_contract: Decimal,
    pub cost: Decimal,
    pub passed_gates: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizingResult {
    Sized(PositionSize),
    Blocked(SizingBlock),
}

impl SizingResult {
    pub fn is_sized(&self) -> bool {
        matches!(self, SizingResult::Sized(_))
    }
}

// ---------------------------------------------------------------------------
// Sizer
// ---------------------------------------------------------------------------

pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Full Kelly for a binary contract: f* = (b·p − q) / b.
    ///
    /// `market_price` is the YES price; `b` is the net payout per dollar
    /// risked on the chosen side.
    pub fn full_kelly(side: Side, market_price: f64, probability: f64) -> f64 {
        let b = match side {
            Side::Yes => (1.0 - market_price) / market_price,
            Side::No => market_price / (1.0 - market_price),
        };
        if b <= 0.0 || !b.is_finite() {
            return 0.0;
        }
        let q = 1.0 - probability;
        (b * probability - q) / b
    }

    /// Size a candidate against the current balance and a budget snapshot.
    pub fn size(
        &self,
        prediction: &Prediction,
        balance: Decimal,
        daily: &DailyState,
        open_positions: usize,
    ) -> Result<SizingResult, ValidationError> {
        let mp = prediction.market_price;
        if !(mp > 0.0 && mp < 1.0) {
            return Err(ValidationError::InvalidMarketPrice(mp));
        }
        let p = prediction.calibrated_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ValidationError::InvalidProbability(p));
        }
        if balance < Decimal::ZERO {
            return Err(ValidationError::NegativeBalance(balance));
        }

        let cfg = &self.config;
        let mut passed = Vec::with_capacity(7);

        // -- Gate 1: balance floor --
        if balance < cfg.balance_floor {
            return Ok(self.blocked(prediction, SizingBlock::BalanceBelowFloor {
                balance,
                floor: cfg.balance_floor,
            }));
        }
        passed.push(GATE_BALANCE_FLOOR);

        // -- Gate 2: daily budget --
        let committed = daily.committed();
        if committed >= cfg.daily_budget {
            return Ok(self.blocked(prediction, SizingBlock::DailyBudgetExhausted {
                committed,
                budget: cfg.daily_budget,
            }));
        }
        let remaining = cfg.daily_budget - committed;
        passed.push(GATE_DAILY_BUDGET);

        // -- Gate 3: open positions --
        if open_positions >= cfg.max_open_positions {
            return Ok(self.blocked(prediction, SizingBlock::MaxOpenPositions {
                open: open_positions,
                max: cfg.max_open_positions,
            }));
        }
        passed.push(GATE_MAX_POSITIONS);

        // -- Gate 4: minimum edge --
        if prediction.edge.abs() < cfg.min_edge {
            return Ok(self.blocked(prediction, SizingBlock::EdgeBelowMinimum {
                edge: prediction.edge,
                min: cfg.min_edge,
            }));
        }
        passed.push(GATE_MIN_EDGE);

        // -- Gate 5: Kelly --
        let full_kelly = Self::full_kelly(prediction.side, mp, p);
        let fraction = (full_kelly * cfg.tier_fraction(balance)).clamp(0.0, cfg.max_kelly_fraction);
        if fraction <= 0.0 {
            return Ok(self.blocked(prediction, SizingBlock::NoEdge { kelly: full_kelly }));
        }
        passed.push(GATE_KELLY);

        // -- Gate 6: per-trade cap and remaining budget --
        let cost_per_contract = Decimal::from_f64(prediction.cost_per_contract())
            .unwrap_or(Decimal::ZERO)
            .round_dp(2);
        if cost_per_contract <= Decimal::ZERO {
            return Err(ValidationError::InvalidMarketPrice(mp));
        }
        let kelly_amount = balance * Decimal::from_f64(fraction).unwrap_or(Decimal::ZERO);
        let cap = cfg.max_trade_cap.min(remaining);
        let position = kelly_amount.min(cap);

        let mut contracts = whole_contracts(position, cost_per_contract).max(cfg.min_contracts);
        if Decimal::from(contracts) * cost_per_contract > cap {
            contracts = whole_contracts(cap, cost_per_contract);
        }
        passed.push(GATE_MAX_TRADE);

        // -- Gate 7: minimum contracts --
        if contracts < cfg.min_contracts {
            return Ok(self.blocked(prediction, SizingBlock::BelowMinimumContracts {
                contracts,
                min: cfg.min_contracts,
            }));
        }
        passed.push(GATE_MIN_CONTRACTS);

        let cost = Decimal::from(contracts) * cost_per_contract;

        debug!(
            ticker = %prediction.ticker,
            full_kelly = format!("{:.2}%", full_kelly * 100.0),
            fraction = format!("{:.2}%", fraction * 100.0),
            contracts,
            cost = format!("${:.2}", cost),
            "Position sized"
        );

        Ok(SizingResult::Sized(PositionSize {
            kelly_fraction: fraction,
            full_kelly,
            contracts,
            cost_per_contract,
            cost,
            passed_gates: passed,
        }))
    }

    fn blocked(&self, prediction: &Prediction, block: SizingBlock) -> SizingResult {
        debug!(
            ticker = %prediction.ticker,
            gate = block.gate(),
            reason = %block,
            "Sizing blocked"
        );
        SizingResult::Blocked(block)
    }
}

fn whole_contracts(amount: Decimal, cost_per_contract: Decimal) -> u32 {
    (amount / cost_per_contract).floor().to_u32().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
