//! Trade approval registry.
//!
//! Holds proposals awaiting a human decision. Each entry moves through a
//! fixed state machine:
//!
//! ```text
//! Pending --approve--> Executing --legs done--> Executed
//!    |--skip--> Skipped
//!    `--window elapsed--> Expired
//! ```
//!
//! Expiry is checked at decision time as well as by the periodic sweep, so
//! an approval that arrives after the window never executes even if the
//! sweep has not run yet.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::engine::executor::{ExecutionGate, LegReport};
use crate::types::{Clock, TradeProposal};

// ---------------------------------------------------------------------------
// Identifiers and states
// ---------------------------------------------------------------------------

/// Short id shown to the approver and carried in callback data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeId(String);

impl TradeId {
    pub fn generate() -> Self {
        let full = uuid::Uuid::new_v4().simple().to_string();
        Self(full[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TradeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Executing,
    Executed,
    Skipped,
    Expired,
}

/// Every allowed status change. Anything else is rejected.
const TRANSITIONS: &[(TradeStatus, TradeStatus)] = &[
    (TradeStatus::Pending, TradeStatus::Executing),
    (TradeStatus::Pending, TradeStatus::Skipped),
    (TradeStatus::Pending, TradeStatus::Expired),
    (TradeStatus::Executing, TradeStatus::Executed),
];

impl TradeStatus {
    pub fn can_transition_to(self, next: TradeStatus) -> bool {
        TRANSITIONS.contains(&(self, next))
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TradeStatus::Executed | TradeStatus::Skipped | TradeStatus::Expired)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Executing => "executing",
            TradeStatus::Executed => "executed",
            TradeStatus::Skipped => "skipped",
            TradeStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ApprovalError {
    #[error("Trade {0} not found")]
    NotFound(TradeId),

    #[error("Trade {id} is {status}, not pending")]
    NotPending { id: TradeId, status: TradeStatus },

    #[error("Invalid transition {from} -> {to}")]
    InvalidTransition { from: TradeStatus, to: TradeStatus },

    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PendingTrade {
    pub id: TradeId,
    pub proposal: TradeProposal,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub reports: Vec<LegReport>,
}

impl PendingTrade {
    fn transition(&mut self, next: TradeStatus, now: DateTime<Utc>) -> Result<(), ApprovalError> {
        if !self.status.can_transition_to(next) {
            return Err(ApprovalError::InvalidTransition { from: self.status, to: next });
        }
        debug!(id = %self.id, from = %self.status, to = %next, "Trade status change");
        self.status = next;
        if next.is_terminal() {
            self.resolved_at = Some(now);
        }
        Ok(())
    }

    pub fn request(&self, expiry: Duration) -> ApprovalRequest {
        ApprovalRequest {
            id: self.id.clone(),
            proposal: self.proposal.clone(),
            created_at: self.created_at,
            expires_at: self.created_at + expiry,
        }
    }
}

/// What the approval channel shows the human.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub id: TradeId,
    pub proposal: TradeProposal,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn total_cost(&self) -> Decimal {
        self.proposal.total_cost()
    }
}

/// Result of a decision on a pending trade.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalOutcome {
    Executed(Vec<LegReport>),
    Skipped,
    Expired,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct TradeApprovalRegistry {
    expiry: Duration,
    clock: Clock,
    trades: Mutex<HashMap<TradeId, PendingTrade>>,
}

impl TradeApprovalRegistry {
    pub fn new(expiry: Duration, clock: Clock) -> Self {
        Self {
            expiry,
            clock,
            trades: Mutex::new(HashMap::new()),
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TradeId, PendingTrade>> {
        self.trades.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn is_stale(&self, trade: &PendingTrade, now: DateTime<Utc>) -> bool {
        now - trade.created_at > self.expiry
    }

    /// Register a proposal and return the request to present.
    pub fn create(&self, proposal: TradeProposal) -> Result<ApprovalRequest, ApprovalError> {
        if proposal.legs.is_empty() {
            return Err(ApprovalError::InvalidProposal("no legs".into()));
        }
        if let Some(leg) = proposal
            .legs
            .iter()
            .find(|l| l.contracts == 0 || !(1..=99).contains(&l.price_cents))
        {
            return Err(ApprovalError::InvalidProposal(format!("bad leg {leg}")));
        }

        let trade = PendingTrade {
            id: TradeId::generate(),
            proposal,
            status: TradeStatus::Pending,
            created_at: (self.clock)(),
            resolved_at: None,
            reports: Vec::new(),
        };
        let request = trade.request(self.expiry);
        info!(
            id = %trade.id,
            strategy = %trade.proposal.strategy,
            legs = trade.proposal.legs.len(),
            cost = format!("${:.2}", trade.proposal.total_cost()),
            "Trade awaiting approval"
        );
        self.lock().insert(trade.id.clone(), trade);
        Ok(request)
    }

    /// Decline a pending trade.
    pub fn skip(&self, id: &TradeId) -> Result<(), ApprovalError> {
        let now = (self.clock)();
        let mut trades = self.lock();
        let trade = trades.get_mut(id).ok_or_else(|| ApprovalError::NotFound(id.clone()))?;
        if trade.status != TradeStatus::Pending {
            return Err(ApprovalError::NotPending { id: id.clone(), status: trade.status });
        }
        trade.transition(TradeStatus::Skipped, now)?;
        info!(id = %id, "Trade skipped");
        Ok(())
    }

    /// Approve and execute every leg in order. A decision that arrives after
    /// the window marks the trade expired and places nothing.
    pub async fn approve(
        &self,
        id: &TradeId,
        gate: &ExecutionGate,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        let proposal = {
            let now = (self.clock)();
            let mut trades = self.lock();
            let trade = trades.get_mut(id).ok_or_else(|| ApprovalError::NotFound(id.clone()))?;
            if trade.status != TradeStatus::Pending {
                return Err(ApprovalError::NotPending { id: id.clone(), status: trade.status });
            }
            if self.is_stale(trade, now) {
                trade.transition(TradeStatus::Expired, now)?;
                info!(id = %id, age_secs = (now - trade.created_at).num_seconds(), "Approval arrived after expiry");
                return Ok(ApprovalOutcome::Expired);
            }
            trade.transition(TradeStatus::Executing, now)?;
            trade.proposal.clone()
        };

        info!(id = %id, legs = proposal.legs.len(), "Trade approved, executing");
        let mut reports = Vec::with_capacity(proposal.legs.len());
        for leg in &proposal.legs {
            reports.push(gate.execute_leg(id.as_str(), &proposal.strategy, leg).await);
        }

        let now = (self.clock)();
        if let Some(trade) = self.lock().get_mut(id) {
            trade.reports = reports.clone();
            trade.transition(TradeStatus::Executed, now)?;
        }
        let filled = reports.iter().filter(|r| r.is_filled()).count();
        info!(
            id = %id,
            filled,
            legs = reports.len(),
            cost = format!("${:.2}", reports.iter().map(LegReport::cost).sum::<Decimal>()),
            "Trade executed"
        );
        Ok(ApprovalOutcome::Executed(reports))
    }

    /// Expire stale pending trades and drop resolved ones past retention.
    pub fn sweep_expired(&self) -> Vec<TradeId> {
        let now = (self.clock)();
        let retention = self.expiry * 2;
        let mut trades = self.lock();

        let mut expired = Vec::new();
        for trade in trades.values_mut() {
            if trade.status == TradeStatus::Pending && self.is_stale(trade, now) {
                if trade.transition(TradeStatus::Expired, now).is_ok() {
                    expired.push(trade.id.clone());
                }
            }
        }

        let before = trades.len();
        trades.retain(|_, t| match t.resolved_at {
            Some(resolved) if t.status.is_terminal() => now - resolved <= retention,
            _ => true,
        });
        let purged = before - trades.len();

        if !expired.is_empty() || purged > 0 {
            info!(expired = expired.len(), purged, "Approval sweep");
        }
        expired.sort();
        expired
    }

    pub fn get(&self, id: &TradeId) -> Option<PendingTrade> {
        self.lock().get(id).cloned()
    }

    /// Pending requests, oldest first.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut out: Vec<ApprovalRequest> = self
            .lock()
            .values()
            .filter(|t| t.status == TradeStatus::Pending)
            .map(|t| t.request(self.expiry))
            .collect();
        out.sort_by_key(|r| r.created_at);
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
