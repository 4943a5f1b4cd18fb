//! Approval channels.
//!
//! A channel shows pending trades to a human and reports what happened
//! after the decision. Decisions flow back into the registry through the
//! channel's own loop (see `telegram::TelegramChannel::poll_loop`).
//!
//! - `LogChannel`: writes requests and outcomes to the tracing log only
//! - `TelegramChannel`: inline-keyboard messages via the Bot API

pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt::Write;
use tracing::info;

use crate::engine::approvals::{
    ApprovalError, ApprovalOutcome, ApprovalRequest, TradeApprovalRegistry, TradeId,
};
use crate::engine::executor::{ExecutionGate, LegReport};

/// Presents approval requests and reports their outcome.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn present(&self, request: &ApprovalRequest) -> Result<()>;

    async fn report(&self, request: &ApprovalRequest, outcome: &ApprovalOutcome) -> Result<()>;
}

/// A human decision received from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve(TradeId),
    Skip(TradeId),
}

impl Decision {
    pub fn trade_id(&self) -> &TradeId {
        match self {
            Decision::Approve(id) | Decision::Skip(id) => id,
        }
    }
}

/// Apply a decision to the registry and return the request it resolved
/// together with the outcome.
pub async fn apply_decision(
    registry: &TradeApprovalRegistry,
    gate: &ExecutionGate,
    decision: &Decision,
) -> Result<(ApprovalRequest, ApprovalOutcome), ApprovalError> {
    let id = decision.trade_id();
    let request = registry
        .get(id)
        .map(|t| t.request(registry.expiry()))
        .ok_or_else(|| ApprovalError::NotFound(id.clone()))?;
    let outcome = match decision {
        Decision::Approve(id) => registry.approve(id, gate).await?,
        Decision::Skip(id) => {
            registry.skip(id)?;
            ApprovalOutcome::Skipped
        }
    };
    Ok((request, outcome))
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Plain-text body of an approval request.
pub fn render_request(request: &ApprovalRequest) -> String {
    let proposal = &request.proposal;
    let mut out = format!(
        "[{}] {} ({})\n{}\n",
        request.id,
        proposal.strategy,
        plural(proposal.legs.len(), "leg"),
        proposal.summary,
    );
    for (i, leg) in proposal.legs.iter().enumerate() {
        let _ = writeln!(out, "{}. {leg}", i + 1);
        if !leg.description.is_empty() {
            let _ = writeln!(out, "   {}", leg.description);
        }
    }
    let _ = write!(
        out,
        "Total ${:.2}, profit if all win ${:.2}\nExpires {} UTC",
        proposal.total_cost(),
        proposal.total_profit_if_win(),
        request.expires_at.format("%H:%M"),
    );
    out
}

/// Plain-text body of a decision outcome.
pub fn render_outcome(request: &ApprovalRequest, outcome: &ApprovalOutcome) -> String {
    match outcome {
        ApprovalOutcome::Skipped => format!("[{}] Skipped", request.id),
        ApprovalOutcome::Expired => format!("[{}] Expired, nothing placed", request.id),
        ApprovalOutcome::Executed(reports) => {
            let filled = reports.iter().filter(|r| r.is_filled()).count();
            let cost: Decimal = reports.iter().map(LegReport::cost).sum();
            let mut out = format!(
                "[{}] Executed {filled}/{} filled, ${cost:.2} deployed",
                request.id,
                reports.len(),
            );
            for report in reports {
                let _ = write!(out, "\n- {report}");
            }
            out
        }
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("1 {word}")
    } else {
        format!("{n} {word}s")
    }
}

// ---------------------------------------------------------------------------
// Log-only channel
// ---------------------------------------------------------------------------

/// Fallback channel when no bot credentials are configured. Requests can
/// only time out unless something else calls the registry.
pub struct LogChannel;

#[async_trait]
impl ApprovalChannel for LogChannel {
    async fn present(&self, request: &ApprovalRequest) -> Result<()> {
        info!(
            id = %request.id,
            cost = format!("${:.2}", request.total_cost()),
            "Approval requested\n{}",
            render_request(request)
        );
        Ok(())
    }

    async fn report(&self, request: &ApprovalRequest, outcome: &ApprovalOutcome) -> Result<()> {
        info!(id = %request.id, "{}", render_outcome(request, outcome));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
