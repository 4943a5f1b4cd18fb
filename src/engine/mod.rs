//! Core engine: scan → propose → approve → execute → settle.

pub mod accountant;
pub mod approvals;
pub mod budget;
pub mod executor;
pub mod scanner;

pub use approvals::{ApprovalError, ApprovalOutcome, ApprovalRequest, TradeApprovalRegistry, TradeId, TradeStatus};
pub use budget::{BudgetLimits, DailyBudgetTracker, DailyState, ExecutionBlock};
pub use executor::{ExecutionConfig, ExecutionGate, LegOutcome, LegReport};
