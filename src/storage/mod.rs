//! Persistence layer.
//!
//! Two stores:
//! - [`DailyStateStore`]: JSON snapshot of today's budget state, rewritten
//!   after every execution so a restart resumes mid-day totals.
//! - [`journal::SqliteJournal`]: append-only SQLite record of every leg
//!   outcome plus settlements.

pub mod journal;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::engine::budget::{DailyBudgetTracker, DailyState};
use crate::types::{Clock, Side};
use self::journal::SqliteJournal;

// ---------------------------------------------------------------------------
// Execution journal
// ---------------------------------------------------------------------------

/// One leg outcome, including legs that were blocked before placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub trade_id: String,
    pub strategy: String,
    pub ticker: String,
    pub side: Side,
    pub requested_contracts: u32,
    pub price_cents: u32,
    /// `filled`, `resting`, `canceled`, `error` or `blocked`.
    pub outcome: String,
    pub order_id: Option<String>,
    pub fill_count: u32,
    pub cost: Decimal,
    pub detail: Option<String>,
    pub trading_day: NaiveDate,
    pub recorded_at: DateTime<Utc>,
}

/// Durable record of execution outcomes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionJournal: Send + Sync {
    async fn record(&self, entry: &JournalEntry) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Daily state snapshot
// ---------------------------------------------------------------------------

/// JSON snapshot of [`DailyState`]. Writes ordered at or before the last
/// one written, by (date, version), are dropped.
pub struct DailyStateStore {
    path: PathBuf,
    last_written: Mutex<Option<(NaiveDate, u64)>>,
}

impl DailyStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_written: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot. Returns `false` if a newer version was already written.
    pub fn save(&self, state: &DailyState) -> Result<bool> {
        let mut last = self.last_written.lock().unwrap_or_else(|p| p.into_inner());
        let key = (state.date, state.version);
        if last.is_some_and(|written| key <= written) {
            debug!(version = state.version, "Skipping stale daily state snapshot");
            return Ok(false);
        }

        let json = serde_json::to_string_pretty(state)
            .context("Failed to serialise daily state")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write state to {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move state into {}", self.path.display()))?;

        *last = Some(key);
        debug!(
            path = %self.path.display(),
            date = %state.date,
            version = state.version,
            deployed = format!("${:.2}", state.deployed_total),
            "Daily state saved"
        );
        Ok(true)
    }

    /// Load the last snapshot. Returns `None` if none exists (fresh start).
    pub fn load(&self) -> Result<Option<DailyState>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No saved daily state, starting fresh");
            return Ok(None);
        }

        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state from {}", self.path.display()))?;
        let state: DailyState = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse state from {}", self.path.display()))?;

        *self.last_written.lock().unwrap_or_else(|p| p.into_inner()) = Some((state.date, state.version));
        info!(
            path = %self.path.display(),
            date = %state.date,
            deployed = format!("${:.2}", state.deployed_total),
            trades = state.trade_count,
            "Daily state loaded from disk"
        );
        Ok(Some(state))
    }
}

// ---------------------------------------------------------------------------
// Startup restore
// ---------------------------------------------------------------------------

/// Rebuild today's budget from the snapshot, then bring it up to what the
/// journal shows was filled today. The journal is written before the
/// snapshot, so it wins wherever the two disagree upward.
pub async fn restore_daily_budget(
    store: &DailyStateStore,
    journal: &SqliteJournal,
    offset: FixedOffset,
    clock: Clock,
) -> Result<DailyBudgetTracker> {
    let budget = match store.load()? {
        Some(snapshot) => DailyBudgetTracker::restore(snapshot, offset, clock),
        None => DailyBudgetTracker::new(offset, clock),
    };

    let today = budget.today();
    let tickers = journal
        .filled_tickers_on(today)
        .await
        .context("Failed to read today's fills from the journal")?;
    let (deployed, trade_count) = journal
        .filled_totals_on(today)
        .await
        .context("Failed to total today's fills from the journal")?;
    budget.merge_executed(tickers);
    budget.merge_fill_totals(deployed, trade_count);
    Ok(budget)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
