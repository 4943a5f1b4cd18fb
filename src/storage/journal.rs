//! SQLite trade journal.
//!
//! Every leg outcome is appended to `trade_journal`; settled contracts are
//! recorded in `settlements`. Decimals are stored as TEXT.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use super::{ExecutionJournal, JournalEntry};
use crate::types::Side;

/// A filled position with no settlement recorded yet.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub ticker: String,
    pub side: Side,
    pub contracts: u32,
    pub cost: Decimal,
    pub trading_day: NaiveDate,
}

/// Final result of a contract.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub ticker: String,
    /// Side that settled in the money.
    pub winning_side: Side,
    pub pnl: Decimal,
    pub settled_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SqliteJournal {
    pool: SqlitePool,
}

impl SqliteJournal {
    /// Open (creating if needed) the journal at `url`, e.g. `sqlite://edgegate.db?mode=rwc`.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .with_context(|| format!("Failed to open journal at {url}"))?;
        let journal = Self { pool };
        journal.init().await?;
        Ok(journal)
    }

    /// Private in-memory journal. One connection, never recycled, so the
    /// database lives as long as the pool.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory journal")?;
        let journal = Self { pool };
        journal.init().await?;
        Ok(journal)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_journal (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id TEXT NOT NULL,
                strategy TEXT NOT NULL,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL,
                requested_contracts INTEGER NOT NULL,
                price_cents INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                order_id TEXT,
                fill_count INTEGER NOT NULL,
                cost TEXT NOT NULL,
                detail TEXT,
                trading_day TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create trade_journal table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_journal_day ON trade_journal (trading_day, outcome)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settlements (
                ticker TEXT PRIMARY KEY,
                winning_side TEXT NOT NULL,
                pnl TEXT NOT NULL,
                settled_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create settlements table")?;

        info!("Trade journal ready");
        Ok(())
    }

    /// Tickers with a fill recorded on `day`.
    pub async fn filled_tickers_on(&self, day: NaiveDate) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT ticker FROM trade_journal WHERE trading_day = ? AND outcome = 'filled' ORDER BY ticker",
        )
        .bind(day.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("ticker").map_err(Into::into))
            .collect()
    }

    /// Total cost and number of filled legs recorded on `day`.
    pub async fn filled_totals_on(&self, day: NaiveDate) -> Result<(Decimal, u32)> {
        let rows = sqlx::query("SELECT cost FROM trade_journal WHERE trading_day = ? AND outcome = 'filled'")
            .bind(day.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut deployed = Decimal::ZERO;
        for row in &rows {
            deployed += Decimal::from_str(&row.try_get::<String, _>("cost")?)?;
        }
        Ok((deployed, rows.len() as u32))
    }

    /// Filled positions with no settlement, aggregated per ticker.
    pub async fn open_positions(&self) -> Result<Vec<OpenPosition>> {
        let rows = sqlx::query(
            r#"
            SELECT t.ticker, t.side, t.fill_count, t.cost, t.trading_day
            FROM trade_journal t
            LEFT JOIN settlements s ON s.ticker = t.ticker
            WHERE t.outcome = 'filled' AND s.ticker IS NULL
            ORDER BY t.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut positions: Vec<OpenPosition> = Vec::new();
        for row in rows {
            let ticker: String = row.try_get("ticker")?;
            let side: Side = row.try_get::<String, _>("side")?.parse()?;
            let contracts = row.try_get::<i64, _>("fill_count")?.max(0) as u32;
            let cost = Decimal::from_str(&row.try_get::<String, _>("cost")?)?;
            let trading_day = NaiveDate::from_str(&row.try_get::<String, _>("trading_day")?)?;

            match positions.iter_mut().find(|p| p.ticker == ticker) {
                Some(p) => {
                    p.contracts += contracts;
                    p.cost += cost;
                }
                None => positions.push(OpenPosition { ticker, side, contracts, cost, trading_day }),
            }
        }
        Ok(positions)
    }

    /// Record a settlement. A ticker settles once; repeats are ignored.
    pub async fn record_settlement(&self, settlement: &Settlement) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO settlements (ticker, winning_side, pnl, settled_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&settlement.ticker)
        .bind(settlement.winning_side.as_str())
        .bind(settlement.pnl.to_string())
        .bind(settlement.settled_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All entries for a trade id, oldest first.
    pub async fn entries_for_trade(&self, trade_id: &str) -> Result<Vec<JournalEntry>> {
        let rows = sqlx::query("SELECT * FROM trade_journal WHERE trade_id = ? ORDER BY id")
            .bind(trade_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<JournalEntry> {
                Ok(JournalEntry {
                    trade_id: row.try_get("trade_id")?,
                    strategy: row.try_get("strategy")?,
                    ticker: row.try_get("ticker")?,
                    side: row.try_get::<String, _>("side")?.parse()?,
                    requested_contracts: row.try_get::<i64, _>("requested_contracts")? as u32,
                    price_cents: row.try_get::<i64, _>("price_cents")? as u32,
                    outcome: row.try_get("outcome")?,
                    order_id: row.try_get("order_id")?,
                    fill_count: row.try_get::<i64, _>("fill_count")? as u32,
                    cost: Decimal::from_str(&row.try_get::<String, _>("cost")?)?,
                    detail: row.try_get("detail")?,
                    trading_day: NaiveDate::from_str(&row.try_get::<String, _>("trading_day")?)?,
                    recorded_at: DateTime::parse_from_rfc3339(&row.try_get::<String, _>("recorded_at")?)?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }
}

#[async_trait]
impl ExecutionJournal for SqliteJournal {
    async fn record(&self, entry: &JournalEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_journal (
                trade_id, strategy, ticker, side, requested_contracts, price_cents,
                outcome, order_id, fill_count, cost, detail, trading_day, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.trade_id)
        .bind(&entry.strategy)
        .bind(&entry.ticker)
        .bind(entry.side.as_str())
        .bind(i64::from(entry.requested_contracts))
        .bind(i64::from(entry.price_cents))
        .bind(&entry.outcome)
        .bind(&entry.order_id)
        .bind(i64::from(entry.fill_count))
        .bind(entry.cost.to_string())
        .bind(&entry.detail)
        .bind(entry.trading_day.to_string())
        .bind(entry.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to insert journal entry")?;

        debug!(
            trade_id = %entry.trade_id,
            ticker = %entry.ticker,
            outcome = %entry.outcome,
            "Journal entry recorded"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
