//! Kalshi public market data.
//!
//! Read-only: lists open markets in a series through the unauthenticated
//! `GET /markets` endpoint, following the pagination cursor.
//!
//! API docs: https://trading-api.readme.io/reference/getmarkets
//! Prices are integer cents (1–99).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::MarketDataProvider;
use crate::types::{EdgegateError, MarketSnapshot, Side};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const PLATFORM_NAME: &str = "kalshi";

/// Markets per page (API max is 1000).
const PAGE_LIMIT: u32 = 200;

/// Stop following cursors after this many pages.
const MAX_PAGES: usize = 25;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MarketsPage {
    #[serde(default)]
    markets: Vec<KalshiMarket>,
    #[serde(default)]
    cursor: Option<String>,
}

/// Only the fields we need from the `Market` object.
#[derive(Debug, Deserialize)]
struct KalshiMarket {
    ticker: String,
    #[serde(default)]
    event_ticker: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    yes_bid: u32,
    #[serde(default)]
    yes_ask: u32,
    #[serde(default)]
    no_bid: u32,
    #[serde(default)]
    no_ask: u32,
    #[serde(default)]
    volume: u64,
    #[serde(default)]
    close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    floor_strike: Option<f64>,
    #[serde(default)]
    cap_strike: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MarketEnvelope {
    market: MarketResult,
}

#[derive(Debug, Deserialize)]
struct MarketResult {
    #[serde(default)]
    status: String,
    #[serde(default)]
    result: String,
}

impl MarketResult {
    /// Only finalized markets with a yes/no result count as settled.
    fn winning_side(&self) -> Option<Side> {
        match self.status.as_str() {
            "settled" | "finalized" | "determined" => self.result.parse().ok(),
            _ => None,
        }
    }
}

impl KalshiMarket {
    fn into_snapshot(self, series: &str) -> MarketSnapshot {
        MarketSnapshot {
            ticker: self.ticker,
            series: series.to_string(),
            title: if self.title.is_empty() { self.event_ticker } else { self.title },
            yes_bid: self.yes_bid,
            yes_ask: self.yes_ask,
            no_bid: self.no_bid,
            no_ask: self.no_ask,
            volume: self.volume,
            close_time: self.close_time,
            floor_strike: self.floor_strike,
            cap_strike: self.cap_strike,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct KalshiMarketData {
    http: Client,
    base_url: String,
}

impl KalshiMarketData {
    /// `base_url` is the API root, e.g. `https://api.elections.kalshi.com/trade-api/v2`.
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("EDGEGATE/0.1.0")
            .build()
            .context("Failed to build HTTP client for Kalshi")?;

        Ok(Self {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_page(&self, series: &str, cursor: Option<&str>) -> Result<MarketsPage> {
        let url = format!("{}/markets", self.base_url);
        let limit = PAGE_LIMIT.to_string();
        let mut req = self
            .http
            .get(&url)
            .query(&[("series_ticker", series), ("status", "open"), ("limit", limit.as_str())]);
        if let Some(c) = cursor {
            req = req.query(&[("cursor", c)]);
        }

        let resp = req.send().await.context("Kalshi markets request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EdgegateError::Platform {
                platform: PLATFORM_NAME.into(),
                message: format!("{status}: {body}"),
            }
            .into());
        }

        resp.json()
            .await
            .context("Failed to parse Kalshi markets response")
    }

    async fn fetch_market(&self, ticker: &str) -> Result<MarketResult> {
        let url = format!("{}/markets/{}", self.base_url, ticker);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Kalshi market request failed for {ticker}"))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EdgegateError::Platform {
                platform: PLATFORM_NAME.into(),
                message: format!("{status}: {body}"),
            }
            .into());
        }
        let envelope: MarketEnvelope = resp
            .json()
            .await
            .context("Failed to parse Kalshi market response")?;
        Ok(envelope.market)
    }
}

#[async_trait]
impl MarketDataProvider for KalshiMarketData {
    async fn fetch_markets(&self, series: &str) -> Result<Vec<MarketSnapshot>> {
        let mut snapshots = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self.fetch_page(series, cursor.as_deref()).await?;
            let count = page.markets.len();
            snapshots.extend(page.markets.into_iter().map(|m| m.into_snapshot(series)));
            debug!(series, count, total = snapshots.len(), "Fetched Kalshi page");

            match page.cursor {
                Some(c) if !c.is_empty() && count > 0 => cursor = Some(c),
                _ => break,
            }
        }

        info!(
            platform = PLATFORM_NAME,
            series,
            markets = snapshots.len(),
            "Market scan complete"
        );
        Ok(snapshots)
    }

    async fn market_result(&self, ticker: &str) -> Result<Option<Side>> {
        let market = self.fetch_market(ticker).await?;
        debug!(ticker, status = %market.status, result = %market.result, "Market status");
        Ok(market.winning_side())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
