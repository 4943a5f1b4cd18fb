//! Market scanners.
//!
//! Pulls open contracts for the configured series, scores each one with
//! the edge calculator, sizes the actionable ones against a running copy
//! of today's budget and groups the survivors into a single proposal per
//! scan. Nothing here places orders; proposals go to the approval
//! registry.

use anyhow::{Context, Result};
use chrono::{Datelike, FixedOffset, NaiveDate};
use futures::future::join_all;
use rust_decimal::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::engine::budget::{DailyBudgetTracker, DailyState};
use crate::platforms::{BalanceProvider, MarketDataProvider};
use crate::storage::journal::SqliteJournal;
use crate::strategy::calibration::{PriceZone, Venue};
use crate::strategy::edge::{EdgeCalculator, EdgeContext, EdgeSignal, EventType};
use crate::strategy::kelly::{PositionSizer, SizingBlock, SizingResult};
use crate::strategy::WeatherMarketType;
use crate::types::{cents_to_dollars, Clock, MarketSnapshot, Side, TradeLeg, TradeProposal};

pub const BRACKET_STRATEGY: &str = "spx_bracket";
pub const WEATHER_STRATEGY: &str = "weather";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// One weather series and the context it scores under.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSeries {
    pub series: String,
    pub city: String,
    pub market_type: WeatherMarketType,
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub bracket_series: Vec<String>,
    pub weather_series: Vec<WeatherSeries>,
    /// Most legs in one proposal.
    pub max_legs: usize,
    /// Brackets whose midpoint is nearer than this to the underlying are skipped.
    pub min_bracket_distance: f64,
    /// Highest NO price worth paying on a bracket.
    pub max_bracket_no_cents: u32,
    /// Highest YES price considered for weather contracts.
    pub max_weather_yes_cents: u32,
    /// Minimum volume for weather contracts outside the near-certain zone.
    pub min_weather_volume: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            bracket_series: vec!["KXINX".to_string()],
            weather_series: Vec::new(),
            max_legs: 5,
            min_bracket_distance: 50.0,
            max_bracket_no_cents: 92,
            max_weather_yes_cents: 70,
            min_weather_volume: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// A scored contract awaiting sizing.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub snapshot: MarketSnapshot,
    /// YES price the signal was computed at.
    pub yes_price: u32,
    pub signal: EdgeSignal,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

impl Candidate {
    /// Limit price of the side bought, from the live book when quoted.
    pub fn entry_price(&self, side: Side) -> u32 {
        let s = &self.snapshot;
        match side {
            Side::No if s.no_ask > 0 => s.no_ask,
            Side::No => 100u32.saturating_sub(if s.yes_bid > 0 { s.yes_bid } else { self.yes_price }),
            Side::Yes if s.yes_ask > 0 => s.yes_ask,
            Side::Yes => self.yes_price,
        }
    }
}

/// YES price a taker would see: the ask, or the bid when there is no ask.
pub fn quoted_yes_price(snapshot: &MarketSnapshot) -> u32 {
    if snapshot.yes_ask > 0 {
        snapshot.yes_ask
    } else {
        snapshot.yes_bid
    }
}

/// Event segment of a contract ticker, e.g. `KXINX-26FEB13H1600`.
fn event_of(ticker: &str) -> &str {
    ticker.rsplit_once('-').map(|(event, _)| event).unwrap_or(ticker)
}

/// Market-implied level of the underlying for each event: the midpoint of
/// the bracket with the highest YES price.
pub fn implied_underlying(snapshots: &[MarketSnapshot]) -> BTreeMap<String, f64> {
    let mut best: BTreeMap<String, (u32, f64)> = BTreeMap::new();
    for s in snapshots {
        let Some(mid) = s.bracket_midpoint() else { continue };
        let price = quoted_yes_price(s);
        let entry = best.entry(event_of(&s.ticker).to_string()).or_insert((price, mid));
        if price > entry.0 {
            *entry = (price, mid);
        }
    }
    best.into_iter().map(|(event, (_, mid))| (event, mid)).collect()
}

/// Weather contract type for a ticker within a series. Threshold tickers
/// (`-T`) keep the series' high/low direction.
pub fn weather_market_type(series_type: WeatherMarketType, ticker: &str) -> WeatherMarketType {
    if ticker.contains("-T") {
        match series_type {
            WeatherMarketType::LowBracket | WeatherMarketType::LowThreshold => WeatherMarketType::LowThreshold,
            _ => WeatherMarketType::HighThreshold,
        }
    } else {
        series_type
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct Scanner {
    markets: Arc<dyn MarketDataProvider>,
    balance: Arc<dyn BalanceProvider>,
    budget: Arc<DailyBudgetTracker>,
    journal: Arc<SqliteJournal>,
    calculator: EdgeCalculator,
    sizer: PositionSizer,
    config: ScanConfig,
    clock: Clock,
    offset: FixedOffset,
    /// Tickers already proposed today.
    alerted: Mutex<(NaiveDate, HashSet<String>)>,
}

impl Scanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        markets: Arc<dyn MarketDataProvider>,
        balance: Arc<dyn BalanceProvider>,
        budget: Arc<DailyBudgetTracker>,
        journal: Arc<SqliteJournal>,
        calculator: EdgeCalculator,
        sizer: PositionSizer,
        config: ScanConfig,
        clock: Clock,
        offset: FixedOffset,
    ) -> Self {
        let today = (clock)().with_timezone(&offset).date_naive();
        Self {
            markets,
            balance,
            budget,
            journal,
            calculator,
            sizer,
            config,
            clock,
            offset,
            alerted: Mutex::new((today, HashSet::new())),
        }
    }

    // -- Bracket scan --

    /// Score every open bracket in the configured index series.
    pub async fn scan_brackets(&self) -> Result<Option<TradeProposal>> {
        let fetches = self
            .config
            .bracket_series
            .iter()
            .map(|series| self.markets.fetch_markets(series));
        let mut snapshots = Vec::new();
        for (series, fetched) in self.config.bracket_series.iter().zip(join_all(fetches).await) {
            match fetched {
                Ok(mut batch) => snapshots.append(&mut batch),
                Err(e) => warn!(series = %series, error = %e, "Bracket fetch failed"),
            }
        }
        let candidates = self.bracket_candidates(&snapshots);
        info!(
            markets = snapshots.len(),
            candidates = candidates.len(),
            "Bracket scan scored"
        );
        self.propose(BRACKET_STRATEGY, candidates, self.config.max_bracket_no_cents)
            .await
    }

    /// Brackets with an actionable NO signal, best first.
    pub fn bracket_candidates(&self, snapshots: &[MarketSnapshot]) -> Vec<Candidate> {
        let underlying = implied_underlying(snapshots);
        let mut out = Vec::new();

        for s in snapshots.iter().filter(|s| s.ticker.contains("-B")) {
            let yes_price = quoted_yes_price(s);
            if yes_price == 0 {
                continue;
            }
            let Some(mid) = s.bracket_midpoint() else { continue };
            let level = underlying.get(event_of(&s.ticker)).copied();
            let distance = level.map(|u| (u - mid).abs());
            if distance.is_some_and(|d| d < self.config.min_bracket_distance) {
                continue;
            }

            let ctx = EdgeContext::Bracket {
                event_type: EventType::from_ticker(&s.ticker),
                distance_from_underlying: distance,
            };
            let signal = self.calculator.signal(yes_price, &ctx);
            if !signal.grade.is_actionable() || signal.edge <= 0.0 {
                continue;
            }

            let mut metadata = BTreeMap::new();
            if let (Some(lo), Some(hi)) = (s.floor_strike, s.cap_strike) {
                metadata.insert("bracket_low".into(), format!("{lo}"));
                metadata.insert("bracket_high".into(), format!("{hi}"));
            }
            if let Some(d) = distance {
                metadata.insert("distance".into(), format!("{d:.0}"));
            }
            if let Some(u) = level {
                metadata.insert("implied_underlying".into(), format!("{u:.2}"));
            }
            metadata.insert("grade".into(), signal.grade.to_string());
            metadata.insert("edge".into(), format!("{:.4}", signal.edge));
            metadata.insert("win_rate".into(), format!("{:.3}", signal.win_rate));

            let description = format!(
                "{} | {} | {:.1}% WR | Grade: {}",
                s.title,
                distance.map_or("distance n/a".to_string(), |d| format!("{d:.0}pts away")),
                signal.win_rate * 100.0,
                signal.grade,
            );
            out.push(Candidate { snapshot: s.clone(), yes_price, signal, description, metadata });
        }

        out.sort_by(|a, b| {
            a.signal
                .grade
                .cmp(&b.signal.grade)
                .then(b.signal.edge.total_cmp(&a.signal.edge))
        });
        out
    }

    // -- Weather scan --

    /// Score every open contract in the configured weather series.
    pub async fn scan_weather(&self) -> Result<Option<TradeProposal>> {
        let fetches = self
            .config
            .weather_series
            .iter()
            .map(|series| self.markets.fetch_markets(&series.series));
        let mut scored = Vec::new();
        let mut total = 0;
        for (series, fetched) in self.config.weather_series.iter().zip(join_all(fetches).await) {
            match fetched {
                Ok(snapshots) => {
                    total += snapshots.len();
                    scored.extend(self.weather_candidates(series, &snapshots));
                }
                Err(e) => warn!(series = %series.series, error = %e, "Weather fetch failed"),
            }
        }
        sort_weather(&mut scored);
        info!(markets = total, candidates = scored.len(), "Weather scan scored");
        self.propose(WEATHER_STRATEGY, scored, 99).await
    }

    /// Weather contracts with an actionable NO signal.
    pub fn weather_candidates(&self, series: &WeatherSeries, snapshots: &[MarketSnapshot]) -> Vec<Candidate> {
        let month = (self.clock)().with_timezone(&self.offset).month();
        let mut out = Vec::new();

        for s in snapshots {
            let yes_price = quoted_yes_price(s);
            if !(1..=self.config.max_weather_yes_cents).contains(&yes_price) {
                continue;
            }
            let far_out = Venue::Weather.zone(yes_price) == Some(PriceZone::NearCertain);
            if !far_out && s.volume < self.config.min_weather_volume {
                continue;
            }

            let market_type = weather_market_type(series.market_type, &s.ticker);
            let ctx = EdgeContext::Weather {
                city: series.city.clone(),
                month,
                market_type,
                forecast_probability: None,
            };
            let signal = self.calculator.signal(yes_price, &ctx);
            if signal.side.tradable() != Some(Side::No)
                || !signal.grade.is_actionable()
                || signal.edge <= 0.0
            {
                continue;
            }
            // Far-out prices below ~6¢ carry less edge than the sizer will ever take.
            if signal.edge < self.sizer.config().min_edge {
                debug!(ticker = %s.ticker, yes_price, edge = signal.edge, "Weather edge below sizing minimum");
                continue;
            }

            let mut metadata = BTreeMap::new();
            metadata.insert("city".into(), series.city.clone());
            metadata.insert("zone".into(), if far_out { "farout" } else { "sweet_spot" }.into());
            metadata.insert("grade".into(), signal.grade.to_string());
            metadata.insert("edge".into(), format!("{:.4}", signal.edge));
            metadata.insert("win_rate".into(), format!("{:.3}", signal.win_rate));

            let description = format!(
                "{} | {} NO | {} | {:.0}% edge | {:.0}% WR | Grade: {}",
                series.city,
                if far_out { "FAR-OUT" } else { "SWEET" },
                s.title,
                signal.edge * 100.0,
                signal.win_rate * 100.0,
                signal.grade,
            );
            out.push(Candidate { snapshot: s.clone(), yes_price, signal, description, metadata });
        }
        out
    }

    // -- Sizing --

    async fn propose(
        &self,
        strategy: &str,
        candidates: Vec<Candidate>,
        max_entry_cents: u32,
    ) -> Result<Option<TradeProposal>> {
        let fresh: Vec<Candidate> = {
            let today = self.budget.today();
            let mut alerted = self.alerted.lock().unwrap_or_else(|p| p.into_inner());
            if alerted.0 != today {
                *alerted = (today, HashSet::new());
            }
            candidates
                .into_iter()
                .filter(|c| !alerted.1.contains(&c.snapshot.ticker))
                .collect()
        };
        if fresh.is_empty() {
            debug!(strategy, "No new candidates");
            return Ok(None);
        }

        let balance = self.balance.balance().await.context("Balance fetch failed")?;
        let open_positions = self
            .journal
            .open_positions()
            .await
            .context("Open position lookup failed")?
            .len();

        let proposal = self.build_proposal(
            strategy,
            &fresh,
            balance,
            &self.budget.snapshot(),
            open_positions,
            max_entry_cents,
        );
        if let Some(p) = &proposal {
            let mut alerted = self.alerted.lock().unwrap_or_else(|p| p.into_inner());
            alerted.1.extend(p.legs.iter().map(|l| l.ticker.clone()));
        }
        Ok(proposal)
    }

    /// Size candidates in order against a running copy of today's budget so
    /// the batch as a whole respects the daily ceiling.
    pub fn build_proposal(
        &self,
        strategy: &str,
        candidates: &[Candidate],
        balance: Decimal,
        daily: &DailyState,
        open_positions: usize,
        max_entry_cents: u32,
    ) -> Option<TradeProposal> {
        let mut batch = daily.clone();
        let mut legs: Vec<TradeLeg> = Vec::new();

        for c in candidates {
            if legs.len() >= self.config.max_legs {
                break;
            }
            let ticker = &c.snapshot.ticker;
            if batch.is_claimed(ticker) {
                debug!(ticker = %ticker, "Already traded today");
                continue;
            }
            let Some(mut prediction) = c.signal.to_prediction(ticker, strategy, c.yes_price) else {
                continue;
            };

            let size = match self.sizer.size(&prediction, balance, &batch, open_positions + legs.len()) {
                Ok(SizingResult::Sized(size)) => size,
                Ok(SizingResult::Blocked(block)) => {
                    debug!(ticker = %ticker, gate = block.gate(), reason = %block, "Sizing blocked");
                    if matches!(
                        block,
                        SizingBlock::BalanceBelowFloor { .. }
                            | SizingBlock::DailyBudgetExhausted { .. }
                            | SizingBlock::MaxOpenPositions { .. }
                    ) {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    warn!(ticker = %ticker, error = %e, "Invalid sizing input");
                    continue;
                }
            };

            // Re-fit the sized amount to the live entry price.
            let price_cents = c.entry_price(prediction.side);
            if price_cents == 0 || price_cents > max_entry_cents {
                debug!(ticker = %ticker, price_cents, "Entry price out of range");
                continue;
            }
            let contracts = (size.cost / cents_to_dollars(price_cents)).floor().to_u32().unwrap_or(0);
            if contracts < self.sizer.config().min_contracts {
                continue;
            }

            let leg = TradeLeg {
                ticker: ticker.clone(),
                side: prediction.side,
                contracts,
                price_cents,
                description: c.description.clone(),
                metadata: c.metadata.clone(),
            };
            prediction.apply_sizing(size.kelly_fraction, contracts, leg.cost());
            debug!(prediction = %prediction, contracts, cost = format!("${:.2}", leg.cost()), "Leg sized");

            batch.reserved_total += leg.cost();
            batch.in_flight_tickers.insert(ticker.clone());
            legs.push(leg);
        }

        if legs.is_empty() {
            info!(strategy, "No viable trades this scan");
            return None;
        }

        let total: Decimal = legs.iter().map(TradeLeg::cost).sum();
        let summary = format!(
            "{} | {} legs | ${:.2} total | ${:.2} left today",
            strategy,
            legs.len(),
            total,
            batch.remaining(self.sizer.config().daily_budget),
        );
        info!(strategy, legs = legs.len(), cost = format!("${:.2}", total), "Proposal built");
        Some(TradeProposal { strategy: strategy.to_string(), summary, legs })
    }
}

/// Far-out NO first, then by grade, then by edge.
fn sort_weather(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        let far = |c: &Candidate| c.signal.zone != Some(PriceZone::NearCertain);
        far(a)
            .cmp(&far(b))
            .then(a.signal.grade.cmp(&b.signal.grade))
            .then(b.signal.edge.total_cmp(&a.signal.edge))
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
