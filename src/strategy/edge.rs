//! Calibrated edge signals.
//!
//! Scores a contract price against historical calibration data and
//! produces a directional signal: which side to buy, the edge over
//! breakeven, a confidence score, a signal-level Kelly estimate and a
//! letter grade. Every function here is pure.

use tracing::trace;

use super::calibration::{self, PriceZone, Venue, WeatherMarketType};
use crate::types::{Grade, Prediction, SignalSide};
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Fraction of full Kelly reported on the signal.
    pub signal_kelly_multiplier: f64,
    /// Upper bound on any blended win rate.
    pub max_win_rate: f64,
    /// Minimum bucket sample before the near-certain grade override applies.
    pub near_certain_min_samples: u32,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            signal_kelly_multiplier: 0.40,
            max_win_rate: 0.97,
            near_certain_min_samples: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Cadence of an index bracket event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Hourly,
    Daily,
}

impl EventType {
    /// Infer cadence from a Kalshi event ticker, e.g. `KXINX-26FEB13H1600`.
    pub fn from_ticker(ticker: &str) -> Self {
        let event = ticker.split('-').nth(1).unwrap_or_default();
        if event.contains('H') && event.chars().last().is_some_and(|c| c.is_ascii_digit()) {
            EventType::Hourly
        } else {
            EventType::Daily
        }
    }

    fn reliability(&self) -> f64 {
        match self {
            EventType::Hourly => 1.0,
            EventType::Daily => 0.9,
        }
    }
}

/// Venue-specific context for one contract.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeContext {
    Bracket {
        event_type: EventType,
        /// Index points between the underlying and the bracket midpoint.
        distance_from_underlying: Option<f64>,
    },
    Weather {
        city: String,
        /// Calendar month, 1–12.
        month: u32,
        market_type: WeatherMarketType,
        /// Live forecast probability that YES settles, when available.
        forecast_probability: Option<f64>,
    },
}

impl EdgeContext {
    pub fn venue(&self) -> Venue {
        match self {
            EdgeContext::Bracket { .. } => Venue::SpxBracket,
            EdgeContext::Weather { .. } => Venue::Weather,
        }
    }
}

/// Directional signal for one contract price.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSignal {
    pub side: SignalSide,
    /// Win rate minus breakeven for the chosen side. Signed.
    pub edge: f64,
    pub win_rate: f64,
    pub confidence: f64,
    pub kelly_pct: f64,
    pub grade: Grade,
    pub zone: Option<PriceZone>,
    pub sample_size: u32,
    pub reason: String,
}

impl EdgeSignal {
    fn skip(zone: Option<PriceZone>, reason: impl Into<String>) -> Self {
        Self {
            side: SignalSide::Skip,
            edge: 0.0,
            win_rate: 0.0,
            confidence: 0.0,
            kelly_pct: 0.0,
            grade: Grade::F,
            zone,
            sample_size: 0,
            reason: reason.into(),
        }
    }

    /// Degenerate signal for a price with no two-sided market.
    pub fn no_liquidity() -> Self {
        Self::skip(None, "No liquidity")
    }

    /// Build a sizing candidate. `Skip` signals produce nothing.
    pub fn to_prediction(&self, ticker: &str, strategy: &str, price_cents: u32) -> Option<Prediction> {
        let side = self.side.tradable()?;
        Some(Prediction {
            ticker: ticker.to_string(),
            strategy: strategy.to_string(),
            side,
            market_price: f64::from(price_cents) / 100.0,
            calibrated_probability: self.win_rate,
            edge: self.edge,
            confidence_score: self.confidence,
            kelly_fraction: 0.0,
            recommended_contracts: 0,
            recommended_cost: Decimal::ZERO,
        })
    }
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

/// Pre-rounding components shared by both venues.
struct RawSignal {
    zone: PriceZone,
    win_rate: f64,
    edge: f64,
    confidence: f64,
    sample_size: u32,
    reason: String,
}

pub struct EdgeCalculator {
    config: EdgeConfig,
}

impl EdgeCalculator {
    pub fn new(config: EdgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// Score a YES price (cents) in the given context.
    pub fn signal(&self, price_cents: u32, ctx: &EdgeContext) -> EdgeSignal {
        if price_cents == 0 || price_cents >= 100 {
            return EdgeSignal::no_liquidity();
        }

        let venue = ctx.venue();
        let Some(zone) = venue.zone(price_cents) else {
            return EdgeSignal::no_liquidity();
        };

        let raw = match ctx {
            EdgeContext::Bracket { event_type, distance_from_underlying } => {
                match zone {
                    PriceZone::ThinProfit => {
                        return EdgeSignal {
                            side: SignalSide::No,
                            edge: 0.001,
                            win_rate: 0.99,
                            confidence: 0.3,
                            kelly_pct: 0.0,
                            grade: Grade::F,
                            zone: Some(zone),
                            sample_size: 0,
                            reason: "YES priced too low, profit not worth the capital lock-up".into(),
                        };
                    }
                    PriceZone::Danger => {
                        return EdgeSignal::skip(Some(zone), "YES priced too high, NO too expensive");
                    }
                    _ => {}
                }
                match self.bracket(price_cents, zone, *event_type, *distance_from_underlying) {
                    Some(raw) => raw,
                    None => return EdgeSignal::skip(Some(zone), "No calibration data"),
                }
            }
            EdgeContext::Weather { city, month, market_type, forecast_probability } => {
                if zone == PriceZone::Danger {
                    return EdgeSignal::skip(Some(zone), "YES in danger zone, NO has thin or negative EV");
                }
                match self.weather(price_cents, zone, city, *month, *market_type, *forecast_probability) {
                    Some(raw) => raw,
                    None => return EdgeSignal::skip(Some(zone), "No calibration data"),
                }
            }
        };

        self.finish(price_cents, venue, raw)
    }

    fn bracket(
        &self,
        price_cents: u32,
        zone: PriceZone,
        event_type: EventType,
        distance: Option<f64>,
    ) -> Option<RawSignal> {
        let bucket = Venue::SpxBracket.bucket(price_cents)?;
        let distance_factor = calibration::spx_distance_factor(distance);
        let (event_wr, _, _) = calibration::spx_event_edge(event_type == EventType::Hourly);
        let cost = no_cost(price_cents);

        let blended = match zone {
            PriceZone::SweetSpot => bucket.no_win_rate * 0.75 + event_wr * 0.25,
            _ => bucket.no_win_rate,
        };
        let win_rate = (blended * distance_factor).min(self.config.max_win_rate);
        let edge = win_rate - cost;

        let confidence = 0.35 * (edge.abs() / 0.15).min(1.0)
            + 0.25 * (f64::from(bucket.sample_size) / 100.0).min(1.0)
            + 0.20 * distance_factor
            + 0.20 * event_type.reliability();

        Some(RawSignal {
            zone,
            win_rate,
            edge,
            confidence,
            sample_size: bucket.sample_size,
            reason: format!(
                "SPX bracket NO ({zone}): {:.1}% WR vs {:.0}% breakeven | {:+.1}% hist ROI | {} trades",
                win_rate * 100.0,
                cost * 100.0,
                bucket.roi * 100.0,
                bucket.sample_size,
            ),
        })
    }

    fn weather(
        &self,
        price_cents: u32,
        zone: PriceZone,
        city: &str,
        month: u32,
        market_type: WeatherMarketType,
        forecast: Option<f64>,
    ) -> Option<RawSignal> {
        let cost = no_cost(price_cents);
        let (city_stats, city_rel) = calibration::city_edge(city);
        let (month_stats, month_rel) = calibration::month_edge(month);
        let type_stats = market_type.edge();
        let min_trades = city_stats.trades.min(month_stats.trades).min(type_stats.trades);

        let (win_rate, edge, sample_size, reason) = match zone {
            PriceZone::NearCertain => {
                let bucket = Venue::Weather.bucket(price_cents)?;
                let win_rate = 1.0 - bucket.yes_rate();
                (
                    win_rate,
                    win_rate - cost,
                    bucket.sample_size,
                    format!(
                        "Far-out weather NO: {:.1}% WR | profit {price_cents}¢/contract | n={}",
                        win_rate * 100.0,
                        bucket.sample_size,
                    ),
                )
            }
            _ => {
                let win_rate = 0.40 * city_stats.win_rate
                    + 0.30 * month_stats.win_rate
                    + 0.30 * type_stats.win_rate;
                let mut edge = win_rate - cost;
                let reason = match forecast {
                    Some(p) if p > 0.70 => {
                        edge *= 0.5;
                        "Historical says NO but forecast leans YES, edge halved".to_string()
                    }
                    Some(p) if p < 0.30 => {
                        edge *= 1.2;
                        "Historical and forecast both say NO".to_string()
                    }
                    _ => format!(
                        "Sweet spot NO: {} {:.0}% WR vs {:.0}% breakeven",
                        city.to_uppercase(),
                        win_rate * 100.0,
                        cost * 100.0,
                    ),
                };
                (win_rate, edge, min_trades, reason)
            }
        };

        let confidence = 0.35 * (edge.abs() / 0.20).min(1.0)
            + 0.25 * city_rel
            + 0.20 * month_rel
            + 0.20 * (f64::from(min_trades) / 15.0).min(1.0);

        Some(RawSignal { zone, win_rate, edge, confidence, sample_size, reason })
    }

    /// Kelly estimate, grade and rounding. Both venues buy NO.
    fn finish(&self, price_cents: u32, venue: Venue, raw: RawSignal) -> EdgeSignal {
        let confidence = round_to(raw.confidence.clamp(0.0, 1.0), 3);
        let cost = no_cost(price_cents);
        let payout_ratio = (1.0 - cost) / cost;

        let kelly_pct = if raw.edge > 0.0 && payout_ratio > 0.0 {
            let full = (raw.win_rate * (1.0 + payout_ratio) - 1.0) / payout_ratio;
            (full * self.config.signal_kelly_multiplier).max(0.0)
        } else {
            0.0
        };

        let grade = self.grade(venue, &raw, confidence);

        trace!(
            price_cents,
            zone = %raw.zone,
            edge = format!("{:+.4}", raw.edge),
            confidence,
            grade = %grade,
            "Edge signal"
        );

        EdgeSignal {
            side: SignalSide::No,
            edge: round_to(raw.edge, 4),
            win_rate: round_to(raw.win_rate, 3),
            confidence,
            kelly_pct: round_to(kelly_pct, 4),
            grade,
            zone: Some(raw.zone),
            sample_size: raw.sample_size,
            reason: raw.reason,
        }
    }

    fn grade(&self, venue: Venue, raw: &RawSignal, confidence: f64) -> Grade {
        // Near-certain contracts are graded on win rate, not edge magnitude.
        if raw.zone == PriceZone::NearCertain
            && raw.win_rate >= 0.99
            && raw.sample_size >= self.config.near_certain_min_samples
        {
            return if raw.edge > 0.005 { Grade::A } else { Grade::B };
        }

        let thresholds: [(f64, f64, Grade); 3] = match venue {
            Venue::SpxBracket => [(0.10, 0.7, Grade::APlus), (0.06, 0.6, Grade::A), (0.03, 0.5, Grade::B)],
            Venue::Weather => [(0.15, 0.7, Grade::APlus), (0.10, 0.6, Grade::A), (0.05, 0.5, Grade::B)],
        };
        thresholds
            .iter()
            .find(|(edge, conf, _)| raw.edge > *edge && confidence > *conf)
            .map(|(_, _, grade)| *grade)
            .unwrap_or(if raw.edge > 0.0 { Grade::C } else { Grade::F })
    }
}

fn no_cost(price_cents: u32) -> f64 {
    f64::from(100 - price_cents) / 100.0
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
