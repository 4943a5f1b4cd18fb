//! Historical calibration tables.
//!
//! Immutable win-rate / ROI reference data keyed by YES-price bucket,
//! built from settled Kalshi markets. All price ranges are half-open
//! `[lo, hi)` in cents, lower bound inclusive.

use std::fmt;

// ---------------------------------------------------------------------------
// Zones and buckets
// ---------------------------------------------------------------------------

/// Coarse price zone a bucket belongs to. Drives which blend the
/// edge calculator applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceZone {
    /// Opposing side historically wins >99% with a large sample.
    NearCertain,
    /// Profit per contract too small to be worth the capital lock-up.
    ThinProfit,
    LowPrice,
    SweetSpot,
    MidRange,
    /// Opposing side historically loses money despite a favorable-looking win rate.
    Danger,
}

impl fmt::Display for PriceZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriceZone::NearCertain => "near-certain",
            PriceZone::ThinProfit => "thin-profit",
            PriceZone::LowPrice => "low-price",
            PriceZone::SweetSpot => "sweet-spot",
            PriceZone::MidRange => "mid-range",
            PriceZone::Danger => "danger",
        };
        write!(f, "{s}")
    }
}

/// One row of a calibration table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationBucket {
    pub lo_cents: u32,
    pub hi_cents: u32,
    pub zone: PriceZone,
    /// Historical win rate of buying NO at this YES price.
    pub no_win_rate: f64,
    /// Historical ROI of buying NO at this YES price.
    pub roi: f64,
    pub sample_size: u32,
}

impl CalibrationBucket {
    pub fn contains(&self, price_cents: u32) -> bool {
        self.lo_cents <= price_cents && price_cents < self.hi_cents
    }

    /// Historical YES settlement rate.
    pub fn yes_rate(&self) -> f64 {
        1.0 - self.no_win_rate
    }
}

/// A contiguous half-open zone without per-bucket statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneRange {
    pub lo_cents: u32,
    pub hi_cents: u32,
    pub zone: PriceZone,
}

impl ZoneRange {
    pub fn contains(&self, price_cents: u32) -> bool {
        self.lo_cents <= price_cents && price_cents < self.hi_cents
    }
}

const fn bucket(
    lo_cents: u32,
    hi_cents: u32,
    zone: PriceZone,
    no_win_rate: f64,
    roi: f64,
    sample_size: u32,
) -> CalibrationBucket {
    CalibrationBucket { lo_cents, hi_cents, zone, no_win_rate, roi, sample_size }
}

const fn zone(lo_cents: u32, hi_cents: u32, zone: PriceZone) -> ZoneRange {
    ZoneRange { lo_cents, hi_cents, zone }
}

/// Which calibration dataset applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Venue {
    SpxBracket,
    Weather,
}

impl Venue {
    pub fn table(&self) -> &'static [CalibrationBucket] {
        match self {
            Venue::SpxBracket => SPX_BRACKET_TABLE,
            Venue::Weather => WEATHER_TABLE,
        }
    }

    pub fn zones(&self) -> &'static [ZoneRange] {
        match self {
            Venue::SpxBracket => SPX_BRACKET_ZONES,
            Venue::Weather => WEATHER_ZONES,
        }
    }

    /// Bucket for a price, falling back to `None` for prices with no history.
    pub fn bucket(&self, price_cents: u32) -> Option<&'static CalibrationBucket> {
        lookup(self.table(), price_cents)
    }

    pub fn zone(&self, price_cents: u32) -> Option<PriceZone> {
        zone_for(self.zones(), price_cents)
    }
}

/// Find the bucket containing `price_cents`.
pub fn lookup(table: &[CalibrationBucket], price_cents: u32) -> Option<&CalibrationBucket> {
    table.iter().find(|b| b.contains(price_cents))
}

/// Find the zone containing `price_cents`.
pub fn zone_for(zones: &[ZoneRange], price_cents: u32) -> Option<PriceZone> {
    zones.iter().find(|z| z.contains(price_cents)).map(|z| z.zone)
}

// ---------------------------------------------------------------------------
// S&P 500 brackets (10,000 settled INX markets)
// ---------------------------------------------------------------------------

/// SPX bracket buckets. SPX lands inside any given 25-point bracket only
/// ~5.9% of the time, so YES is systematically overpriced.
pub static SPX_BRACKET_TABLE: &[CalibrationBucket] = &[
    bucket(5, 10, PriceZone::LowPrice, 0.965, 0.021, 412),
    bucket(10, 20, PriceZone::SweetSpot, 0.953, 0.097, 289),
    bucket(20, 30, PriceZone::SweetSpot, 0.947, 0.209, 185),
    bucket(30, 40, PriceZone::SweetSpot, 0.944, 0.344, 112),
    bucket(40, 50, PriceZone::SweetSpot, 0.937, 0.380, 78),
    bucket(50, 60, PriceZone::MidRange, 0.929, 0.302, 56),
    bucket(60, 70, PriceZone::MidRange, 0.905, 0.148, 42),
    bucket(70, 80, PriceZone::Danger, 0.820, -0.040, 28),
    bucket(80, 90, PriceZone::Danger, 0.550, -0.220, 15),
];

/// SPX zones covering every tradable price, including those without buckets.
pub static SPX_BRACKET_ZONES: &[ZoneRange] = &[
    zone(1, 5, PriceZone::ThinProfit),
    zone(5, 10, PriceZone::LowPrice),
    zone(10, 50, PriceZone::SweetSpot),
    zone(50, 70, PriceZone::MidRange),
    zone(70, 100, PriceZone::Danger),
];

/// NO win rate by event cadence: (win_rate, roi, trades).
pub fn spx_event_edge(hourly: bool) -> (f64, f64, u32) {
    if hourly {
        (0.955, 0.177, 3200)
    } else {
        (0.941, 0.159, 6800)
    }
}

/// Distance (index points) from the underlying to the bracket midpoint → win-rate factor.
static SPX_DISTANCE_FACTORS: &[(f64, f64, f64)] = &[
    (0.0, 25.0, 0.60),
    (25.0, 50.0, 0.80),
    (50.0, 75.0, 0.95),
    (75.0, 100.0, 1.00),
    (100.0, 150.0, 1.05),
    (150.0, 250.0, 1.02),
    (250.0, 500.0, 0.90),
];

/// Distance adjustment. Unknown or zero distance is neutral.
pub fn spx_distance_factor(distance: Option<f64>) -> f64 {
    let Some(d) = distance.filter(|d| *d > 0.0) else {
        return 1.0;
    };
    SPX_DISTANCE_FACTORS
        .iter()
        .find(|(lo, hi, _)| *lo <= d && d < *hi)
        .map(|(_, _, f)| *f)
        .unwrap_or(1.0)
}

// ---------------------------------------------------------------------------
// Weather (16,347 settled weather markets)
// ---------------------------------------------------------------------------

/// Weather buckets. Far-out YES prices almost never settle YES.
pub static WEATHER_TABLE: &[CalibrationBucket] = &[
    bucket(1, 5, PriceZone::NearCertain, 1.000, 0.031, 11_842),
    bucket(5, 10, PriceZone::NearCertain, 0.999, 0.074, 2_614),
    bucket(10, 15, PriceZone::NearCertain, 0.995, 0.131, 1_102),
    bucket(15, 25, PriceZone::SweetSpot, 0.907, 0.134, 211),
    bucket(25, 35, PriceZone::SweetSpot, 0.820, 0.171, 164),
    bucket(35, 45, PriceZone::SweetSpot, 0.840, 0.400, 142),
    bucket(45, 55, PriceZone::SweetSpot, 0.682, 0.364, 97),
    bucket(55, 65, PriceZone::SweetSpot, 0.889, 1.222, 63),
    bucket(65, 75, PriceZone::SweetSpot, 0.500, 0.667, 41),
    bucket(75, 85, PriceZone::Danger, 0.200, -0.000, 38),
    bucket(85, 95, PriceZone::Danger, 0.000, -1.000, 31),
];

pub static WEATHER_ZONES: &[ZoneRange] = &[
    zone(1, 15, PriceZone::NearCertain),
    zone(15, 71, PriceZone::SweetSpot),
    zone(71, 100, PriceZone::Danger),
];

/// Historical NO performance for one context (city, month or contract type).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextEdge {
    pub win_rate: f64,
    pub roi: f64,
    pub trades: u32,
}

const DEFAULT_CONTEXT: ContextEdge = ContextEdge { win_rate: 0.80, roi: 0.10, trades: 5 };

/// Per-city NO edge (YES priced 15–70¢): (city, stats, strong_grade).
static CITY_NO_EDGE: &[(&str, ContextEdge, bool)] = &[
    ("LAX", ContextEdge { win_rate: 1.000, roi: 0.531, trades: 9 }, true),
    ("SEA", ContextEdge { win_rate: 1.000, roi: 0.724, trades: 3 }, true),
    ("AUS", ContextEdge { win_rate: 1.000, roi: 0.330, trades: 6 }, true),
    ("DEN", ContextEdge { win_rate: 0.889, roi: 0.341, trades: 18 }, true),
    ("PHI", ContextEdge { win_rate: 0.900, roi: 0.280, trades: 30 }, true),
    ("CHI", ContextEdge { win_rate: 0.889, roi: 0.208, trades: 27 }, true),
    ("MIA", ContextEdge { win_rate: 0.833, roi: 0.153, trades: 18 }, true),
    ("SFO", ContextEdge { win_rate: 1.000, roi: 0.724, trades: 3 }, true),
    ("NYC", ContextEdge { win_rate: 0.714, roi: -0.015, trades: 14 }, false),
    ("HOU", ContextEdge { win_rate: 0.800, roi: 0.150, trades: 5 }, true),
];

/// City statistics plus a reliability score in [0, 1].
pub fn city_edge(city: &str) -> (ContextEdge, f64) {
    let upper = city.to_uppercase();
    match CITY_NO_EDGE.iter().find(|(c, _, _)| *c == upper) {
        Some((_, stats, true)) => (*stats, 1.0),
        Some((_, stats, false)) => (*stats, 0.5),
        None => (DEFAULT_CONTEXT, 0.7),
    }
}

/// Month-of-year NO edge, January = 1.
static MONTH_NO_EDGE: [ContextEdge; 12] = [
    ContextEdge { win_rate: 0.872, roi: 0.308, trades: 47 },
    ContextEdge { win_rate: 0.737, roi: -0.051, trades: 19 },
    ContextEdge { win_rate: 1.000, roi: 0.280, trades: 10 },
    ContextEdge { win_rate: 0.800, roi: 0.150, trades: 5 },
    ContextEdge { win_rate: 0.800, roi: 0.150, trades: 3 },
    ContextEdge { win_rate: 0.800, roi: 0.150, trades: 3 },
    ContextEdge { win_rate: 0.800, roi: 0.150, trades: 3 },
    ContextEdge { win_rate: 0.800, roi: 0.150, trades: 3 },
    ContextEdge { win_rate: 0.636, roi: -0.106, trades: 22 },
    ContextEdge { win_rate: 0.500, roi: -0.238, trades: 16 },
    ContextEdge { win_rate: 0.750, roi: 0.100, trades: 4 },
    ContextEdge { win_rate: 0.940, roi: 0.337, trades: 50 },
];

/// Month statistics plus a reliability score in [0, 1].
pub fn month_edge(month: u32) -> (ContextEdge, f64) {
    let stats = month
        .checked_sub(1)
        .and_then(|i| MONTH_NO_EDGE.get(i as usize))
        .copied()
        .unwrap_or(DEFAULT_CONTEXT);
    let reliability = if stats.roi > 0.15 {
        1.0
    } else if stats.roi > 0.0 {
        0.7
    } else {
        0.4
    };
    (stats, reliability)
}

/// Weather contract shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeatherMarketType {
    LowBracket,
    HighBracket,
    LowThreshold,
    HighThreshold,
    MultiCity,
}

impl WeatherMarketType {
    pub fn edge(&self) -> ContextEdge {
        match self {
            WeatherMarketType::LowBracket => ContextEdge { win_rate: 0.908, roi: 0.347, trades: 65 },
            WeatherMarketType::HighBracket => ContextEdge { win_rate: 0.867, roi: 0.265, trades: 15 },
            WeatherMarketType::LowThreshold => ContextEdge { win_rate: 0.875, roi: 0.225, trades: 16 },
            WeatherMarketType::HighThreshold => ContextEdge { win_rate: 1.000, roi: 0.266, trades: 4 },
            WeatherMarketType::MultiCity => ContextEdge { win_rate: 0.821, roi: 0.058, trades: 28 },
        }
    }
}

impl std::str::FromStr for WeatherMarketType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LOW_BRACKET" => Ok(WeatherMarketType::LowBracket),
            "HIGH_BRACKET" => Ok(WeatherMarketType::HighBracket),
            "LOW_THRESHOLD" => Ok(WeatherMarketType::LowThreshold),
            "HIGH_THRESHOLD" => Ok(WeatherMarketType::HighThreshold),
            "MULTI_CITY" => Ok(WeatherMarketType::MultiCity),
            _ => Err(anyhow::anyhow!("Unknown weather market type: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
