//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (bot tokens) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::budget::BudgetLimits;
use crate::engine::executor::ExecutionConfig;
use crate::engine::scanner::{ScanConfig, WeatherSeries};
use crate::strategy::edge::EdgeConfig;
use crate::strategy::kelly::{KellyTier, SizingConfig};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub risk: RiskConfig,
    pub sizing: SizingSection,
    pub approvals: ApprovalsConfig,
    pub execution: ExecutionSection,
    pub storage: StorageConfig,
    pub markets: MarketsConfig,
    pub alerts: AlertsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Starting balance for the paper exchange.
    pub paper_balance: Decimal,
    /// UTC offset (minutes) of the trading-day boundary, e.g. -300 for US Eastern standard time.
    pub day_utc_offset_minutes: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    pub max_trade_cap: Decimal,
    pub daily_budget: Decimal,
    pub balance_floor: Decimal,
    pub min_edge: f64,
    pub max_open_positions: usize,
    pub max_trades_per_day: u32,
    pub max_daily_loss: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SizingSection {
    pub max_kelly_fraction: f64,
    pub min_contracts: u32,
    /// Multiplier applied to the signal-level Kelly estimate.
    pub signal_kelly_multiplier: f64,
    pub kelly_tiers: Vec<KellyTier>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApprovalsConfig {
    pub expiry_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionSection {
    pub order_timeout_secs: u64,
    pub resting_recheck_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub state_file: String,
    pub journal_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketsConfig {
    pub kalshi_base_url: String,
    pub bracket_series: Vec<String>,
    pub bracket_scan_interval_secs: u64,
    #[serde(default)]
    pub weather_series: Vec<WeatherSeriesConfig>,
    pub weather_scan_interval_secs: u64,
    /// How often open positions are checked for settlement.
    #[serde(default = "default_settlement_interval")]
    pub settlement_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeatherSeriesConfig {
    pub series: String,
    pub city: String,
    pub market_type: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
    #[serde(default = "default_poll_timeout")]
    pub telegram_poll_timeout_secs: u64,
}

fn default_poll_timeout() -> u64 {
    25
}

fn default_settlement_interval() -> u64 {
    600
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(contents).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make the safety gates meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.risk.max_trade_cap <= Decimal::ZERO {
            bail!("risk.max_trade_cap must be positive");
        }
        if self.risk.daily_budget <= Decimal::ZERO {
            bail!("risk.daily_budget must be positive");
        }
        if self.risk.balance_floor < Decimal::ZERO {
            bail!("risk.balance_floor must not be negative");
        }
        if !(0.0..1.0).contains(&self.risk.min_edge) {
            bail!("risk.min_edge must be in [0, 1)");
        }
        if !(self.sizing.max_kelly_fraction > 0.0 && self.sizing.max_kelly_fraction <= 1.0) {
            bail!("sizing.max_kelly_fraction must be in (0, 1]");
        }
        if self.sizing.min_contracts == 0 {
            bail!("sizing.min_contracts must be at least 1");
        }
        self.sizing_config().validate_tiers()?;
        if self.approvals.expiry_secs == 0 {
            bail!("approvals.expiry_secs must be positive");
        }
        if self.execution.order_timeout_secs == 0 {
            bail!("execution.order_timeout_secs must be positive");
        }
        self.scan_config()?;
        if self.day_offset().is_none() {
            bail!(
                "agent.day_utc_offset_minutes out of range: {}",
                self.agent.day_utc_offset_minutes
            );
        }
        Ok(())
    }

    /// Fixed offset used to key the trading day.
    pub fn day_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.agent.day_utc_offset_minutes * 60)
    }

    pub fn sizing_config(&self) -> SizingConfig {
        SizingConfig {
            balance_floor: self.risk.balance_floor,
            daily_budget: self.risk.daily_budget,
            max_open_positions: self.risk.max_open_positions,
            min_edge: self.risk.min_edge,
            max_trade_cap: self.risk.max_trade_cap,
            max_kelly_fraction: self.sizing.max_kelly_fraction,
            min_contracts: self.sizing.min_contracts,
            kelly_tiers: self.sizing.kelly_tiers.clone(),
        }
    }

    pub fn edge_config(&self) -> EdgeConfig {
        EdgeConfig {
            signal_kelly_multiplier: self.sizing.signal_kelly_multiplier,
            ..EdgeConfig::default()
        }
    }

    pub fn budget_limits(&self) -> BudgetLimits {
        BudgetLimits {
            daily_budget: self.risk.daily_budget,
            max_trade_cap: self.risk.max_trade_cap,
            max_trades_per_day: self.risk.max_trades_per_day,
            max_daily_loss: self.risk.max_daily_loss,
        }
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            limits: self.budget_limits(),
            balance_floor: self.risk.balance_floor,
            order_timeout: Duration::from_secs(self.execution.order_timeout_secs),
            resting_recheck_delay: Duration::from_millis(self.execution.resting_recheck_ms),
        }
    }

    /// Series to scan, with weather market types parsed.
    pub fn scan_config(&self) -> Result<ScanConfig> {
        let weather_series = self
            .markets
            .weather_series
            .iter()
            .map(|w| {
                Ok(WeatherSeries {
                    series: w.series.clone(),
                    city: w.city.clone(),
                    market_type: w
                        .market_type
                        .parse()
                        .with_context(|| format!("markets.weather_series[{}]", w.series))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ScanConfig {
            bracket_series: self.markets.bracket_series.clone(),
            weather_series,
            ..ScanConfig::default()
        })
    }

    pub fn approval_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.approvals.expiry_secs as i64)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Telegram credentials, if both env vars are configured and set.
    pub fn telegram_credentials(&self) -> Option<(SecretString, String)> {
        let token_env = self.alerts.telegram_bot_token_env.as_deref()?;
        let chat_env = self.alerts.telegram_chat_id_env.as_deref()?;
        let token = Self::resolve_env(token_env).ok()?;
        let chat_id = Self::resolve_env(chat_env).ok()?;
        Some((SecretString::new(token), chat_id))
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_CONFIG: &str = r#"
[agent]
name = "EDGEGATE-001"
paper_balance = 500.0
day_utc_offset_minutes = -300

[risk]
max_trade_cap = 20.0
daily_budget = 200.0
balance_floor = 75.0
min_edge = 0.05
max_open_positions = 20
max_trades_per_day = 15
max_daily_loss = 50.0

[sizing]
max_kelly_fraction = 0.10
min_contracts = 1
signal_kelly_multiplier = 0.40
kelly_tiers = [
    { min_balance = 0.0, fraction = 0.40 },
    { min_balance = 1000.0, fraction = 0.38 },
    { min_balance = 2500.0, fraction = 0.35 },
    { min_balance = 5000.0, fraction = 0.30 },
]

[approvals]
expiry_secs = 1800
sweep_interval_secs = 60

[execution]
order_timeout_secs = 10
resting_recheck_ms = 2000

[storage]
state_file = "edgegate_state.json"
journal_url = "sqlite://edgegate.db?mode=rwc"

[markets]
kalshi_base_url = "https://api.elections.kalshi.com/trade-api/v2"
bracket_series = ["KXINX"]
bracket_scan_interval_secs = 900
weather_scan_interval_secs = 1800
weather_series = [
    { series = "KXHIGHCHI", city = "CHI", market_type = "HIGH_BRACKET" },
]

[alerts]
telegram_bot_token_env = "TELEGRAM_BOT_TOKEN"
telegram_chat_id_env = "TELEGRAM_CHAT_ID"
"#;
