//! EDGEGATE: prediction-market edge scoring with human-approved execution.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores today's budget from disk and the journal, then runs the scan,
//! approval-sweep and settlement loops until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use edgegate::alerts::telegram::TelegramChannel;
use edgegate::alerts::{ApprovalChannel, LogChannel};
use edgegate::config::AppConfig;
use edgegate::engine::accountant::Accountant;
use edgegate::engine::approvals::{ApprovalOutcome, TradeApprovalRegistry};
use edgegate::engine::executor::ExecutionGate;
use edgegate::engine::scanner::Scanner;
use edgegate::platforms::kalshi::KalshiMarketData;
use edgegate::platforms::paper::PaperExchange;
use edgegate::platforms::MarketDataProvider;
use edgegate::storage::journal::SqliteJournal;
use edgegate::storage::{restore_daily_budget, DailyStateStore};
use edgegate::strategy::{EdgeCalculator, PositionSizer};
use edgegate::types::{system_clock, EdgegateError, TradeProposal};

const BANNER: &str = r#"
 _____ ____   ____ _____ ____    _  _____ _____
| ____|  _ \ / ___| ____/ ___|  / \|_   _| ____|
|  _| | | | | |  _|  _|| |  _  / _ \ | | |  _|
| |___| |_| | |_| | |__| |_| |/ ___ \| | | |___
|_____|____/ \____|_____\____/_/   \_\_| |_____|

  Edge scoring, Kelly sizing, approval-gated execution
  v0.1.0 (paper)
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        daily_budget = format!("${:.2}", cfg.risk.daily_budget),
        max_trade = format!("${:.2}", cfg.risk.max_trade_cap),
        floor = format!("${:.2}", cfg.risk.balance_floor),
        "EDGEGATE starting up"
    );

    let offset = cfg
        .day_offset()
        .ok_or_else(|| EdgegateError::Config("invalid day offset".into()))?;
    let clock = system_clock();

    // -- Restore today's budget ------------------------------------------

    let journal = Arc::new(SqliteJournal::connect(&cfg.storage.journal_url).await?);
    let state_store = Arc::new(DailyStateStore::new(&cfg.storage.state_file));
    let budget = Arc::new(
        restore_daily_budget(&state_store, &journal, offset, clock.clone()).await?,
    );

    // -- Initialise components -------------------------------------------

    let markets: Arc<dyn MarketDataProvider> =
        Arc::new(KalshiMarketData::new(&cfg.markets.kalshi_base_url)?);
    let exchange = Arc::new(PaperExchange::new(cfg.agent.paper_balance));

    let gate = Arc::new(
        ExecutionGate::new(
            exchange.clone(),
            exchange.clone(),
            budget.clone(),
            journal.clone(),
            cfg.execution_config(),
        )
        .with_state_store(state_store.clone()),
    );
    let registry = Arc::new(TradeApprovalRegistry::new(cfg.approval_expiry(), clock.clone()));

    let scanner = Scanner::new(
        markets.clone(),
        exchange.clone(),
        budget.clone(),
        journal.clone(),
        EdgeCalculator::new(cfg.edge_config()),
        PositionSizer::new(cfg.sizing_config()),
        cfg.scan_config()?,
        clock.clone(),
        offset,
    );
    let accountant = Accountant::new(markets, journal, budget.clone(), clock)
        .with_state_store(state_store.clone())
        .with_payouts(exchange);

    // Telegram if credentials are present, otherwise log-only.
    let (channel, poller): (Arc<dyn ApprovalChannel>, _) = match cfg.telegram_credentials() {
        Some((token, chat_id)) => {
            let telegram = Arc::new(TelegramChannel::new(
                token,
                chat_id,
                Duration::from_secs(cfg.alerts.telegram_poll_timeout_secs),
            )?);
            let poller = tokio::spawn(telegram.clone().poll_loop(registry.clone(), gate.clone()));
            (telegram as Arc<dyn ApprovalChannel>, Some(poller))
        }
        None => {
            warn!("No Telegram credentials configured, approval requests will only be logged");
            (Arc::new(LogChannel) as Arc<dyn ApprovalChannel>, None)
        }
    };

    // -- Main loop -------------------------------------------------------

    let mut bracket_tick = interval_secs(cfg.markets.bracket_scan_interval_secs);
    let mut weather_tick = interval_secs(cfg.markets.weather_scan_interval_secs);
    let mut sweep_tick = interval_secs(cfg.approvals.sweep_interval_secs);
    let mut settle_tick = interval_secs(cfg.markets.settlement_interval_secs);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        bracket_secs = cfg.markets.bracket_scan_interval_secs,
        weather_secs = cfg.markets.weather_scan_interval_secs,
        expiry_secs = cfg.approvals.expiry_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = bracket_tick.tick() => {
                submit("bracket", scanner.scan_brackets().await, &registry, channel.as_ref()).await;
            }
            _ = weather_tick.tick() => {
                submit("weather", scanner.scan_weather().await, &registry, channel.as_ref()).await;
            }
            _ = sweep_tick.tick() => {
                for id in registry.sweep_expired() {
                    let Some(trade) = registry.get(&id) else { continue };
                    let request = trade.request(registry.expiry());
                    if let Err(e) = channel.report(&request, &ApprovalOutcome::Expired).await {
                        warn!(id = %id, error = %e, "Failed to report expiry");
                    }
                }
            }
            _ = settle_tick.tick() => {
                if let Err(e) = accountant.settle_open_positions().await {
                    error!(error = %e, "Settlement pass failed, continuing");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    if let Some(poller) = poller {
        poller.abort();
    }

    let snapshot = budget.snapshot();
    if let Err(e) = state_store.save(&snapshot) {
        error!(error = %e, "Failed to save daily state on shutdown");
    }
    info!(
        date = %snapshot.date,
        deployed = format!("${:.2}", snapshot.deployed_total),
        trades = snapshot.trade_count,
        loss = format!("${:.2}", snapshot.realized_loss_total),
        pending = registry.pending().len(),
        "EDGEGATE shut down cleanly."
    );

    Ok(())
}

fn interval_secs(secs: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

/// Register a scan's proposal and show it to the approver.
async fn submit(
    scan: &str,
    result: Result<Option<TradeProposal>>,
    registry: &TradeApprovalRegistry,
    channel: &dyn ApprovalChannel,
) {
    let proposal = match result {
        Ok(Some(p)) => p,
        Ok(None) => return,
        Err(e) => {
            error!(scan, error = %e, "Scan failed, continuing");
            return;
        }
    };
    let request = match registry.create(proposal) {
        Ok(r) => r,
        Err(e) => {
            warn!(scan, error = %e, "Proposal rejected by registry");
            return;
        }
    };
    if let Err(e) = channel.present(&request).await {
        warn!(id = %request.id, error = %e, "Failed to present approval request");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("edgegate=info"));

    let json_logging = std::env::var("EDGEGATE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
