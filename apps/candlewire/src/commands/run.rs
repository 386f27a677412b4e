//! `run` and `replay`: wire the adapters, spawn the pipeline, ride it to a
//! stop, then write the run artifacts.

use candlewire_application::config::{load_config_with_source, Config, OracleMode};
use candlewire_application::pipeline::{
    refresh_portfolio, spawn_pipeline, ApprovalStore, PipelineContext, StatsSnapshot,
};
use candlewire_application::resilience::ResilienceRegistry;
use candlewire_domain::entities::portfolio::Portfolio;
use candlewire_domain::repositories::{DecisionOracle, EventSink};
use candlewire_domain::services::history::IndicatorHistory;
use candlewire_domain::services::indicators::CalculatorRegistry;
use candlewire_domain::services::risk::RiskManager;
use candlewire_infrastructure::artifacts::{
    write_config_snapshot, write_decisions_csv, write_summary_json, JsonlEventSink, RunDir,
};
use candlewire_infrastructure::broker::{PaperBroker, PaperBrokerSettings};
use candlewire_infrastructure::market_data::{QualityReport, ReplayFeed};
use candlewire_infrastructure::oracle::HttpDecisionOracle;
use candlewire_infrastructure::persistence::memory::{
    MemoryCandleRepository, MemoryDecisionRepository, MemoryStrategyRepository,
};
use candlewire_infrastructure::persistence::strategy_file::load_strategies;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How fast the market poller ticks relative to the configured interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Poll at the configured interval.
    Configured,
    /// Drain the feed as fast as it will go and stop when it is empty.
    Drain,
}

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(2);
const DRAIN_IDLE_POLLS: u32 = 3;

pub fn execute(config_flag: Option<PathBuf>, pacing: Pacing) -> Result<serde_json::Value, String> {
    let config_path = super::resolve_config_path(config_flag)?;
    let (config, config_toml) = load_config_with_source(&config_path)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("unable to start async runtime: {err}"))?;
    runtime.block_on(run_pipeline(&config, &config_toml, pacing))
}

async fn run_pipeline(
    config: &Config,
    config_toml: &str,
    pacing: Pacing,
) -> Result<serde_json::Value, String> {
    let timeframe = config.parsed_timeframe()?;
    let run_id = config.resolved_run_id(Utc::now());

    let run_dir = RunDir::create(Path::new(&config.paths.out_dir), &run_id)?;
    write_config_snapshot(&run_dir.config_snapshot_path(), config_toml)?;
    let sink: Arc<dyn EventSink> = Arc::new(JsonlEventSink::create(&run_dir.events_path())?);

    let data_path = config
        .paths
        .data_path
        .as_deref()
        .ok_or_else(|| "paths.data_path is required to run the pipeline".to_string())?;
    let (feed, quality) = ReplayFeed::from_csv(Path::new(data_path), &config.run.symbol, timeframe)?;
    let feed = Arc::new(feed);
    tracing::info!(
        bars = feed.len(),
        duplicates = quality.duplicates,
        gaps = quality.gaps,
        invalid = quality.invalid_rows,
        "candle file loaded"
    );

    let strategies = match config.paths.strategies_path.as_deref() {
        Some(path) => load_strategies(Path::new(path))?,
        None => Vec::new(),
    };
    let oracle = build_oracle(config)?;
    if strategies.is_empty() && oracle.is_none() {
        tracing::warn!("no strategies and no oracle configured, the run will only ingest candles");
    }

    let frictions = config.broker_settings();
    let broker = Arc::new(PaperBroker::new(
        config.run.initial_capital,
        feed.clone(),
        PaperBrokerSettings {
            fee_bps: frictions.fee_bps,
            slippage_bps: frictions.slippage_bps,
            jitter_bps: frictions.jitter_bps,
        },
    ));

    let poll_interval = match pacing {
        Pacing::Configured => config.poll_interval()?,
        Pacing::Drain => DRAIN_POLL_INTERVAL,
    };
    let idle_shutdown_polls = match pacing {
        Pacing::Configured => config.idle_shutdown_polls(),
        Pacing::Drain => Some(config.idle_shutdown_polls().unwrap_or(DRAIN_IDLE_POLLS)),
    };

    let decisions = Arc::new(MemoryDecisionRepository::new());

    let ctx = Arc::new(PipelineContext {
        run_id: run_id.clone(),
        symbol: config.run.symbol.clone(),
        timeframe,
        trading_enabled: config.trading.enabled,
        trading_mode: config.trading.mode,
        default_order_percent: config.trading.default_order_percent,
        candle_lookback: config.candle_lookback(),
        poll_interval,
        idle_shutdown_polls,
        calculators: CalculatorRegistry::from_periods(&config.indicator_periods())?,
        history: Mutex::new(IndicatorHistory::with_default_ttl()),
        risk: RiskManager::new(config.risk_limits()),
        approvals: ApprovalStore::default(),
        portfolio: RwLock::new(Portfolio::empty(config.run.initial_capital, Utc::now())),
        candles: Arc::new(MemoryCandleRepository::new()),
        decisions: decisions.clone(),
        strategies: Arc::new(MemoryStrategyRepository::with_strategies(strategies)),
        broker,
        market_data: feed,
        oracle,
        resilience: Arc::new(ResilienceRegistry::new(config.resilience_settings())),
    });

    tracing::info!(
        run_id = %run_id,
        symbol = %ctx.symbol,
        timeframe = %timeframe,
        mode = ?ctx.trading_mode,
        trading_enabled = ctx.trading_enabled,
        "pipeline starting"
    );
    let handle = spawn_pipeline(ctx.clone(), sink);

    let trigger = handle.shutdown_trigger();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            trigger.trigger();
        }
    });

    let stats = handle.join().await;

    let pending = ctx.approvals.pending();
    metrics::gauge!("candlewire.pipeline.pending_approvals").set(pending.len() as f64);
    for approval in &pending {
        tracing::warn!(
            decision = %approval.decision.id,
            symbol = %approval.decision.symbol,
            action = %approval.decision.action,
            quantity = approval.quantity,
            "approval still pending at shutdown"
        );
    }

    let portfolio = match refresh_portfolio(&ctx).await {
        Ok(portfolio) => portfolio,
        Err(err) => {
            tracing::warn!(error = %err, "final portfolio refresh failed, using last snapshot");
            ctx.portfolio_snapshot()
        }
    };

    write_decisions_csv(&run_dir.decisions_path(), &decisions.all())?;
    let summary = run_summary(&run_id, config, &stats, &portfolio, pending.len(), &quality);
    write_summary_json(&run_dir.summary_path(), &summary)?;
    tracing::info!(run_dir = %run_dir.root().display(), "run artifacts written");

    Ok(serde_json::json!({
        "status": "ok",
        "mode": mode_label(pacing),
        "run_id": run_id,
        "out_dir": config.paths.out_dir,
        "events": stats,
        "pending_approvals": pending.len(),
        "artifacts": artifacts_for_run(&run_dir),
    }))
}

fn mode_label(pacing: Pacing) -> &'static str {
    match pacing {
        Pacing::Configured => "run",
        Pacing::Drain => "replay",
    }
}

fn build_oracle(config: &Config) -> Result<Option<Arc<dyn DecisionOracle>>, String> {
    let Some(section) = &config.oracle else {
        return Ok(None);
    };
    if section.mode != OracleMode::Remote {
        return Ok(None);
    }
    let url = section
        .url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| "oracle.url is required when oracle.mode = \"remote\"".to_string())?;
    let timeout = Duration::from_millis(section.timeout_ms.unwrap_or(5_000));
    let client = HttpDecisionOracle::new(url.to_string(), timeout)
        .map_err(|err| format!("failed to init oracle client (url={url}): {err}"))?;
    let client: Arc<dyn DecisionOracle> = Arc::new(client);
    Ok(Some(client))
}

fn artifacts_for_run(run_dir: &RunDir) -> serde_json::Value {
    serde_json::json!({
        "run_dir": run_dir.root().display().to_string(),
        "events_jsonl": run_dir.events_path().display().to_string(),
        "decisions_csv": run_dir.decisions_path().display().to_string(),
        "summary_json": run_dir.summary_path().display().to_string(),
        "config_snapshot_toml": run_dir.config_snapshot_path().display().to_string(),
    })
}

fn run_summary(
    run_id: &str,
    config: &Config,
    stats: &StatsSnapshot,
    portfolio: &Portfolio,
    pending_approvals: usize,
    quality: &QualityReport,
) -> serde_json::Value {
    serde_json::json!({
        "run_id": run_id,
        "symbol": config.run.symbol,
        "timeframe": config.run.timeframe,
        "trading_mode": config.trading.mode,
        "trading_enabled": config.trading.enabled,
        "events": stats,
        "portfolio": {
            "cash": portfolio.cash,
            "equity": portfolio.equity,
            "unrealized_pnl": portfolio.unrealized_pnl,
            "realized_pnl": portfolio.realized_pnl,
            "open_positions": portfolio.open_position_count(),
        },
        "pending_approvals": pending_approvals,
        "data_quality": quality,
    })
}
