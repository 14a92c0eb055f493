//! notes-research-bot - binary entrypoint
//! Watches note folders, researches admitted notes with every configured
//! provider, and writes the results back. Runs until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use notes_research_bot::analyze::{AiAnalyzer, ContentAnalyzer, HeuristicAnalyzer};
use notes_research_bot::api::{self, StatusState};
use notes_research_bot::breaker::BreakerRegistry;
use notes_research_bot::clock::system_clock;
use notes_research_bot::config::{BotConfig, LogFormat};
use notes_research_bot::fanout::FanoutExecutor;
use notes_research_bot::gate::AdmissionGate;
use notes_research_bot::ledger::Ledger;
use notes_research_bot::metrics::Metrics;
use notes_research_bot::orchestrator::{Orchestrator, OrchestratorSettings};
use notes_research_bot::providers::{build_providers, DynProvider};
use notes_research_bot::shutdown;
use notes_research_bot::source::FolderSource;

/// RUST_LOG wins; otherwise the configured level for this crate plus warn elsewhere.
fn init_tracing(cfg: &BotConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("notes_research_bot={},warn", cfg.log_level))
    });
    let registry = tracing_subscriber::registry().with(filter);
    match cfg.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).init(),
    }
}

fn pick_analyzer(cfg: &BotConfig, providers: &[DynProvider]) -> Arc<dyn ContentAnalyzer> {
    if !cfg.use_ai_analyzer {
        return Arc::new(HeuristicAnalyzer::new());
    }
    let chosen = match &cfg.analyzer_provider {
        Some(name) => providers.iter().find(|p| p.name() == name.as_str()),
        None => providers.first(),
    };
    match chosen {
        Some(p) => {
            info!(provider = p.name(), "ai analyzer enabled");
            Arc::new(AiAnalyzer::new(p.clone(), cfg.analysis_timeout())) as Arc<dyn ContentAnalyzer>
        }
        None => {
            warn!("analyzer provider unavailable; using heuristic analyzer");
            Arc::new(HeuristicAnalyzer::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cfg = BotConfig::load_default().context("loading configuration")?;
    init_tracing(&cfg);

    let issues = cfg.validate();
    if !issues.is_empty() {
        for i in &issues {
            error!(issue = %i, "invalid configuration");
        }
        bail!("configuration has {} issue(s)", issues.len());
    }

    let metrics = match Metrics::install() {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(error = %e, "metrics disabled");
            None
        }
    };

    let providers = build_providers(&cfg.providers);
    if providers.is_empty() {
        bail!("no research providers available (check API keys)");
    }

    let clock = system_clock();
    let names: Vec<String> = providers.iter().map(|p| p.name().to_string()).collect();
    let breakers = Arc::new(BreakerRegistry::new(&names, cfg.breaker_config(), clock.clone()));
    let analyzer = pick_analyzer(&cfg, &providers);
    let fanout = FanoutExecutor::new(
        providers,
        breakers.clone(),
        cfg.retry_policy(),
        cfg.provider_timeout(),
    );

    let ledger = Arc::new(Ledger::open(cfg.ledger_path(), clock.clone()).with_retention(cfg.retention()));
    let source = Arc::new(FolderSource::new(cfg.notes_dirs.clone()));

    let (trigger, shutdown) = shutdown::channel();

    if let Some(addr) = &cfg.status_addr {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid status_addr '{addr}'"))?;
        let state = StatusState {
            ledger: ledger.clone(),
            breakers: breakers.clone(),
            metrics: metrics.as_ref().map(|m| m.handle.clone()),
        };
        let sd = trigger.subscribe();
        tokio::spawn(async move {
            if let Err(e) = api::serve(addr, state, sd).await {
                error!(error = %e, "status server stopped");
            }
        });
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => error!(error = %e, "ctrl-c handler failed; shutting down"),
        }
        trigger.trigger();
    });

    info!(
        dirs = ?cfg.notes_dirs,
        ledger = %cfg.ledger_path().display(),
        poll_s = cfg.poll_interval_seconds,
        threshold = cfg.confidence_threshold,
        "notes-research-bot starting"
    );

    let orchestrator = Arc::new(
        Orchestrator::new(
            source,
            analyzer,
            AdmissionGate::new(cfg.confidence_threshold),
            fanout,
            ledger,
            OrchestratorSettings::from_config(&cfg),
        )
        .with_clock(clock)
        .with_shutdown(shutdown),
    );

    let stats = orchestrator.run().await;
    info!(
        processed = stats.processed(),
        researched = stats.researched,
        failed = stats.failed,
        "bye"
    );
    Ok(())
}
