//! `rro-server` — the stdio JSON-RPC front end over `rro_core`. Wires the
//! five long-lived components, starts the scheduler's background sweep, the
//! cache's background cleanup, and the health monitor's interval checks,
//! then runs the transport loop until stdin closes or a shutdown signal
//! arrives.

use std::sync::Arc;

use clap::Parser;
use rro_core::model::{HealthCheckType, HealthStatus};
use rro_core::{
    CacheConfig, Config, ConfigSeverity, HealthCheckConfig, HealthMonitor, ProviderGateway,
    ResultCache, Router, SchedulerConfig, ToolDispatcher, TournamentEngine,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rro-server", version, about = "Reasoning orchestration server (stdio JSON-RPC)")]
struct Cli {
    /// Path to a TOML config file. Falls back to `RRO_CONFIG`, then
    /// `config.toml`, then compiled-in defaults if nothing exists on disk.
    #[arg(long)]
    config: Option<String>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();
}

/// Loads `path` (or `RRO_CONFIG`, or `config.toml`) if it exists, otherwise
/// falls back to [`Config::default`], then layers `RRO_`-prefixed
/// environment overrides on top.
fn load_config(path: Option<String>) -> anyhow::Result<(Config, String)> {
    let config_path = path
        .or_else(|| std::env::var("RRO_CONFIG").ok())
        .unwrap_or_else(|| "config.toml".to_string());

    let mut config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };
    config.apply_env_overrides();
    Ok((config, config_path))
}

async fn register_default_health_checks(
    health: &HealthMonitor,
    gateway: Arc<ProviderGateway>,
    scheduler: Arc<rro_core::ConversationScheduler>,
) {
    health
        .register(HealthCheckConfig::new(
            "providers",
            HealthCheckType::Dependency,
            1_000,
            Arc::new(move || {
                let gateway = Arc::clone(&gateway);
                Box::pin(async move {
                    let available = gateway.available_providers().await;
                    let status = if available.is_empty() {
                        HealthStatus::Degraded
                    } else {
                        HealthStatus::Healthy
                    };
                    (status, Some(serde_json::json!({"available": available})))
                })
            }),
        ))
        .await;
    health
        .register(HealthCheckConfig::new(
            "sessions",
            HealthCheckType::Resource,
            1_000,
            Arc::new(move || {
                let scheduler = Arc::clone(&scheduler);
                Box::pin(async move {
                    let count = scheduler.session_count().await;
                    (
                        HealthStatus::Healthy,
                        Some(serde_json::json!({"active_sessions": count})),
                    )
                })
            }),
        ))
        .await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let (config, config_path) = match load_config(cli.config) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(config_path = %config_path, log_level = %config.log_level, "configuration loaded");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("{issue}"),
            ConfigSeverity::Error => tracing::error!("{issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!("refusing to start with invalid configuration");
    }

    let gateway = Arc::new(ProviderGateway::new());
    // Concrete provider SDK integrations are out of scope for this crate;
    // an embedding deployment registers providers and credentials before
    // traffic arrives. Until one is armed, `providers` health reports
    // degraded and strategy runs fail with `ProviderUnavailable`.

    let cache = Arc::new(ResultCache::new(CacheConfig {
        max_entries: config.cache_max_entries,
        default_ttl_ms: config.cache_ttl_sec.saturating_mul(1000),
        ..CacheConfig::default()
    }));
    cache.spawn_background_cleanup();

    let router = Arc::new(Router::with_default_strategies().with_cache(Arc::clone(&cache)));

    let scheduler = Arc::new(rro_core::ConversationScheduler::new(
        Arc::clone(&gateway),
        SchedulerConfig {
            max_turns: config.max_turns_per_session,
            session_timeout_min: config.session_timeout_min as i64,
            ..SchedulerConfig::default()
        },
    ));
    scheduler.spawn_background_sweep();

    let tournament = Arc::new(TournamentEngine::new(Arc::clone(&gateway)));

    let health = Arc::new(HealthMonitor::new());
    register_default_health_checks(&health, Arc::clone(&gateway), Arc::clone(&scheduler)).await;
    health.spawn_background_interval_checks(config.health_check_interval_sec);

    let dispatcher = Arc::new(ToolDispatcher::new(
        router,
        scheduler,
        tournament,
        gateway,
        health,
    ));

    tracing::info!(tools = ?ToolDispatcher::tool_names(), "rro-server ready, reading stdio");

    let result = tokio::select! {
        result = rro_core::stdio_loop(dispatcher) => result,
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, exiting");
            Ok(())
        }
    };

    match result {
        Ok(()) => {
            tracing::info!("clean shutdown");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "transport failure");
            std::process::exit(2);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
