use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use coai_core::Agent;
use coai_engine::{
    AgentRouter, CacheConfig, FileRuleSource, Orchestrator, OrchestratorConfig, RateLimitConfig,
    RateLimiter, ResponseCache, RuleStore, UsageTracker,
};
use coai_llm::{CopilotAgent, OpenAiAgent, OpenAiConfig};
use coai_server::{ServerConfig, Services};
use coai_settings::{CoaiSettings, UsageBackend};
use coai_store::{Database, JsonFileStore, SnapshotStore, SqliteSnapshotStore};
use coai_telemetry::{init_telemetry, JsonlAuditLog, MetricsRecorder, TelemetryConfig};

#[derive(Debug, Parser)]
#[command(name = "coai", about = "COAI request orchestration server")]
struct Cli {
    /// Settings file (defaults to ~/.coai/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.config.unwrap_or_else(coai_settings::settings_path);
    let mut settings = coai_settings::load_settings_from_path(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    if let Some(parent) = settings.telemetry.log_db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    let telemetry = init_telemetry(TelemetryConfig {
        log_level: TelemetryConfig::parse_level(&settings.telemetry.log_level),
        module_levels: Vec::new(),
        log_to_sqlite: settings.telemetry.log_to_sqlite,
        log_db_path: settings.telemetry.log_db_path.clone(),
    });
    tracing::info!(settings = %path.display(), "starting COAI server");

    let services = build_services(&settings, telemetry.metrics())?;
    let handle = coai_server::start(
        ServerConfig {
            host: settings.server.host.clone(),
            port: settings.server.port,
            request_timeout_secs: settings.server.request_timeout_secs,
        },
        Arc::new(services),
    )
    .await
    .context("starting HTTP server")?;
    tracing::info!(port = handle.port, "COAI server ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn build_services(settings: &CoaiSettings, metrics: Arc<MetricsRecorder>) -> Result<Services> {
    let audit = Arc::new(JsonlAuditLog::new(&settings.telemetry.audit_dir));

    let rate_limiter = RateLimiter::new(
        RateLimitConfig {
            limit: settings.rate_limit.requests,
            window: Duration::from_secs(settings.rate_limit.window_secs),
            block: Duration::from_secs(settings.rate_limit.block_secs),
        },
        audit.clone(),
    )
    .with_metrics(metrics.clone());

    let cache = ResponseCache::new(CacheConfig {
        ttl: Duration::from_secs(settings.cache.ttl_secs),
        max_entries: settings.cache.max_entries,
        evict_batch: settings.cache.evict_batch,
    })
    .with_metrics(metrics.clone());

    let rules = RuleStore::new(Box::new(FileRuleSource::new(
        &settings.rules.system_path,
        settings.rules.projects_root.clone(),
    )));

    let router = build_router(settings, metrics.clone())?;

    let data_dir = &settings.usage.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating usage directory {}", data_dir.display()))?;
    let store: Arc<dyn SnapshotStore> = match settings.usage.backend {
        UsageBackend::Json => Arc::new(JsonFileStore::new(data_dir)),
        UsageBackend::Sqlite => {
            let db = Database::open(&data_dir.join("usage.db")).context("opening usage database")?;
            Arc::new(SqliteSnapshotStore::new(db))
        }
    };
    let usage = UsageTracker::new(store, data_dir).with_metrics(metrics.clone());

    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            max_message_length: settings.orchestrator.max_message_length,
        },
        Arc::new(rules),
        Arc::new(router),
        Arc::new(usage),
    )
    .with_audit(audit)
    .with_metrics(metrics.clone());

    Ok(Services {
        orchestrator: Arc::new(orchestrator),
        rate_limiter: Arc::new(rate_limiter),
        cache: Arc::new(cache),
        metrics,
    })
}

/// The local copilot is always available. OpenAI joins when real AI is
/// enabled and a key is present.
fn build_router(settings: &CoaiSettings, metrics: Arc<MetricsRecorder>) -> Result<AgentRouter> {
    let agents = &settings.agents;
    let mut router = AgentRouter::new(agents.default_agent.clone())
        .with_timeout(Duration::from_secs(agents.dispatch_timeout_secs))
        .with_metrics(metrics);

    let copilot: Arc<dyn Agent> = Arc::new(CopilotAgent::new());
    router.register(copilot)?;

    match (agents.enable_real_ai, &agents.openai.api_key) {
        (true, Some(key)) => {
            let openai = OpenAiAgent::new(OpenAiConfig {
                api_base_url: agents.openai.api_base_url.clone(),
                model: agents.openai.model.clone(),
                max_tokens: agents.openai.max_tokens,
                temperature: agents.openai.temperature,
                api_key: key.0.clone(),
            })
            .context("building OpenAI agent")?;
            router.register(Arc::new(openai))?;
        }
        (true, None) => tracing::warn!("real AI enabled but OPENAI_API_KEY is not set"),
        (false, _) => tracing::info!("real AI disabled, serving local agents only"),
    }

    if !router.contains(&agents.default_agent) {
        tracing::warn!(
            configured = %agents.default_agent,
            "default agent not registered, using copilot"
        );
        router.set_default("copilot");
    }
    Ok(router)
}
