use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use ca_domain::config::{Config, ConfigSeverity};
use ca_providers::ProviderRegistry;
use ca_storage::{ChatStore, PatientStore, SpecialistStore, ToolRecordStore};
use ca_tools::{ToolExecutor, ToolRegistry};

use ca_gateway::api;
use ca_gateway::cli::{self, Cli, Command, ConfigCommand};
use ca_gateway::runtime::bus::EventBus;
use ca_gateway::runtime::cancel::CancelMap;
use ca_gateway::runtime::recall::NoopRecall;
use ca_gateway::runtime::tasks::{TaskRunner, TaskStore};
use ca_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    match args.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _path) = cli::load_config(args.config.as_ref())?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = cli::load_config(args.config.as_ref())?;
            if !cli::validate(&config, &path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _path) = cli::load_config(args.config.as_ref())?;
            cli::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("clinagent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the serve command.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ca_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("ClinAgent starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Durable stores ───────────────────────────────────────────────
    let state_path = &config.storage.state_path;
    let chat = Arc::new(ChatStore::new(state_path).context("initializing chat store")?);
    let patients =
        Arc::new(PatientStore::new(state_path).context("initializing patient store")?);
    let specialists =
        Arc::new(SpecialistStore::new(state_path).context("initializing specialist store")?);
    let tool_records =
        Arc::new(ToolRecordStore::new(state_path).context("initializing tool record store")?);
    tracing::info!(path = %state_path.display(), "durable stores ready");

    // ── Tool registry + builtins ─────────────────────────────────────
    let registry = Arc::new(ToolRegistry::new());
    let http_timeout = Duration::from_secs(config.tools.http_timeout_sec);
    ca_tools::builtin::register_builtins(&registry, patients.clone(), http_timeout)
        .context("registering builtin tools")?;
    let executor = ToolExecutor::new(registry.clone());

    // ── LLM providers ────────────────────────────────────────────────
    let llm = Arc::new(
        ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?,
    );
    if llm.is_empty() {
        tracing::warn!(
            "no LLM providers initialized — the gateway will reject turns \
             until credentials are configured"
        );
    } else {
        tracing::info!(providers = llm.len(), "LLM provider registry ready");
    }

    // ── Runtime ──────────────────────────────────────────────────────
    let task_config = config.tasks.clamped();
    let tasks = Arc::new(TaskStore::new());
    let runner = Arc::new(TaskRunner::new(
        task_config.max_concurrent,
        task_config.max_attempts,
    ));
    tracing::info!(
        max_concurrent = task_config.max_concurrent,
        max_attempts = task_config.max_attempts,
        "task supervisor ready"
    );

    let state = AppState {
        config: config.clone(),
        llm,
        chat,
        patients,
        specialists,
        tool_records,
        registry,
        executor,
        recall: Arc::new(NoopRecall),
        bus: Arc::new(EventBus::new()),
        tasks: tasks.clone(),
        runner,
        cancel_map: Arc::new(CancelMap::new()),
    };

    // ── Periodic terminal-task eviction ──────────────────────────────
    {
        let tasks = tasks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                tasks.evict_terminal(chrono::Duration::hours(1));
            }
        });
    }

    // ── Layers ───────────────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);
    let max_concurrent_requests = std::env::var("CLINAGENT_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);

    let app = api::router()
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            max_concurrent_requests,
        ))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "ClinAgent listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may carry a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`). A literal `"*"` allows all origins.
fn build_cors_layer(cors: &ca_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(value) = origin.parse::<HeaderValue>() {
            exact.push(value);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            let origin_str = origin.to_str().unwrap_or("");
            // The remainder after a wildcard prefix must be digits only,
            // so "http://localhost:3000.evil.com" cannot slip through.
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}
