//! dustwatch daemon
//!
//! Serves the dust-storm detector over HTTP.

use anyhow::Context;
use clap::Parser;
use dustwatch_api::{create_router, AppState};
use dustwatch_core::{DaemonConfig, LogFormat, LoggingConfig, SourceKind};
use dustwatch_runtime::{ActiveModelCache, ProcessDetectorLoader, ProcessWorkerConfig};
use dustwatch_store::{HttpFetcher, ModelPolicy, ModelResolver};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// dustwatchd - dust-storm detection service for Mars imagery
#[derive(Parser, Debug)]
#[command(name = "dustwatchd")]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML configuration file (or DUSTWATCH_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the API server
    #[arg(long)]
    port: Option<u16>,

    /// Log level or filter directive
    #[arg(long)]
    log_level: Option<String>,
}

/// Layer file, environment and flags. `env` is the environment lookup.
fn load_config<F>(args: &Args, env: F) -> anyhow::Result<DaemonConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let path = args
        .config
        .clone()
        .or_else(|| env("DUSTWATCH_CONFIG").map(PathBuf::from));
    let mut config = match path {
        Some(path) => DaemonConfig::from_file(&path)?,
        None => DaemonConfig::default(),
    };
    config.apply_env(env)?;

    if let Some(address) = &args.address {
        config.api.address = address.clone();
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("Invalid log level: {}", config.level))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to set subscriber: {}", e))
}

fn log_model_inventory(resolver: &ModelResolver) {
    info!(
        local_dir = %resolver.local_dir().display(),
        cache_dir = %resolver.cache_dir().display(),
        "Model directories"
    );
    for entry in resolver.list() {
        match entry.source {
            SourceKind::Local | SourceKind::Cache => {
                info!(model = %entry.name, source = %entry.source, "Found model")
            }
            SourceKind::Remote => {
                warn!(model = %entry.name, url = %entry.url, "Model not on disk, will fetch on first use")
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args, |key| std::env::var(key).ok())?;
    init_logging(&config.logging)?;

    info!("Starting dustwatch daemon v{}", env!("CARGO_PKG_VERSION"));

    let resolver = Arc::new(ModelResolver::from_config(&config.models));
    log_model_inventory(&resolver);

    let policy = ModelPolicy::from_config(&config.models)?;
    info!(
        mode = %policy.mode(),
        model = policy.startup_model(),
        "Deployment policy"
    );

    let fetcher = Arc::new(HttpFetcher::from_config(&config.models)?);
    let loader = Arc::new(ProcessDetectorLoader::new(ProcessWorkerConfig::from_config(
        &config.worker,
    ))?);
    let cache = Arc::new(ActiveModelCache::new(resolver.clone(), fetcher, loader));

    if config.models.preload {
        let cache = cache.clone();
        let model = policy.startup_model().to_string();
        tokio::spawn(async move {
            if let Err(e) = cache.get_model(&model).await {
                warn!(model = %model, error = %e, "Preload failed, will retry on first request");
            }
        });
    }

    let state = Arc::new(AppState {
        cache: cache.clone(),
        policy,
        resolver,
        detection: config.detection.clone(),
        max_upload_bytes: config.api.max_upload_bytes,
    });
    let router = create_router(state, &config.api);

    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .context("Invalid address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("API server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cache.invalidate().await;
    info!("dustwatch daemon stopped");
    Ok(())
}
