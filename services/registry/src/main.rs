//! Helm chart and OCI registry server

use std::net::SocketAddr;

use camino::Utf8PathBuf;
use chart_registry::{Config, LogFormat};
use clap::Parser;
use eyre::WrapErr;
use storage::StorageConfig;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "REGISTRY_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "REGISTRY_LISTEN")]
    listen: Option<SocketAddr>,

    /// Keep objects in this directory
    #[arg(long, env = "REGISTRY_STORAGE_PATH")]
    storage_path: Option<Utf8PathBuf>,
}

fn load_config(args: &Args) -> eyre::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {path}"))?;
            Config::from_toml(&text).wrap_err_with(|| format!("parsing {path}"))?
        }
        None => Config::default(),
    };

    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(path) = &args.storage_path {
        config.storage.backend = StorageConfig::Local { path: path.clone() };
    }

    config.apply_env();
    Ok(config)
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match config.logging.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config);

    let storage = config
        .storage
        .backend
        .clone()
        .build()
        .await
        .wrap_err("building storage")?;
    tracing::info!(driver = storage.name(), bucket = %config.storage.bucket, "storage ready");

    let (registry, app) = config.builder(storage).into_parts();

    let sweep_interval = config.uploads.sweep_interval();
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(sweep_interval);
        loop {
            ticks.tick().await;
            registry.sweep_uploads().await;
        }
    });

    let listener = tokio::net::TcpListener::bind(config.server.listen)
        .await
        .wrap_err_with(|| format!("binding {}", config.server.listen))?;
    tracing::info!(
        listen = %config.server.listen,
        auth = config.auth.enabled,
        "registry listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("serving")?;

    Ok(())
}
