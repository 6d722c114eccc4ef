use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod charts;
mod config;
mod handlers;
mod middleware;
mod prober;
mod redis_client;
mod scheduler;
mod server;
mod store;

use config::{LogFormat, ServeArgs, Settings};
use prober::Prober;
use store::MetricStore;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Aggregation store handle (cheap to clone, shares one connection).
    pub store: MetricStore,

    /// Configured targets; queries for anything else are rejected.
    pub urls: Vec<String>,
}

/// Probes a list of URLs and serves the bucketed results.
#[derive(Parser)]
#[command(name = "uptime-monitor", version)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one monitoring cycle, or loop when --interval is given
    Monitor {
        /// Seconds between cycles
        #[arg(long, env = "MONITOR_INTERVAL")]
        interval: Option<u64>,
    },

    /// Serve metrics JSON and charts
    Serve(ServeArgs),

    /// Serve and monitor in one process
    Run {
        #[command(flatten)]
        serve: ServeArgs,

        /// Seconds between cycles (defaults to the bucket width)
        #[arg(long, env = "MONITOR_INTERVAL")]
        interval: Option<u64>,
    },

    /// Provision the store schema and exit
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.settings.log_format);

    match cli.command {
        Command::Init => {
            let store = cli.settings.open_store().await?;
            let provisioned = store.init().await.context("failed to init store")?;
            tracing::info!(?provisioned, "store ready");
            Ok(())
        }
        Command::Monitor { interval } => {
            let urls = cli.settings.target_urls()?;
            let store = cli.settings.open_store().await?;
            let prober = Prober::new().context("failed to build HTTP client")?;

            match interval {
                None => {
                    tracing::info!("starting monitor");
                    let report = scheduler::run_cycle(&prober, &store, &urls)
                        .await
                        .context("failed to persist")?;
                    tracing::info!(
                        bucket = report.bucket,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        "cycle complete"
                    );
                }
                Some(secs) => {
                    let every = cycle_interval(secs)?;
                    tracing::info!(every_secs = every.as_secs(), "starting monitor loop");
                    scheduler::run(prober, store, urls, every, ctrl_c()).await;
                }
            }
            Ok(())
        }
        Command::Serve(serve) => {
            let urls = cli.settings.target_urls()?;
            let store = cli.settings.open_store().await?;
            serve_http(serve, AppState { store, urls }, ctrl_c()).await
        }
        Command::Run { serve, interval } => {
            let urls = cli.settings.target_urls()?;
            let store = cli.settings.open_store().await?;
            let prober = Prober::new().context("failed to build HTTP client")?;
            let every = cycle_interval(interval.unwrap_or(u64::from(store.bucket_width().secs())))?;

            // One Ctrl-C stops both halves.
            let (stop_tx, stop_rx) = watch::channel(false);
            tokio::spawn(async move {
                ctrl_c().await;
                let _ = stop_tx.send(true);
            });

            let monitor = tokio::spawn(scheduler::run(
                prober,
                store.clone(),
                urls.clone(),
                every,
                stopped(stop_rx.clone()),
            ));
            serve_http(serve, AppState { store, urls }, stopped(stop_rx)).await?;
            monitor.await.context("monitor loop panicked")?;
            Ok(())
        }
    }
}

async fn serve_http(
    serve: ServeArgs,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let targets = state.urls.len();
    let app = server::create_router(std::sync::Arc::new(state));

    let listener = tokio::net::TcpListener::bind(serve.address)
        .await
        .with_context(|| format!("failed to bind to {}", serve.address))?;
    tracing::info!(address = %serve.address, targets, "starting webapp");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server exited with error")
}

fn cycle_interval(secs: u64) -> anyhow::Result<Duration> {
    if secs == 0 {
        anyhow::bail!("monitor interval must be at least one second");
    }
    Ok(Duration::from_secs(secs))
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    // An error means the sender is gone, which also means stop.
    let _ = rx.wait_for(|stop| *stop).await;
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
    }
}
