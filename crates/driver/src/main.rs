mod config;
mod experiment;
mod http;
mod ingress;
mod liveness;
mod report;
mod sim;

use clap::Parser;
use config::Config;
use http::HttpTransport;
use sim::SimulatedTransport;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use workload_core::manager::WorkloadManager;
use workload_core::tracker::{CompletionIngress, TransactionTracker};
use workload_core::worker::WorkerTransport;

/// Closed-loop workload driver for the marketplace benchmark.
#[derive(Parser)]
#[command(name = "driver")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Drive the in-process simulated marketplace instead of the HTTP target
    #[arg(long)]
    simulate: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Append one JSON report per run to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Override workload.concurrency_level
    #[arg(long)]
    concurrency: Option<usize>,

    /// Override workload.execution_time_ms
    #[arg(long)]
    execution_time_ms: Option<u64>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = load_config(&args.config);
    if let Some(concurrency) = args.concurrency {
        config.workload.concurrency_level = concurrency;
    }
    if let Some(ms) = args.execution_time_ms {
        config.workload.execution_time_ms = ms;
    }
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }
    let output = args
        .output
        .clone()
        .or_else(|| config.collection.output_path.as_ref().map(PathBuf::from));

    let shutdown = CancellationToken::new();
    let tracker = TransactionTracker::new();

    let transport: Arc<dyn WorkerTransport> = if args.simulate {
        let ingress: Arc<dyn CompletionIngress> = tracker.clone();
        Arc::new(SimulatedTransport::new(config.simulation.clone(), ingress))
    } else {
        match HttpTransport::new(&config.target, &config.workload) {
            Ok(t) => Arc::new(t),
            Err(e) => {
                tracing::error!(error = %e, "failed to build HTTP transport");
                std::process::exit(1);
            }
        }
    };

    tracing::info!(
        target_url = %config.target.url,
        transport = transport.name(),
        concurrency = config.workload.concurrency_level,
        execution_time_ms = config.workload.execution_time_ms,
        runs = config.effective_runs().len(),
        ingress = %config.ingress.listen_addr,
        "driver starting"
    );

    // Completion ingress
    let ingress_handle = if config.ingress.enabled {
        let addr = config.ingress.listen_addr.clone();
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(addr = %addr, error = %e, "failed to bind completion ingress");
                std::process::exit(1);
            }
        };
        let tracker = Arc::clone(&tracker);
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = ingress::serve(listener, tracker, token).await {
                tracing::error!(error = %e, "completion ingress error");
            }
        }))
    } else {
        None
    };

    // Liveness watcher
    if config.liveness.enabled && !args.simulate {
        match reqwest::Client::builder()
            .timeout(Duration::from_millis(config.target.timeout_ms))
            .build()
        {
            Ok(client) => {
                let base_url = config.target.url.clone();
                let liveness = config.liveness.clone();
                let token = shutdown.clone();
                tokio::spawn(async move {
                    liveness::watch(client, &base_url, &liveness, token).await;
                });
            }
            Err(e) => tracing::warn!(error = %e, "liveness watcher disabled"),
        }
    }

    // Spawn shutdown signal handler
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let mut manager = match WorkloadManager::new(
        config.workload.clone(),
        transport,
        Arc::clone(&tracker),
        shutdown.clone(),
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "failed to configure workload");
            std::process::exit(1);
        }
    };

    let result = experiment::run_experiment(
        &mut manager,
        &config.effective_runs(),
        &config.collection,
        output.as_deref(),
        &shutdown,
    )
    .await;

    shutdown.cancel();
    if let Some(handle) = ingress_handle {
        let _ = handle.await;
    }

    match result {
        Ok(reports) => tracing::info!(runs = reports.len(), "driver finished"),
        Err(e) => {
            tracing::error!(error = %e, "experiment failed");
            std::process::exit(1);
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Defaults when the file is missing; exit when it exists but is invalid.
fn load_config(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file found, using defaults");
        return Config::default_config();
    }
    match Config::load(path) {
        Ok(c) => {
            tracing::info!(path = %path.display(), "loaded config");
            c
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to load config");
            std::process::exit(1);
        }
    }
}

/// Listen for SIGINT (Ctrl+C) or SIGTERM and cancel the shutdown token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    if !token.is_cancelled() {
        tracing::info!("shutdown signal received, abandoning run");
        token.cancel();
    }
}
