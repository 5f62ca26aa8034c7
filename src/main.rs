use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gymload::{importer, AppConfig, Controller, HolidayFetcher, LoadFetcher, Result, Store};

#[derive(Debug, Parser)]
#[command(name = "gymload", version, about = "Gym occupancy telemetry pipeline")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Import events from a CSV file and exit
    #[arg(long)]
    import: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = AppConfig::load(&cli.config)?;
    init_logging(cfg.base.debug);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        debug = cfg.base.debug,
        "starting"
    );

    let store = Store::connect(&cfg.database.path, cfg.database.query_timeout()).await?;

    if let Some(path) = &cli.import {
        info!(path = %path.display(), "importing data");
        importer::import_csv(&store, path, cfg.base.timezone()?).await?;
        return Ok(());
    }

    let (shutdown_tx, _) = broadcast::channel(1);

    let (fetch_handle, event_rx) = if cfg.fetcher.active {
        let fetcher = LoadFetcher::new(store.clone(), &cfg.fetcher, &cfg.database);
        let (handle, rx) = fetcher.run(shutdown_tx.subscribe()).await?;
        (handle, Some(rx))
    } else {
        info!("fetcher is inactive");
        (noop_worker(), None)
    };

    let holiday_handle = if cfg.holidayer.active {
        let holidayer = HolidayFetcher::new(
            store.clone(),
            cfg.base.timezone()?,
            &cfg.holidayer,
            &cfg.database,
        );
        holidayer.run(shutdown_tx.subscribe()).await?
    } else {
        info!("holidayer is inactive");
        noop_worker()
    };

    let controller_handle = if cfg.predictor.active {
        let mut controller = Controller::new(&store, event_rx, &cfg).await?;
        controller.run(shutdown_tx.subscribe())
    } else if let Some(mut rx) = event_rx {
        // keep the capacity-1 event channel drained so the fetcher never
        // blocks on send
        info!("predictor is inactive, discarding events");
        tokio::spawn(async move { while rx.recv().await.is_some() {} })
    } else {
        info!("predictor is inactive");
        noop_worker()
    };

    shutdown_signal().await;
    info!("shutting down");
    let _ = shutdown_tx.send(());

    for (name, handle) in [
        ("predictor controller", controller_handle),
        ("holidayer", holiday_handle),
        ("fetcher", fetch_handle),
    ] {
        if let Err(e) = handle.await {
            error!(worker = name, error = %e, "worker terminated abnormally");
        }
    }

    info!("stopped");
    Ok(())
}

/// An already-completed handle for inactive workers, so shutdown can await
/// everything in a fixed order.
fn noop_worker() -> JoinHandle<()> {
    tokio::spawn(async {})
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{default_level},sqlx=warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
