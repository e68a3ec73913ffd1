//! Bag cache manager binary.

use anyhow::{Context, Result};
use bagcache_cachemgr::RequestProcessor;
use bagcache_core::CacheOpts;
use bagcache_daemon::{AppState, load_config};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const WATCHDOG_PERIOD: Duration = Duration::from_secs(60);

/// bagcached - cache manager for data restored from preservation bags
#[derive(Parser, Debug)]
#[command(name = "bagcached")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "BAGCACHE_CONFIG",
        default_value = "config/bagcache.toml"
    )]
    config: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service: caching queue, integrity monitor and watchdog
    Serve,
    /// Cache a file or a whole dataset
    Cache {
        /// Dataset id, `dsid/filepath`, optionally suffixed with `#version`
        id: String,
        /// Fetch again even if already cached
        #[arg(long)]
        recache: bool,
        /// Add to the caching queue instead of caching now
        #[arg(long)]
        queue: bool,
        /// Label recorded on the cached objects
        #[arg(long)]
        seq: Option<String>,
    },
    /// Run the integrity monitor
    Monitor {
        /// Run a single cycle and print its report
        #[arg(long)]
        once: bool,
    },
    /// Print volume summaries
    Status {
        #[arg(long)]
        volume: Option<String>,
    },
    /// Print per-dataset totals
    Contents {
        #[arg(long)]
        volume: Option<String>,
    },
    /// Print the cached files of a dataset
    Dataset { dsid: String },
    /// Print the newest cached copy of a file
    Describe { dsid: String, filepath: String },
    /// Print the caching queue status
    Queue,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = load_config(Path::new(&args.config))?;
    let state = Arc::new(AppState::from_config(config).await?);

    match args.command {
        Command::Serve => serve(state).await,
        Command::Cache {
            id,
            recache,
            queue,
            seq,
        } => {
            let opts = CacheOpts {
                recache,
                seq,
                ..Default::default()
            };
            if queue {
                state
                    .manager
                    .queue_runner()
                    .queue()
                    .enqueue(&id, &opts)
                    .await
                    .with_context(|| format!("failed to queue {id}"))?;
                tracing::info!(id = %id, "Queued for caching");
            } else {
                state
                    .manager
                    .process_request(&id, &opts)
                    .await
                    .with_context(|| format!("failed to cache {id}"))?;
                tracing::info!(id = %id, "Cached");
            }
            Ok(())
        }
        Command::Monitor { once } => {
            if once {
                let report = state.monitor.worker().run_cycle().await?;
                print_json(&report)
            } else {
                run_monitor(&state).await
            }
        }
        Command::Status { volume } => match volume {
            Some(name) => print_json(&state.manager.summarize_volume(&name).await?),
            None => print_json(&state.manager.summarize_volumes().await?),
        },
        Command::Contents { volume } => {
            print_json(&state.manager.summarize_contents(volume.as_deref()).await?)
        }
        Command::Dataset { dsid } => {
            let objects = state
                .manager
                .select_dataset_objects(&dsid, bagcache_core::roles::VolumeStatus::InfoOnly)
                .await?;
            print_json(&objects)
        }
        Command::Describe { dsid, filepath } => {
            let object = state
                .manager
                .describe_object(&dsid, &filepath, bagcache_core::roles::VolumeStatus::InfoOnly)
                .await?
                .with_context(|| format!("{dsid}/{filepath} is not cached"))?;
            print_json(&object)
        }
        Command::Queue => print_json(&state.manager.caching_queue_status().await?),
    }
}

async fn serve(state: Arc<AppState>) -> Result<()> {
    tracing::info!("bagcached v{}", env!("CARGO_PKG_VERSION"));

    if state.manager.resume_queue().await? {
        tracing::info!("Resumed pending caching requests");
    }

    if state.config.monitor.enabled {
        state.monitor.start();
        tracing::info!(
            duty_cycle_secs = state.config.monitor.duty_cycle_secs,
            "Integrity monitor started"
        );
    } else {
        tracing::info!("Integrity monitor disabled");
    }

    let watchdog = state.clone().spawn_watchdog(WATCHDOG_PERIOD);
    tracing::info!("Worker watchdog spawned");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    watchdog.abort();
    state.shutdown().await;
    Ok(())
}

async fn run_monitor(state: &AppState) -> Result<()> {
    state.monitor.start();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for shutdown signal")?;
                tracing::info!("Stopping integrity monitor");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                if !state.monitor.is_running() {
                    break;
                }
            }
        }
    }
    state.monitor.stop_and_wait().await;
    print_json(&state.monitor.status().await?)
}
