//! fecored — the fecore daemon.
//!
//! Single binary that assembles every subsystem behind one HTTP surface:
//! state store (redb), scheduler + idle pools, stats aggregator, evictor,
//! and the axum API. Modeled on the teacher's `warpd` binary: a
//! `clap`-derived `Cli`/`Command` split, `tracing_subscriber::fmt()` with an
//! `EnvFilter`, a `watch` shutdown channel, and
//! `axum::serve(...).with_graceful_shutdown(...)`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use fecore_api::ApiState;
use fecore_evictor::EvictorDaemon;
use fecore_policy::PolicyController;
use fecore_pool::{CapacityGuard, NetNsPool};
use fecore_proxy::InvocationProxy;
use fecore_scheduler::{FunctionStore, LocalNativeDriver, LocalWasmDriver, ReplicaFactory, Resolver};
use fecore_stats::StatsAggregator;
use fecore_state::StateStore;
use fecore_types::Config;

#[derive(Parser)]
#[command(name = "fecored", about = "fecore daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load config, assemble every subsystem, and serve the HTTP API.
    Serve {
        #[arg(long, default_value = "fecored.json")]
        config: PathBuf,

        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: SocketAddr,

        /// Directory holding the persisted redb file, when the config
        /// enables `use_database`.
        #[arg(long, default_value = "./fecored-data")]
        data_dir: PathBuf,
    },
    /// Load and validate a config file, print it resolved as JSON, exit.
    CheckConfig {
        #[arg(long, default_value = "fecored.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fecored=debug,fecore=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, addr, data_dir } => serve(config, addr, data_dir).await,
        Command::CheckConfig { config } => check_config(config),
    }
}

fn check_config(config_path: PathBuf) -> anyhow::Result<()> {
    let config = Config::from_file(&config_path)?;
    println!("{}", config.to_json_string()?);
    Ok(())
}

async fn serve(config_path: PathBuf, addr: SocketAddr, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("fecore daemon starting");

    let config = Config::from_file(&config_path)?;

    let state = if config.use_database {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join("fecore.redb");
        info!(path = ?db_path, "opening state store");
        StateStore::open(&db_path)?
    } else {
        info!("use_database=false, running with an in-memory state store");
        StateStore::open_in_memory()?
    };

    let capacity = CapacityGuard::new(config.max_native_containers, config.max_wasm_containers);
    let netns = NetNsPool::new(config.max_wasm_containers as usize);

    let store = Arc::new(FunctionStore::load_from_state(state, capacity, netns).await?);
    info!("function store reconstructed from persisted state");

    let factory = Arc::new(ReplicaFactory::new(
        store.clone(),
        Arc::new(LocalNativeDriver::default()),
        Arc::new(LocalWasmDriver),
    ));
    let resolver = Arc::new(Resolver::new(store.clone(), factory.clone()));
    let policy = Arc::new(PolicyController::new(store.clone()));
    let stats = StatsAggregator::spawn(store.clone(), policy.clone(), config.invocation_sample_threshold);
    let proxy = Arc::new(InvocationProxy::new(store.clone(), resolver.clone(), stats));
    let evictor = Arc::new(EvictorDaemon::new(
        store.clone(),
        factory.clone(),
        Duration::from_secs(config.container_expiration_time),
    ));
    let ipam = Arc::new(fecore_api::IpamIndex::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let evictor_task = tokio::spawn({
        let evictor = evictor.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move {
            evictor
                .run(Duration::from_secs(config.container_cleanup_interval), shutdown_rx)
                .await;
        }
    });

    let api_state = ApiState { store, factory, resolver, proxy, policy, ipam };
    let router = fecore_api::build_router(api_state);

    info!(%addr, "HTTP server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = evictor_task.await;
    info!("fecore daemon stopped");
    Ok(())
}
