use clap::{Parser, Subcommand, ValueEnum};
use gpushare_core::InventoryFile;
use gpushare_extender::{
    ApiServerBinder, AppState, Config as ExtenderConfig, ExtenderServer, NoopBinder, PodBinder,
};
use gpushare_scheduler::{Inventory, InventoryConfig, Scheduler, SchedulerConfig, ScoringPolicy};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "gpushare", about = "GPU-sharing kube-scheduler extender")]
struct Cli {
    /// Log output format
    #[arg(long, global = true, env = "GPUSHARE_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the extender HTTP server
    Serve {
        /// Address to listen on
        #[arg(long, env = "GPUSHARE_BIND", default_value = "0.0.0.0:39999")]
        bind: String,
        /// YAML file seeding the device inventory
        #[arg(long, env = "GPUSHARE_INVENTORY")]
        inventory: Option<String>,
        /// Node scoring policy (binpack or spread)
        #[arg(long, env = "GPUSHARE_POLICY", default_value = "binpack")]
        policy: ScoringPolicy,
        /// Kubernetes API server URL; bindings are posted there when set
        #[arg(long, env = "GPUSHARE_APISERVER")]
        apiserver: Option<String>,
        /// Report nodes not synced within this many seconds as unknown
        #[arg(long, env = "GPUSHARE_STALE_AFTER_SECS")]
        stale_after_secs: Option<u64>,
        /// How long a reservation waits for a busy device
        #[arg(long, env = "GPUSHARE_RESERVE_TIMEOUT_MS", default_value_t = 10)]
        reserve_timeout_ms: u64,
        /// How long a filtered pod is remembered for its bind call
        #[arg(long, env = "GPUSHARE_ATTEMPT_TTL_SECS", default_value_t = 600)]
        attempt_ttl_secs: u64,
    },
    /// Validate an inventory file and print its summary
    Check {
        /// Path to the inventory YAML
        path: String,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    match cli.command {
        Commands::Serve {
            bind,
            inventory,
            policy,
            apiserver,
            stale_after_secs,
            reserve_timeout_ms,
            attempt_ttl_secs,
        } => {
            let inventory_config = InventoryConfig {
                stale_after: stale_after_secs.map(Duration::from_secs),
                reserve_timeout: Duration::from_millis(reserve_timeout_ms),
            };
            let scheduler_config = SchedulerConfig {
                policy,
                attempt_ttl: Duration::from_secs(attempt_ttl_secs),
            };
            run_serve(
                &bind,
                inventory.as_deref(),
                apiserver.as_deref(),
                inventory_config,
                scheduler_config,
            )
            .await
        }
        Commands::Check { path } => run_check(&path),
    }
}

/// Run the extender until ctrl-c
async fn run_serve(
    bind: &str,
    inventory_path: Option<&str>,
    apiserver: Option<&str>,
    inventory_config: InventoryConfig,
    scheduler_config: SchedulerConfig,
) -> miette::Result<()> {
    info!(
        "Starting gpushare extender with {} policy",
        scheduler_config.policy
    );

    let listen_addr: std::net::SocketAddr = bind
        .parse()
        .map_err(|e| miette::miette!("Invalid bind address '{}': {}", bind, e))?;

    let inventory = Arc::new(Inventory::new(inventory_config));
    if let Some(path) = inventory_path {
        let nodes = seed_inventory(&inventory, Path::new(path))?;
        info!("Seeded inventory with {} nodes from {}", nodes, path);
    }

    let binder: Arc<dyn PodBinder> = match apiserver {
        Some(url) => {
            info!("Posting bindings to API server at {}", url);
            Arc::new(ApiServerBinder::new(url))
        }
        None => Arc::new(NoopBinder),
    };

    let scheduler = Arc::new(Scheduler::new(inventory.clone(), scheduler_config));
    let state = Arc::new(AppState::new(inventory, scheduler, binder));

    let token = CancellationToken::new();
    let server = ExtenderServer::new(ExtenderConfig { listen_addr }, state);
    let server_token = token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(server_token).await {
            error!("Extender server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    let shutdown_timeout = Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, server_handle).await;

    info!("Shutdown complete");

    Ok(())
}

/// Validate an inventory file and print its summary
fn run_check(path: &str) -> miette::Result<()> {
    let inventory = Inventory::default();
    seed_inventory(&inventory, Path::new(path))?;

    let summary = serde_json::to_string_pretty(&inventory.summary())
        .map_err(|e| miette::miette!("Failed to render summary: {}", e))?;
    println!("{}", summary);

    Ok(())
}

/// Load the seed file into the inventory, returning the node count
fn seed_inventory(inventory: &Inventory, path: &Path) -> miette::Result<usize> {
    let file = InventoryFile::load(path)?;

    for node in &file.nodes {
        inventory.upsert_node(&node.name, node.to_devices()?);
    }

    Ok(file.nodes.len())
}
