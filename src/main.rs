//! Curve Guardian - autonomous launchpad trading node
//!
//! # WARNING
//! - This node trades with real funds. Only use funds you can afford to lose.
//! - Most launchpad tokens go to zero (rug pulls, abandonment).
//! - The defense pipeline reacts to on-chain threats; it cannot prevent them.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use curve_guardian::config::Config;
use curve_guardian::infra::{Db, KvStore, RpcContext};
use curve_guardian::node::Node;

/// Autonomous launchpad trading node
#[derive(Parser)]
#[command(name = "guardian")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading node
    Start,

    /// Show current configuration (secrets masked)
    Config,

    /// Check connectivity to RPC, database and KV store
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_logging(&config);

    match cli.command {
        Commands::Start => {
            info!("Starting node {}", config.signals.node_id);
            let node = Node::start(config).await?;
            node.run().await?;
        }
        Commands::Config => {
            println!("{}", config.masked_display());
        }
        Commands::Health => {
            run_health_check(&config).await;
        }
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    if config.logging.node_env == "production" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_health_check(config: &Config) {
    match RpcContext::new(&config.rpc, &config.wallet) {
        Ok(rpc) => match rpc.health_check().await {
            Ok(slot) => println!("RPC:      ok (slot {})", slot),
            Err(e) => println!("RPC:      FAILED ({})", e),
        },
        Err(e) => println!("RPC:      FAILED ({})", e),
    }

    match Db::connect(&config.database.url).await {
        Ok(db) => match db.ping().await {
            Ok(()) => println!("Database: ok"),
            Err(e) => println!("Database: FAILED ({})", e),
        },
        Err(e) => {
            error!("Database connect failed: {}", e);
            println!("Database: FAILED ({})", e);
        }
    }

    match KvStore::connect(&config.kv.url).await {
        Ok(kv) => match kv.ping().await {
            Ok(()) => println!("KV store: ok"),
            Err(e) => println!("KV store: FAILED ({})", e),
        },
        Err(e) => println!("KV store: FAILED ({})", e),
    }
}
