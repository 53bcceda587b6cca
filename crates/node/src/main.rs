// node/src/main.rs
use chain_sync::{ConnectedNodesInfo, PeerRegistry, StageClassifier};
use clap::{Parser, Subcommand};
use ledger_core::{chronological_window_for_root, Timestamp};
use node::NodeConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ledger-node")]
#[command(about = "Multi-chain ledger node", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a data directory with a default configuration
    Init {
        /// Data directory
        #[arg(short, long, default_value = "./data")]
        data_dir: String,
    },

    /// Classify the sync stage for a consensus root hash timestamp
    Stage {
        /// Timestamp the root hash was saved at
        timestamp: Timestamp,

        /// Configuration file path
        #[arg(short, long, default_value = "./config.toml")]
        config: String,

        /// Classify as of this time instead of now
        #[arg(long)]
        now: Option<Timestamp>,
    },

    /// Generate a chain owner keypair
    Keygen {
        /// Output path
        #[arg(short, long)]
        output: String,
    },

    /// Print the effective configuration
    ShowConfig {
        /// Configuration file path
        #[arg(short, long, default_value = "./config.toml")]
        config: String,
    },

    /// Print the peer snapshot of the bootstrap peers
    Peers {
        /// Configuration file path
        #[arg(short, long, default_value = "./config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("ledger_node={0},node={0},chain_sync={0},ledger_core={0}", log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Init { data_dir } => {
            init_node(&data_dir)?;
        }
        Commands::Stage { timestamp, config, now } => {
            show_stage(&config, timestamp, now)?;
        }
        Commands::Keygen { output } => {
            keygen(&output)?;
        }
        Commands::ShowConfig { config } => {
            let config = load_config(&config)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Peers { config } => {
            show_peers(&config).await?;
        }
    }

    Ok(())
}

/// Configuration from `path`, or the defaults if there is no such file
fn load_config(path: &str) -> anyhow::Result<NodeConfig> {
    if std::path::Path::new(path).exists() {
        tracing::debug!("Loading configuration from {}", path);
        NodeConfig::from_file(path)
    } else {
        tracing::warn!("No configuration at {}, using defaults", path);
        Ok(NodeConfig::default())
    }
}

fn init_node(data_dir: &str) -> anyhow::Result<()> {
    tracing::info!("Initializing node at {}", data_dir);

    std::fs::create_dir_all(format!("{}/db", data_dir))?;
    std::fs::create_dir_all(format!("{}/keys", data_dir))?;

    let config = NodeConfig {
        data_dir: data_dir.to_string(),
        ..NodeConfig::default()
    };
    config.to_file(format!("{}/config.toml", data_dir))?;

    tracing::info!("Node initialized successfully at {}", data_dir);
    tracing::info!("Edit {}/config.toml to configure your node", data_dir);

    Ok(())
}

fn show_stage(config_path: &str, timestamp: Timestamp, now: Option<Timestamp>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let classifier = StageClassifier::from_config(&config.sync_config());

    let stage = match now {
        Some(now) => classifier.classify_at(timestamp, now),
        None => classifier.classify(timestamp),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "timestamp_for_root_hash": timestamp,
            "chronological_window": chronological_window_for_root(timestamp),
            "sync_stage": stage.to_string(),
        }))?
    );
    Ok(())
}

fn keygen(output: &str) -> anyhow::Result<()> {
    use ledger_crypto::KeyPair;

    tracing::info!("Generating chain owner keypair");
    let keypair = KeyPair::generate();

    let key_json = serde_json::json!({
        "public_key": keypair.public_key().to_hex(),
        "secret_key": keypair.secret_key().to_hex(),
        "address": keypair.address().to_hex(),
    });

    std::fs::write(output, serde_json::to_string_pretty(&key_json)?)?;
    tracing::info!("Keypair saved to {}", output);
    tracing::warn!("Keep this file secure!");

    Ok(())
}

async fn show_peers(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let registry = PeerRegistry::new();
    for (peer, address) in config.bootstrap_nodes()? {
        registry.register(peer, address, 0).await;
    }

    let snapshot = ConnectedNodesInfo::generate(&registry).await;
    println!("{}", snapshot.to_json()?);
    Ok(())
}
