//! Meta server binary

use clap::{Parser, Subcommand};
use minimeta::common::{parse_duration, Config, StoreBackend};
use minimeta::MetaServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minimeta-server")]
#[command(about = "minimeta meta server: app metadata and replica configuration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start meta server
    Serve {
        /// Node ID
        #[arg(long)]
        id: Option<String>,

        /// Config file
        #[arg(long, default_value = "minimeta.toml")]
        config: PathBuf,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Coordination store backend (memory, rocksdb, sled)
        #[arg(long)]
        store: Option<String>,

        /// Coordination store directory
        #[arg(long)]
        store_path: Option<PathBuf>,

        /// Root path of cluster state in the store
        #[arg(long)]
        cluster_root: Option<String>,

        /// Deadline for a single store call (e.g. "500ms", "5s")
        #[arg(long)]
        persistence_timeout: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            config,
            bind,
            store,
            store_path,
            cluster_root,
            persistence_timeout,
        } => {
            // File and environment first, CLI flags on top
            let mut config = Config::load_from(&config)?;
            if let Some(id) = id {
                config.node_id = id;
            }
            if let Some(bind) = bind {
                config.meta.bind_addr = bind;
            }
            if let Some(store) = store {
                config.meta.store = store.parse::<StoreBackend>()?;
            }
            if let Some(path) = store_path {
                config.meta.store_path = path;
            }
            if let Some(root) = cluster_root {
                config.meta.cluster_root = root;
            }
            if let Some(timeout) = persistence_timeout {
                config.meta.persistence_timeout_ms = parse_duration(&timeout)?.as_millis() as u64;
            }
            config.meta.validate()?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let server = MetaServer::new(config.meta, config.node_id);
            server.serve().await?;
        }
    }

    Ok(())
}
