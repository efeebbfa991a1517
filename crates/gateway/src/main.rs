use clap::Parser;
use kestrel_event_log::{FileEventLog, InMemoryEventLog};
use kestrel_gateway::{Gateway, GatewayConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Kestrel gateway - JSON RPC front for event-sourced trader entities
#[derive(Debug, Parser)]
#[command(name = "kestrel-gateway", version)]
struct Args {
    /// Load configuration from a JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Persist events under this directory instead of in memory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Listen port (overrides config and PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kestrel=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            GatewayConfig::from_file(path)?
        }
        None => GatewayConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(dir) = args.data_dir {
        config.server.data_dir = Some(dir);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    match config.server.data_dir.clone() {
        Some(dir) => {
            tracing::info!("Event log: files under {}", dir.display());
            let log = Arc::new(FileEventLog::open(dir).await?);
            Gateway::new(config, log).serve().await
        }
        None => {
            tracing::info!("Event log: in memory");
            let log = Arc::new(InMemoryEventLog::new());
            Gateway::new(config, log).serve().await
        }
    }
}
