#![forbid(unsafe_code)]

use burrow::config::{self, Cli, Commands};
use burrow::manager::ForwardManager;
use burrow_common::base58;
use burrow_common::keys::RootKeyPair;
use burrow_overlay::{MemoryTransport, Node};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };

    if let Some(ref path) = cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open log file {path:?}: {e}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let settings = config::load_settings(cli.config.as_deref())?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid settings: {e}"))?;

    let specs = match &cli.command {
        Commands::Identity { secret } => {
            let root = RootKeyPair::from_secret(secret.as_bytes());
            println!("{}", base58::encode(&root.public()));
            return Ok(());
        }
        Commands::Serve {
            secret,
            tcp,
            udp,
            tcpudp,
            host,
        } => config::server_specs(secret, tcp, udp, tcpudp, host),
        Commands::Connect { peer, forwards } => {
            config::client_specs(peer, forwards).map_err(|e| anyhow::anyhow!(e))?
        }
        Commands::Run { file } => config::load_forwards(file)?,
    };

    // One overlay node per process; every forward, of either role, shares it.
    let node = Node::start(MemoryTransport::new());

    let manager = ForwardManager::start(node, specs, &settings).await?;
    for announcement in manager.announcements() {
        println!("{announcement}");
    }
    info!(forwards = manager.forward_count(), "startup complete");

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    manager.shutdown().await;

    Ok(())
}
