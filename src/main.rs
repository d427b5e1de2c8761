use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tanoak::config::ServerConfig;
use tanoak::consensus::LocalConsensus;
use tanoak::machine::SqlMachine;
use tanoak::server::Server;

/// Replicated SQLite server speaking a Redis-compatible protocol.
#[derive(Debug, Parser)]
#[command(name = "tanoak-server", version)]
struct Args {
    /// Bind address.
    #[arg(short = 'H', long, env = "TANOAK_HOST")]
    host: Option<String>,

    /// Bind port.
    #[arg(short, long, env = "TANOAK_PORT")]
    port: Option<u16>,

    /// Data directory for the database and its WAL files.
    #[arg(short, long, env = "TANOAK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Shared auth secret; clients must AUTH before anything else.
    #[arg(short, long, env = "TANOAK_AUTH")]
    auth: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::load().context("loading configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(auth) = args.auth {
        config.auth = Some(auth);
    }

    let machine = Arc::new(
        SqlMachine::open(&config.data_dir, config.reader_pool_cap)
            .with_context(|| format!("opening database under {}", config.data_dir.display()))?,
    );
    let consensus = Arc::new(LocalConsensus::new(Arc::clone(&machine)));

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("binding {}", config.bind_addr()))?;
    info!(name = %config.name, version = %config.version, addr = %config.bind_addr(), "starting server");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            shutdown.cancel();
        }
    });

    let server = Server::new(config, machine, consensus);
    server.run(listener, cancel).await.context("server loop failed")?;
    info!("server stopped");
    Ok(())
}
