use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use gameoflife::config::DEFAULT_PORT;
use gameoflife::server;
use gameoflife::session::ComputeSession;

/// Game of Life compute server.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Listen on all interfaces instead of loopback only.
    #[arg(long)]
    public: bool,
    /// Build the worker pool for this many bands up front.
    #[arg(long)]
    threads: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let args = Args::parse();
    let session = match args.threads {
        Some(n) => ComputeSession::with_threads(n).context("building worker pool")?,
        None => ComputeSession::new(),
    };

    let ip = if args.public { [0, 0, 0, 0] } else { [127, 0, 0, 1] };
    let addr = SocketAddr::from((ip, args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    server::serve(listener, Arc::new(session)).await.context("serving")?;
    tracing::info!("server.stopped");
    Ok(())
}
