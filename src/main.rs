use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, info, warn};

use gameoflife::client::{HttpClient, LocalClient};
use gameoflife::config::Params;
use gameoflife::controller::{Controller, Event, Key};
use gameoflife::grid::World;
use gameoflife::io::{InputSource, PgmStore};
use gameoflife::session::ComputeSession;

/// Run a Game of Life simulation, locally or against a compute server.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value_t = 512)]
    width: usize,
    #[arg(long, default_value_t = 512)]
    height: usize,
    #[arg(long, default_value_t = 10_000)]
    turns: usize,
    #[arg(long, default_value_t = 8)]
    threads: usize,
    /// Compute server URL, e.g. http://127.0.0.1:8080. Runs in-process if absent.
    #[arg(long)]
    server: Option<String>,
    /// Directory holding `{width}x{height}.pgm`.
    #[arg(long, default_value = "images")]
    images: PathBuf,
    /// Directory for saved worlds.
    #[arg(long, default_value = "out")]
    out: PathBuf,
    /// Progress sampling interval.
    #[arg(long, default_value_t = 2000)]
    poll_ms: u64,
    /// Start from a random soup with this density instead of an image.
    #[arg(long)]
    soup: Option<f32>,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Forward `p`, `s`, `q` and `k` typed on stdin (one per line) as keys.
///
/// A plain thread: a blocking stdin read inside the runtime would stall
/// its shutdown.
fn spawn_key_reader(tx: UnboundedSender<Key>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { return };
            for key in line.chars().filter_map(Key::from_char) {
                if tx.send(key).is_err() {
                    return;
                }
            }
        }
    });
}

async fn print_events(mut rx: UnboundedReceiver<Event>) {
    while let Some(event) = rx.recv().await {
        match event {
            Event::CellFlipped { .. } | Event::TurnComplete { .. } => debug!("{event}"),
            _ => info!("{event}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let params = Params {
        width: args.width,
        height: args.height,
        turns: args.turns,
        threads: args.threads,
    };
    params.validate().context("invalid parameters")?;

    let mut store = PgmStore::new(args.images.clone(), args.out.clone());
    let world = match args.soup {
        Some(density) => World::random(params.width, params.height, density, args.seed),
        None => store
            .read_world(&params.input_name(), params.width, params.height)
            .with_context(|| format!("reading {}", params.input_name()))?,
    };
    info!(
        width = params.width,
        height = params.height,
        turns = params.turns,
        threads = params.threads,
        alive = world.alive_count(),
        "controller.start"
    );

    let (events_tx, events_rx) = unbounded_channel();
    let printer = tokio::spawn(print_events(events_rx));
    let (keys_tx, keys_rx) = unbounded_channel();
    spawn_key_reader(keys_tx);
    let poll = Duration::from_millis(args.poll_ms);

    let outcome = match &args.server {
        Some(url) => {
            let client = HttpClient::new(url.as_str());
            let mut controller = Controller::new(client, store, params, events_tx).poll_interval(poll);
            controller.run(world, keys_rx).await
        }
        None => {
            let session = Arc::new(ComputeSession::new());
            let client = LocalClient::with_turn_events(session, events_tx.clone());
            let mut controller = Controller::new(client, store, params, events_tx).poll_interval(poll);
            controller.run(world, keys_rx).await
        }
    };

    // Every sender is gone once the controller is dropped.
    if let Err(e) = printer.await {
        warn!(error = %e, "event printer failed");
    }
    let outcome = outcome.context("simulation aborted")?;
    info!(turn = outcome.turn, alive = outcome.alive_cells.len(), "controller.finished");
    Ok(())
}
