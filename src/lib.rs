pub mod client;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod grid;
pub mod io;
pub mod pool;
pub mod protocol;
pub mod rng;
pub mod server;
pub mod session;

use std::time::Instant;

use config::Params;
use error::GolError;
use grid::World;
use pool::WorkerPool;

pub use session::{ComputeSession, ControlKey, Phase};

/// Advance `world` by `params.turns` turns with no session around it.
pub fn simulate(world: World, params: &Params) -> Result<World, GolError> {
    params.check_world(&world)?;
    let pool = WorkerPool::new(params.threads)?;
    let start = Instant::now();
    let mut world = world;
    for _ in 0..params.turns {
        world = pool.compute_next_state(&world)?.0;
    }
    tracing::debug!(
        turns = params.turns,
        ms = start.elapsed().as_secs_f64() * 1000.0,
        "simulate"
    );
    Ok(world)
}
