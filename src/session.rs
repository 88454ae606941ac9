//! Stateful compute session.
//!
//! A session owns one simulation's world and turn counter. One thread drives
//! the run loop (`ActiveRun::drive`); any number of other threads may call
//! [`ComputeSession::status`] and [`ComputeSession::control`] concurrently.
//!
//! Locking: the world is held as an `Arc` snapshot behind a mutex. The run
//! loop takes the lock only to read flags, clone the snapshot, and commit the
//! next world, never while a turn is computing. Status and control therefore
//! never wait for an in-flight turn; they observe the last committed turn.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Params;
use crate::error::GolError;
use crate::grid::{Cell, World};
use crate::pool::WorkerPool;

/// Externally visible session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// No run has been started.
    Idle,
    Running,
    Paused,
    /// Quit requested, loop exits at the next turn boundary.
    Quitting,
    /// Last run ended, by completion or quit.
    Finished,
}

/// Control commands accepted while a run is in progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKey {
    Pause,
    Resume,
    Quit,
    Snapshot,
    /// Quit, and ask whoever hosts the session to shut down.
    Kill,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Sequence number of the current or last run; 0 before the first.
    pub run: u64,
    pub turn: usize,
    pub alive_count: usize,
    pub phase: Phase,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlReply {
    /// The run the command was applied to, as in [`Status::run`].
    pub run: u64,
    pub turn: usize,
    pub paused: bool,
    pub phase: Phase,
    /// Present for snapshot, quit and kill.
    pub world: Option<World>,
    /// Present for quit and kill.
    pub alive_cells: Option<Vec<Cell>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    pub world: World,
    pub turn: usize,
    pub alive_cells: Vec<Cell>,
    /// True if the run ended on a quit rather than by reaching `turns`.
    pub quit: bool,
}

/// Handed to the run observer after each committed turn.
pub struct TurnReport<'a> {
    pub turn: usize,
    pub flipped: &'a [Cell],
    pub world: &'a World,
}

struct SessionState {
    world: Arc<World>,
    run: u64,
    turn: usize,
    paused: bool,
    quit: bool,
    running: bool,
}

impl SessionState {
    fn phase(&self) -> Phase {
        match (self.run > 0, self.running, self.quit, self.paused) {
            (false, ..) => Phase::Idle,
            (true, false, ..) => Phase::Finished,
            (true, true, true, _) => Phase::Quitting,
            (true, true, false, true) => Phase::Paused,
            (true, true, false, false) => Phase::Running,
        }
    }
}

pub struct ComputeSession {
    state: Mutex<SessionState>,
    wake: Condvar,
    pool: Mutex<Option<Arc<WorkerPool>>>,
}

impl Default for ComputeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeSession {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState {
                world: Arc::new(World::new(0, 0)),
                run: 0,
                turn: 0,
                paused: false,
                quit: false,
                running: false,
            }),
            wake: Condvar::new(),
            pool: Mutex::new(None),
        }
    }

    /// A session whose worker pool is built up front for `threads` bands.
    pub fn with_threads(threads: usize) -> Result<Self, GolError> {
        let session = Self::new();
        *session.pool.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Arc::new(WorkerPool::new(threads)?));
        Ok(session)
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reuse the cached pool if it has the right size, otherwise replace it.
    fn pool_for(cached: &mut Option<Arc<WorkerPool>>, threads: usize) -> Result<Arc<WorkerPool>, GolError> {
        match cached.as_ref() {
            Some(pool) if pool.threads() == threads => Ok(Arc::clone(pool)),
            _ => {
                debug!(threads, "pool.build");
                let pool = Arc::new(WorkerPool::new(threads)?);
                *cached = Some(Arc::clone(&pool));
                Ok(pool)
            }
        }
    }

    /// Validate and claim the session for a new run.
    ///
    /// On error the session is left untouched. Once this returns, control
    /// commands target the new run even before it is driven.
    pub fn begin(self: &Arc<Self>, world: World, params: Params) -> Result<ActiveRun, GolError> {
        params.check_world(&world)?;
        // Held until the run is claimed: begins are serialized, so nothing
        // else can set `running` between the busy check and the claim.
        let mut cached = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        {
            let st = self.lock();
            if st.running {
                return Err(GolError::Busy { turn: st.turn });
            }
        }
        let pool = Self::pool_for(&mut cached, params.threads)?;
        let id = {
            let mut st = self.lock();
            st.world = Arc::new(world);
            st.run += 1;
            st.turn = 0;
            st.paused = false;
            st.quit = false;
            st.running = true;
            st.run
        };
        drop(cached);
        info!(
            run = id,
            width = params.width,
            height = params.height,
            turns = params.turns,
            threads = params.threads,
            "run.begin"
        );
        Ok(ActiveRun {
            session: Arc::clone(self),
            id,
            params,
            pool,
        })
    }

    /// Run to completion or quit on the calling thread.
    pub fn run(self: &Arc<Self>, world: World, params: Params) -> Result<RunOutcome, GolError> {
        self.begin(world, params)?.drive(|_| {})
    }

    /// Turn and alive count of the last committed turn.
    pub fn status(&self) -> Status {
        let (world, run, turn, phase) = {
            let st = self.lock();
            (Arc::clone(&st.world), st.run, st.turn, st.phase())
        };
        Status {
            run,
            turn,
            alive_count: world.alive_count(),
            phase,
        }
    }

    /// Apply a control command. Commands that do not apply to the current
    /// phase (pause when paused, resume when running, quit when finished)
    /// are no-ops.
    pub fn control(&self, key: ControlKey) -> ControlReply {
        let (world, run, turn, paused, phase) = {
            let mut st = self.lock();
            match key {
                ControlKey::Pause => {
                    if st.running && !st.quit && !st.paused {
                        st.paused = true;
                        info!(turn = st.turn, "run.paused");
                    }
                }
                ControlKey::Resume => {
                    if st.paused {
                        st.paused = false;
                        info!(turn = st.turn, "run.resumed");
                        self.wake.notify_all();
                    }
                }
                ControlKey::Quit | ControlKey::Kill => {
                    if st.running && !st.quit {
                        st.quit = true;
                        info!(turn = st.turn, ?key, "run.quit_requested");
                        self.wake.notify_all();
                    }
                }
                ControlKey::Snapshot => {}
            }
            (Arc::clone(&st.world), st.run, st.turn, st.paused, st.phase())
        };

        let wants_world = matches!(key, ControlKey::Snapshot | ControlKey::Quit | ControlKey::Kill);
        let wants_cells = matches!(key, ControlKey::Quit | ControlKey::Kill);
        ControlReply {
            run,
            turn,
            paused,
            phase,
            alive_cells: wants_cells.then(|| world.alive_cells()),
            world: wants_world.then(|| World::clone(&world)),
        }
    }

    /// Quit run `run` if it is still the one in progress. Returns whether
    /// a quit was requested. Used when whoever started the run goes away.
    pub fn abandon(&self, run: u64) -> bool {
        let mut st = self.lock();
        if st.run != run || !st.running || st.quit {
            return false;
        }
        st.quit = true;
        warn!(run, turn = st.turn, "run.abandoned");
        self.wake.notify_all();
        true
    }
}

/// A claimed run. Driving it executes the turn loop; dropping it (driven or
/// not) releases the session.
pub struct ActiveRun {
    session: Arc<ComputeSession>,
    id: u64,
    params: Params,
    pool: Arc<WorkerPool>,
}

impl std::fmt::Debug for ActiveRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveRun")
            .field("id", &self.id)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl ActiveRun {
    /// This run's sequence number, as reported in [`Status::run`].
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Execute turns until `params.turns` is reached or quit is requested.
    ///
    /// `observe` is called after each committed turn, without the session
    /// lock held. A turn that was in flight when quit arrived is discarded,
    /// so the returned world is the one quit replied with.
    pub fn drive<F>(self, mut observe: F) -> Result<RunOutcome, GolError>
    where
        F: FnMut(TurnReport<'_>),
    {
        let session = &self.session;
        loop {
            let snapshot = {
                let mut st = session.lock();
                loop {
                    if st.quit || st.turn >= self.params.turns {
                        let outcome = RunOutcome {
                            world: World::clone(&st.world),
                            turn: st.turn,
                            alive_cells: st.world.alive_cells(),
                            quit: st.quit,
                        };
                        info!(
                            turn = outcome.turn,
                            alive = outcome.alive_cells.len(),
                            quit = outcome.quit,
                            "run.finished"
                        );
                        return Ok(outcome);
                    }
                    if !st.paused {
                        break Arc::clone(&st.world);
                    }
                    st = session.wake.wait(st).unwrap_or_else(|e| e.into_inner());
                }
            };

            let (next, flipped) = match self.pool.compute_next_state(&snapshot) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "run.aborted");
                    return Err(e);
                }
            };

            let (turn, world) = {
                let mut st = session.lock();
                if st.quit {
                    debug!(turn = st.turn, "turn.discarded");
                    continue;
                }
                st.world = Arc::new(next);
                st.turn += 1;
                (st.turn, Arc::clone(&st.world))
            };
            debug!(turn, flipped = flipped.len(), "turn.complete");
            observe(TurnReport {
                turn,
                flipped: &flipped,
                world: &world,
            });
        }
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        let mut st = self.session.lock();
        st.running = false;
        st.paused = false;
        drop(st);
        self.session.wake.notify_all();
    }
}
