//! Drives a session from the outside: starts the run, samples progress on
//! a fixed interval, forwards user keys and saves worlds it receives.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, info, warn};

use crate::client::{ClientError, SessionClient};
use crate::config::{DEFAULT_POLL_INTERVAL, Params};
use crate::grid::{Cell, World};
use crate::io::{OutputSink, StoreError};
use crate::session::{ControlKey, ControlReply, Phase, RunOutcome};

/// How often to check whether the session has taken the run yet.
const CLAIM_POLL: Duration = Duration::from_millis(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Executing,
    Paused,
    Quitting,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Executing => "Executing",
            RunState::Paused => "Paused",
            RunState::Quitting => "Quitting",
        };
        f.write_str(s)
    }
}

/// Progress notifications, in emission order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    CellFlipped { turn: usize, cell: Cell },
    TurnComplete { turn: usize },
    AliveCellsCount { turn: usize, count: usize },
    ImageOutputComplete { turn: usize, filename: String },
    FinalTurnComplete { turn: usize, alive: Vec<Cell> },
    StateChange { turn: usize, state: RunState },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::CellFlipped { turn, cell } => write!(f, "turn {turn}: cell ({}, {}) flipped", cell.x, cell.y),
            Event::TurnComplete { turn } => write!(f, "turn {turn} complete"),
            Event::AliveCellsCount { turn, count } => write!(f, "turn {turn}: {count} cells alive"),
            Event::ImageOutputComplete { turn, filename } => write!(f, "turn {turn}: saved {filename}"),
            Event::FinalTurnComplete { turn, alive } => {
                write!(f, "final turn {turn}: {} cells alive", alive.len())
            }
            Event::StateChange { turn, state } => write!(f, "turn {turn}: {state}"),
        }
    }
}

/// User keys understood by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    /// Toggle pause/resume.
    Pause,
    /// Save the current world.
    Save,
    /// Stop the run and save its final world.
    Quit,
    /// Quit and shut the server down.
    Kill,
}

impl Key {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'p' => Some(Key::Pause),
            's' => Some(Key::Save),
            'q' => Some(Key::Quit),
            'k' => Some(Key::Kill),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("session: {0}")]
    Client(#[from] ClientError),
    #[error("output: {0}")]
    Output(#[from] StoreError),
}

pub struct Controller<C, O> {
    client: C,
    output: O,
    params: Params,
    events: UnboundedSender<Event>,
    poll_interval: Duration,
}

impl<C: SessionClient, O: OutputSink> Controller<C, O> {
    pub fn new(client: C, output: O, params: Params, events: UnboundedSender<Event>) -> Self {
        Self {
            client,
            output,
            params,
            events,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval = every;
        self
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Run `world` to completion, or until the user quits.
    ///
    /// Keys are served before anything else, but only once the session has
    /// taken this run: keys typed earlier are queued, so they can never land
    /// on an idle session or on a previous run. Any session error is fatal:
    /// the last world received is saved and the error returned. Nothing is
    /// retried.
    pub async fn run(&mut self, world: World, mut keys: UnboundedReceiver<Key>) -> Result<RunOutcome, ControllerError> {
        let Self {
            client,
            output,
            params,
            events,
            poll_interval,
        } = self;
        let client = &*client;
        let mut out = Reporter {
            output,
            events,
            params: *params,
        };

        for cell in world.alive_cells() {
            out.emit(Event::CellFlipped { turn: 0, cell });
        }
        out.emit(Event::StateChange {
            turn: 0,
            state: RunState::Executing,
        });

        let mut progress = Progress {
            run: None,
            paused: false,
            quitting: false,
            last: (world.clone(), 0),
        };
        // Runs the session started before ours.
        let baseline = match client.status().await {
            Ok(status) => status.run,
            Err(e) => return Err(abort(&mut out, progress, e)),
        };
        let run = client.run(world, *params);
        tokio::pin!(run);

        let mut claim = interval(CLAIM_POLL);
        let mut ticker = interval_at(Instant::now() + *poll_interval, *poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pending = VecDeque::new();
        let mut keys_open = true;

        let result: Result<RunOutcome, ClientError> = loop {
            tokio::select! {
                biased;
                key = keys.recv(), if keys_open => {
                    let Some(key) = key else {
                        keys_open = false;
                        continue;
                    };
                    if progress.run.is_none() {
                        pending.push_back(key);
                        continue;
                    }
                    match handle_keys(client, &mut out, &mut progress, [key]).await {
                        Ok(()) => {}
                        Err(ControllerError::Client(e)) => break Err(e),
                        Err(e) => return Err(e),
                    }
                }
                _ = claim.tick(), if progress.run.is_none() => {
                    match client.status().await {
                        Ok(status) if status.run > baseline => {
                            debug!(run = status.run, queued = pending.len(), "controller.run_claimed");
                            progress.run = Some(status.run);
                            match handle_keys(client, &mut out, &mut progress, pending.drain(..)).await {
                                Ok(()) => {}
                                Err(ControllerError::Client(e)) => break Err(e),
                                Err(e) => return Err(e),
                            }
                        }
                        Ok(_) => {}
                        Err(e) => break Err(e),
                    }
                }
                outcome = &mut run => break outcome,
                _ = ticker.tick(), if progress.run.is_some() && !progress.paused && !progress.quitting => {
                    match client.status().await {
                        Ok(status) => out.emit(Event::AliveCellsCount {
                            turn: status.turn,
                            count: status.alive_count,
                        }),
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return Err(abort(&mut out, progress, e)),
        };

        out.save(&outcome.world, outcome.turn)?;
        out.emit(Event::FinalTurnComplete {
            turn: outcome.turn,
            alive: outcome.alive_cells.clone(),
        });
        out.emit(Event::StateChange {
            turn: outcome.turn,
            state: RunState::Quitting,
        });
        info!(turn = outcome.turn, quit = outcome.quit, "controller.done");
        Ok(outcome)
    }
}

/// Save the last world received and report the run as over.
fn abort<O: OutputSink>(out: &mut Reporter<'_, O>, progress: Progress, e: ClientError) -> ControllerError {
    let (world, turn) = progress.last;
    warn!(error = %e, turn, "controller.aborting");
    if let Err(save_err) = out.save(&world, turn) {
        warn!(error = %save_err, "controller.final_save_failed");
    }
    out.emit(Event::StateChange {
        turn,
        state: RunState::Quitting,
    });
    e.into()
}

/// Where the controller reports to: the event stream and the output sink.
struct Reporter<'a, O> {
    output: &'a mut O,
    events: &'a UnboundedSender<Event>,
    params: Params,
}

impl<O: OutputSink> Reporter<'_, O> {
    fn emit(&self, event: Event) {
        // A dropped receiver only means nobody is watching.
        let _ = self.events.send(event);
    }

    fn save(&mut self, world: &World, turn: usize) -> Result<(), StoreError> {
        let filename = self.params.output_name(turn);
        self.output.write_world(&filename, world)?;
        self.emit(Event::ImageOutputComplete { turn, filename });
        Ok(())
    }
}

struct Progress {
    /// Sequence number of our run, once the session reports it.
    run: Option<u64>,
    paused: bool,
    quitting: bool,
    /// Most recent world received from the session, with its turn.
    last: (World, usize),
}

impl Progress {
    /// Whether a control reply was about our run rather than a later one.
    fn owns(&self, reply: &ControlReply) -> bool {
        self.run == Some(reply.run)
    }
}

async fn handle_keys<C, O>(
    client: &C,
    out: &mut Reporter<'_, O>,
    progress: &mut Progress,
    keys: impl IntoIterator<Item = Key>,
) -> Result<(), ControllerError>
where
    C: SessionClient,
    O: OutputSink,
{
    for key in keys {
        if progress.quitting {
            break;
        }
        handle_key(client, out, progress, key).await?;
    }
    Ok(())
}

async fn handle_key<C: SessionClient, O: OutputSink>(
    client: &C,
    out: &mut Reporter<'_, O>,
    progress: &mut Progress,
    key: Key,
) -> Result<(), ControllerError> {
    match key {
        Key::Pause => {
            let cmd = if progress.paused { ControlKey::Resume } else { ControlKey::Pause };
            let reply = client.control(cmd).await?;
            if !progress.owns(&reply) || !matches!(reply.phase, Phase::Running | Phase::Paused) {
                return Ok(());
            }
            progress.paused = reply.paused;
            let state = if reply.paused { RunState::Paused } else { RunState::Executing };
            out.emit(Event::StateChange { turn: reply.turn, state });
        }
        Key::Save => {
            let reply = client.control(ControlKey::Snapshot).await?;
            if !progress.owns(&reply) {
                return Ok(());
            }
            if let Some(world) = reply.world {
                out.save(&world, reply.turn)?;
                progress.last = (world, reply.turn);
            }
        }
        Key::Quit | Key::Kill => {
            let cmd = if key == Key::Kill { ControlKey::Kill } else { ControlKey::Quit };
            let reply = client.control(cmd).await?;
            if !progress.owns(&reply) || !matches!(reply.phase, Phase::Quitting | Phase::Finished) {
                return Ok(());
            }
            progress.quitting = true;
            if let Some(world) = reply.world {
                progress.last = (world, reply.turn);
            }
        }
    }
    Ok(())
}
