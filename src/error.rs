/// Errors raised by the engine, the worker pool and the session.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum GolError {
    /// Run parameters rejected before any computation.
    #[error("invalid params: {0}")]
    InvalidParams(String),
    /// The supplied world does not have the declared dimensions.
    #[error("world is {got_w}x{got_h}, params declare {want_w}x{want_h}")]
    DimensionMismatch {
        want_w: usize,
        want_h: usize,
        got_w: usize,
        got_h: usize,
    },
    /// A run is already in progress on this session.
    #[error("a run is already in progress (turn {turn})")]
    Busy { turn: usize },
    /// A band computation failed; the turn was discarded.
    #[error("worker for band {band} failed: {message}")]
    WorkerFault { band: usize, message: String },
    /// The task driving a run ended without producing an outcome.
    #[error("run task failed: {0}")]
    RunTask(String),
    /// The worker thread pool could not be created.
    #[error("thread pool: {0}")]
    Pool(String),
    /// A wire payload could not be decoded.
    #[error("decode: {0}")]
    Decode(String),
}

impl From<rayon::ThreadPoolBuildError> for GolError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        GolError::Pool(e.to_string())
    }
}
