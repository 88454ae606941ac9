use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GolError;
use crate::grid::World;

/// How often the controller samples the alive-cell count.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default port of the compute server.
pub const DEFAULT_PORT: u16 = 8080;

/// Parameters of one run. Immutable while the run is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    pub width: usize,
    pub height: usize,
    /// Number of turns to execute.
    pub turns: usize,
    /// Number of row bands computed in parallel each turn.
    pub threads: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            turns: 10_000,
            threads: 8,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), GolError> {
        if self.width == 0 || self.height == 0 {
            return Err(GolError::InvalidParams(format!(
                "dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.turns == 0 {
            return Err(GolError::InvalidParams("turns must be positive".into()));
        }
        if self.threads == 0 {
            return Err(GolError::InvalidParams("threads must be positive".into()));
        }
        Ok(())
    }

    /// Validate and check that `world` has the declared shape.
    pub fn check_world(&self, world: &World) -> Result<(), GolError> {
        self.validate()?;
        if world.w != self.width || world.h != self.height || world.data.len() != world.w * world.h {
            return Err(GolError::DimensionMismatch {
                want_w: self.width,
                want_h: self.height,
                got_w: world.w,
                got_h: world.h,
            });
        }
        Ok(())
    }

    /// File stem used for saved worlds: `{width}x{height}x{turn}`.
    pub fn output_name(&self, turn: usize) -> String {
        format!("{}x{}x{}", self.width, self.height, turn)
    }

    /// File stem of the input image: `{width}x{height}`.
    pub fn input_name(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(width: usize, height: usize, turns: usize, threads: usize) -> Params {
        Params { width, height, turns, threads }
    }

    #[test]
    fn rejects_non_positive_values() {
        assert!(params(0, 16, 1, 1).validate().is_err());
        assert!(params(16, 0, 1, 1).validate().is_err());
        assert!(params(16, 16, 0, 1).validate().is_err());
        assert!(params(16, 16, 1, 0).validate().is_err());
        assert!(params(16, 16, 1, 1).validate().is_ok());
    }

    #[test]
    fn rejects_mismatched_world() {
        let p = params(16, 16, 1, 1);
        let err = p.check_world(&World::new(16, 8)).unwrap_err();
        assert!(matches!(err, GolError::DimensionMismatch { got_h: 8, .. }));
        assert!(p.check_world(&World::new(16, 16)).is_ok());
    }

    #[test]
    fn file_names() {
        let p = params(64, 32, 100, 4);
        assert_eq!(p.input_name(), "64x32");
        assert_eq!(p.output_name(7), "64x32x7");
    }
}
