//! Wire types for the remote session contract.
//!
//! Grids travel as base64 of their row-major bytes rather than as nested
//! JSON arrays.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::config::Params;
use crate::error::GolError;
use crate::grid::{Cell, World};
use crate::session::{ControlKey, ControlReply, Phase, RunOutcome};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireGrid {
    pub width: usize,
    pub height: usize,
    pub cells: String,
}

impl From<&World> for WireGrid {
    fn from(world: &World) -> Self {
        Self {
            width: world.w,
            height: world.h,
            cells: STANDARD.encode(&world.data),
        }
    }
}

impl TryFrom<WireGrid> for World {
    type Error = GolError;

    fn try_from(wire: WireGrid) -> Result<Self, GolError> {
        let data = STANDARD
            .decode(wire.cells.as_bytes())
            .map_err(|e| GolError::Decode(e.to_string()))?;
        if data.len() != wire.width * wire.height {
            return Err(GolError::Decode(format!(
                "{} bytes for a {}x{} grid",
                data.len(),
                wire.width,
                wire.height
            )));
        }
        Ok(World {
            data,
            w: wire.width,
            h: wire.height,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRequest {
    pub world: WireGrid,
    pub params: Params,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub world: WireGrid,
    pub turn: usize,
    pub alive_cells: Vec<Cell>,
    pub quit: bool,
}

impl From<&RunOutcome> for RunResponse {
    fn from(o: &RunOutcome) -> Self {
        Self {
            world: WireGrid::from(&o.world),
            turn: o.turn,
            alive_cells: o.alive_cells.clone(),
            quit: o.quit,
        }
    }
}

impl TryFrom<RunResponse> for RunOutcome {
    type Error = GolError;

    fn try_from(r: RunResponse) -> Result<Self, GolError> {
        Ok(RunOutcome {
            world: r.world.try_into()?,
            turn: r.turn,
            alive_cells: r.alive_cells,
            quit: r.quit,
        })
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ControlRequest {
    pub key: ControlKey,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub run: u64,
    pub turn: usize,
    pub paused: bool,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<WireGrid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alive_cells: Option<Vec<Cell>>,
}

impl From<&ControlReply> for ControlResponse {
    fn from(r: &ControlReply) -> Self {
        Self {
            run: r.run,
            turn: r.turn,
            paused: r.paused,
            phase: r.phase,
            world: r.world.as_ref().map(WireGrid::from),
            alive_cells: r.alive_cells.clone(),
        }
    }
}

impl TryFrom<ControlResponse> for ControlReply {
    type Error = GolError;

    fn try_from(r: ControlResponse) -> Result<Self, GolError> {
        Ok(ControlReply {
            run: r.run,
            turn: r.turn,
            paused: r.paused,
            phase: r.phase,
            world: r.world.map(World::try_from).transpose()?,
            alive_cells: r.alive_cells,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_survives_the_wire() {
        let world = World::random(13, 7, 0.5, 17);
        let json = serde_json::to_string(&WireGrid::from(&world)).unwrap();
        let back: WireGrid = serde_json::from_str(&json).unwrap();
        assert_eq!(World::try_from(back).unwrap(), world);
    }

    #[test]
    fn short_payload_is_rejected() {
        let wire = WireGrid {
            width: 4,
            height: 4,
            cells: STANDARD.encode([0u8; 15]),
        };
        assert!(matches!(World::try_from(wire), Err(GolError::Decode(_))));
        let garbage = WireGrid { width: 1, height: 1, cells: "!!".into() };
        assert!(matches!(World::try_from(garbage), Err(GolError::Decode(_))));
    }

    #[test]
    fn control_keys_are_lowercase() {
        let body = serde_json::to_value(ControlRequest { key: ControlKey::Snapshot }).unwrap();
        assert_eq!(body, serde_json::json!({ "key": "snapshot" }));
        let req: ControlRequest = serde_json::from_str(r#"{"key":"kill"}"#).unwrap();
        assert_eq!(req.key, ControlKey::Kill);
    }

    #[test]
    fn status_reply_omits_empty_world() {
        let reply = ControlReply {
            run: 2,
            turn: 3,
            paused: true,
            phase: Phase::Paused,
            world: None,
            alive_cells: None,
        };
        let json = serde_json::to_value(ControlResponse::from(&reply)).unwrap();
        assert_eq!(json, serde_json::json!({ "run": 2, "turn": 3, "paused": true, "phase": "paused" }));
    }
}
