//! Ways for a controller to reach a compute session.

use std::sync::Arc;

use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::Params;
use crate::controller::Event;
use crate::error::GolError;
use crate::grid::World;
use crate::protocol::{ControlRequest, ControlResponse, ErrorBody, RunRequest, RunResponse, WireGrid};
use crate::session::{ComputeSession, ControlKey, ControlReply, RunOutcome, Status};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server replied {status}: {message}")]
    Remote { status: u16, message: String },
    #[error(transparent)]
    Session(#[from] GolError),
    #[error("run task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The remote session contract: Run, GetStatus and Control.
pub trait SessionClient {
    /// Start a run and resolve when it ends.
    fn run(&self, world: World, params: Params) -> impl Future<Output = Result<RunOutcome, ClientError>> + Send;

    fn status(&self) -> impl Future<Output = Result<Status, ClientError>> + Send;

    fn control(&self, key: ControlKey) -> impl Future<Output = Result<ControlReply, ClientError>> + Send;
}

/// A session in the same process.
///
/// With [`LocalClient::with_turn_events`] every committed turn is also
/// reported as `CellFlipped` and `TurnComplete` events.
#[derive(Clone)]
pub struct LocalClient {
    session: Arc<ComputeSession>,
    turn_events: Option<UnboundedSender<Event>>,
}

impl LocalClient {
    pub fn new(session: Arc<ComputeSession>) -> Self {
        Self {
            session,
            turn_events: None,
        }
    }

    pub fn with_turn_events(session: Arc<ComputeSession>, events: UnboundedSender<Event>) -> Self {
        Self {
            session,
            turn_events: Some(events),
        }
    }
}

impl SessionClient for LocalClient {
    fn run(&self, world: World, params: Params) -> impl Future<Output = Result<RunOutcome, ClientError>> + Send {
        // Claim the session now rather than on first poll, so control
        // commands sent right after this call reach the run.
        let run = self.session.begin(world, params);
        let events = self.turn_events.clone();
        async move {
            let run = run?;
            let outcome = tokio::task::spawn_blocking(move || {
                run.drive(|report| {
                    let Some(tx) = &events else { return };
                    for &cell in report.flipped {
                        let _ = tx.send(Event::CellFlipped { turn: report.turn, cell });
                    }
                    let _ = tx.send(Event::TurnComplete { turn: report.turn });
                })
            })
            .await??;
            Ok(outcome)
        }
    }

    async fn status(&self) -> Result<Status, ClientError> {
        Ok(self.session.status())
    }

    async fn control(&self, key: ControlKey) -> Result<ControlReply, ClientError> {
        Ok(self.session.control(key))
    }
}

/// A session behind the HTTP server in [`crate::server`].
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base: String,
}

impl HttpClient {
    /// `base` is the server root, e.g. `http://127.0.0.1:8080`.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn call<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, ClientError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            return Err(ClientError::Remote {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json().await?)
    }
}

impl SessionClient for HttpClient {
    async fn run(&self, world: World, params: Params) -> Result<RunOutcome, ClientError> {
        let body = RunRequest {
            world: WireGrid::from(&world),
            params,
        };
        let resp: RunResponse = Self::call(self.http.post(self.url("/api/run")).json(&body)).await?;
        Ok(RunOutcome::try_from(resp)?)
    }

    async fn status(&self) -> Result<Status, ClientError> {
        Self::call(self.http.get(self.url("/api/status"))).await
    }

    async fn control(&self, key: ControlKey) -> Result<ControlReply, ClientError> {
        let resp: ControlResponse =
            Self::call(self.http.post(self.url("/api/control")).json(&ControlRequest { key })).await?;
        Ok(ControlReply::try_from(resp)?)
    }
}
