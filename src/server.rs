use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinError;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::GolError;
use crate::grid::World;
use crate::protocol::{ControlRequest, ControlResponse, ErrorBody, RunRequest, RunResponse};
use crate::session::{ComputeSession, ControlKey, Status};

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<ComputeSession>,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(session: Arc<ComputeSession>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { session, shutdown }
    }

    /// Resolves once a `kill` command has been handled.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown.subscribe();
        async move {
            // A closed channel also means nobody can ask for shutdown any more.
            let _ = rx.wait_for(|&stop| stop).await;
        }
    }
}

impl IntoResponse for GolError {
    fn into_response(self) -> Response {
        let status = match &self {
            GolError::InvalidParams(_) | GolError::DimensionMismatch { .. } | GolError::Decode(_) => {
                StatusCode::BAD_REQUEST
            }
            GolError::Busy { .. } => StatusCode::CONFLICT,
            GolError::WorkerFault { .. } | GolError::RunTask(_) | GolError::Pool(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// Quits its run when dropped. A handler future is dropped when the caller
/// disconnects, and a run nobody waits for must not keep the session busy.
/// Once the run has ended, [`ComputeSession::abandon`] is a no-op.
struct RunGuard {
    session: Arc<ComputeSession>,
    run: u64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.session.abandon(self.run);
    }
}

fn run_task_failed(e: JoinError) -> GolError {
    GolError::RunTask(e.to_string())
}

async fn run_handler(
    State(state): State<AppState>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunResponse>, GolError> {
    let world = World::try_from(req.world)?;
    // Claimed before the first await so a control call that arrives after
    // this request is accepted targets this run.
    let run = state.session.begin(world, req.params)?;
    let _guard = RunGuard {
        session: Arc::clone(&state.session),
        run: run.id(),
    };

    let outcome = tokio::task::spawn_blocking(move || run.drive(|_| {}))
        .await
        .map_err(run_task_failed)??;

    Ok(Json(RunResponse::from(&outcome)))
}

async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.session.status())
}

async fn control_handler(
    State(state): State<AppState>,
    Json(req): Json<ControlRequest>,
) -> Json<ControlResponse> {
    let reply = state.session.control(req.key);
    if req.key == ControlKey::Kill {
        info!(turn = reply.turn, "server.kill");
        state.shutdown.send_replace(true);
    }
    Json(ControlResponse::from(&reply))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/run", post(run_handler))
        .route("/api/status", get(status_handler))
        .route("/api/control", post(control_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `session` on `listener` until a `kill` command arrives.
pub async fn serve(listener: TcpListener, session: Arc<ComputeSession>) -> std::io::Result<()> {
    let state = AppState::new(session);
    let shutdown = state.shutdown_signal();
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "server.listening"),
        Err(e) => warn!(error = %e, "server.no_local_addr"),
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Params;
    use crate::grid::Cell;
    use crate::protocol::WireGrid;
    use crate::session::Phase;

    async fn call<T: DeserializeOwned>(app: Router, req: Request<Body>) -> (StatusCode, T) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn run_then_status() {
        let app = router(AppState::new(Arc::new(ComputeSession::new())));
        let glider = [Cell::new(2, 1), Cell::new(3, 2), Cell::new(1, 3), Cell::new(2, 3), Cell::new(3, 3)];
        let world = World::from_cells(16, 16, &glider);
        let req = RunRequest {
            world: WireGrid::from(&world),
            params: Params { width: 16, height: 16, turns: 4, threads: 4 },
        };
        let (code, resp): (_, RunResponse) =
            call(app.clone(), post_json("/api/run", serde_json::to_value(&req).unwrap())).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(resp.turn, 4);
        assert_eq!(resp.alive_cells.len(), 5);
        assert!(resp.alive_cells.contains(&Cell::new(3, 2)));

        let (code, status): (_, Status) =
            call(app, Request::get("/api/status").body(Body::empty()).unwrap()).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(status, Status { run: 1, turn: 4, alive_count: 5, phase: Phase::Finished });
    }

    #[tokio::test]
    async fn bad_params_are_rejected() {
        let app = router(AppState::new(Arc::new(ComputeSession::new())));
        let req = RunRequest {
            world: WireGrid::from(&World::new(8, 8)),
            params: Params { width: 8, height: 8, turns: 1, threads: 0 },
        };
        let (code, body): (_, ErrorBody) =
            call(app, post_json("/api/run", serde_json::to_value(&req).unwrap())).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(body.error.contains("threads"));
    }

    #[tokio::test]
    async fn busy_session_conflicts() {
        let session = Arc::new(ComputeSession::new());
        let _run = session.begin(World::new(4, 4), Params { width: 4, height: 4, turns: 1, threads: 1 });
        let app = router(AppState::new(session));
        let req = RunRequest {
            world: WireGrid::from(&World::new(4, 4)),
            params: Params { width: 4, height: 4, turns: 1, threads: 1 },
        };
        let (code, _): (_, ErrorBody) =
            call(app, post_json("/api/run", serde_json::to_value(&req).unwrap())).await;
        assert_eq!(code, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn kill_triggers_shutdown() {
        let state = AppState::new(Arc::new(ComputeSession::new()));
        let signal = state.shutdown_signal();
        let app = router(state);
        let (code, reply): (_, ControlResponse) =
            call(app, post_json("/api/control", serde_json::json!({ "key": "kill" }))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(reply.phase, Phase::Idle);
        tokio::time::timeout(std::time::Duration::from_secs(1), signal)
            .await
            .expect("shutdown signal fired");
    }

    #[test]
    fn dropped_guard_quits_its_run() {
        let session = Arc::new(ComputeSession::new());
        let run = session
            .begin(World::new(8, 8), Params { width: 8, height: 8, turns: usize::MAX, threads: 1 })
            .unwrap();
        let guard = RunGuard { session: Arc::clone(&session), run: run.id() };
        assert_eq!(session.status().phase, Phase::Running);
        drop(guard);
        assert_eq!(session.status().phase, Phase::Quitting);
        let outcome = run.drive(|_| {}).unwrap();
        assert!(outcome.quit);
        assert_eq!(outcome.turn, 0);
    }

    #[tokio::test]
    async fn failed_run_task_is_internal() {
        let join = tokio::task::spawn_blocking(|| -> u8 { panic!("lost") }).await.unwrap_err();
        let err = run_task_failed(join);
        assert!(matches!(err, GolError::RunTask(_)));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
