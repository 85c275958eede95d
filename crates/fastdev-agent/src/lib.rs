//! Loopback debug agent for stored sessions.
//!
//! `GET /` lists the session files in the configured directory.
//! `GET /replay?session=<id>` publishes that session to the replayer, sends
//! its inbound request to the application with the
//! [`REPLAY_HEADER`] set, and reports how the replay went.
//!
//! The agent runs inside the application's process: published sessions live
//! in the [`Engine`] the application replays from, so the application passes
//! its own engine to [`spawn`] (or mounts [`router`]) and binds incoming
//! requests with [`bind_replay_session`]. There is no authentication.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use fastdev::{Engine, EngineError, Mode, SessionDir, StoredSessionFile};
use fastdev_context::Context;
use fastdev_wire::{SessionId, WireError};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

mod replay;


pub use replay::ReplayReport;

/// Carries the replayed session id from the agent to the application.
pub const REPLAY_HEADER: &str = "x-fastdev-replay-session";

pub const DIR_ENV: &str = "GS_FASTDEV_DIR";
pub const ADDR_ENV: &str = "GS_FASTDEV_AGENT_ADDR";
pub const APP_URL_ENV: &str = "GS_FASTDEV_APP_URL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub session_dir: PathBuf,
    pub listen: String,
    pub app_url: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            session_dir: PathBuf::from("fastdev-sessions"),
            listen: "127.0.0.1:9140".into(),
            app_url: "http://127.0.0.1:8080".into(),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            session_dir: std::env::var(DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.session_dir),
            listen: std::env::var(ADDR_ENV).unwrap_or(defaults.listen),
            app_url: std::env::var(APP_URL_ENV).unwrap_or(defaults.app_url),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("malformed session id: {0}")]
    SessionId(#[from] WireError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("application request failed: {0}")]
    App(String),
    #[error("replay worker failed: {0}")]
    Worker(String),
    #[error("failed to bind agent on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

impl AgentError {
    fn status(&self) -> StatusCode {
        match self {
            AgentError::SessionId(_) => StatusCode::BAD_REQUEST,
            AgentError::Engine(EngineError::SessionNotFound(_)) => StatusCode::NOT_FOUND,
            AgentError::Engine(EngineError::SessionAlreadyExists(_)) => StatusCode::CONFLICT,
            AgentError::Engine(EngineError::ModeDisabled(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::Engine(_) | AgentError::Worker(_) | AgentError::Bind { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AgentError::App(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "agent request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
pub struct AgentState {
    engine: Arc<Engine>,
    dir: SessionDir,
    app_url: Arc<String>,
}

impl AgentState {
    pub fn new(engine: Arc<Engine>, config: &AgentConfig) -> Self {
        Self {
            engine,
            dir: SessionDir::new(&config.session_dir),
            app_url: Arc::new(config.app_url.trim_end_matches('/').to_string()),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn dir(&self) -> &SessionDir {
        &self.dir
    }
}

pub fn router(state: AgentState) -> Router {
    Router::new()
        .route("/", get(list_sessions))
        .route("/replay", get(replay_session))
        .with_state(state)
}

/// Serves the agent on `config.listen` from a background task, sharing the
/// application's `engine`. Returns the bound address.
pub async fn spawn(
    engine: Arc<Engine>,
    config: &AgentConfig,
) -> Result<(SocketAddr, JoinHandle<()>), AgentError> {
    let bind_err = |source| AgentError::Bind {
        addr: config.listen.clone(),
        source,
    };
    let listener = TcpListener::bind(&config.listen).await.map_err(bind_err)?;
    let addr = listener.local_addr().map_err(bind_err)?;
    if !engine.modes().replay_mode() {
        warn!("replay mode is off, /replay will refuse requests");
    }
    info!(
        %addr,
        dir = %config.session_dir.display(),
        app_url = %config.app_url,
        "fastdev agent ready"
    );

    let app = router(AgentState::new(engine, config));
    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!(%err, "fastdev agent stopped");
        }
    });
    Ok((addr, handle))
}

async fn list_sessions(
    State(state): State<AgentState>,
) -> Result<Json<Vec<StoredSessionFile>>, AgentError> {
    let dir = state.dir.clone();
    let files = tokio::task::spawn_blocking(move || dir.list())
        .await
        .map_err(|err| AgentError::Worker(err.to_string()))??;
    Ok(Json(files))
}

#[derive(Debug, Deserialize)]
struct ReplayParams {
    session: String,
}

async fn replay_session(
    State(state): State<AgentState>,
    Query(params): Query<ReplayParams>,
) -> Result<Json<ReplayReport>, AgentError> {
    let id = SessionId::parse(params.session)?;
    state.engine.modes().ensure(Mode::Replay)?;
    info!(session = %id, "replaying session");
    let report = replay::run(&state, id).await?;
    info!(
        session = %report.session,
        status = report.status,
        unconsumed = report.unconsumed.len(),
        diffs = report.diffs.len(),
        "replay finished"
    );
    Ok(Json(report))
}

/// Binds the session named by [`REPLAY_HEADER`], if any, to `ctx`.
pub fn bind_replay_session(
    engine: &Engine,
    ctx: &Context,
    headers: &HeaderMap,
) -> Result<Option<SessionId>, AgentError> {
    let Some(value) = headers.get(REPLAY_HEADER) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| WireError::SessionId(String::from_utf8_lossy(value.as_bytes()).into_owned()))?;
    let id = SessionId::parse(raw)?;
    engine.replayer().set_session_id(ctx, id.clone())?;
    Ok(Some(id))
}
