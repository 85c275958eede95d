use std::io::Read;
use std::time::Duration;

use fastdev_wire::{FieldDiff, Message, SessionId};
use serde::Serialize;
use tracing::debug;

use crate::{AgentError, AgentState, REPLAY_HEADER};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub session: SessionId,
    pub path: String,
    pub status: u16,
    /// Ids of recorded actions the application never asked for.
    pub unconsumed: Vec<u64>,
    /// Differences between the recorded and the replayed inbound response.
    pub diffs: Vec<FieldDiff>,
}

struct AppResponse {
    status: u16,
    /// The response in HTTP/1.1 text form, for inbound verification.
    message: Message,
}

pub(crate) async fn run(state: &AgentState, id: SessionId) -> Result<ReplayReport, AgentError> {
    let dir = state.dir.clone();
    let load_id = id.clone();
    let session = tokio::task::spawn_blocking(move || dir.load(&load_id))
        .await
        .map_err(|err| AgentError::Worker(err.to_string()))??;
    let path = session
        .inbound
        .as_ref()
        .map(|inbound| inbound_path(&inbound.request.to_text()))
        .unwrap_or_else(|| "/".to_string());

    let replayer = state.engine.replayer();
    replayer.store(session)?;

    let url = format!("{}{path}", state.app_url);
    let header_id = id.clone();
    let response = tokio::task::spawn_blocking(move || get_blocking(&url, &header_id))
        .await
        .map_err(|err| AgentError::Worker(err.to_string()))
        .and_then(|response| response.map_err(AgentError::App));

    let report = response.and_then(|response| {
        Ok(ReplayReport {
            session: id.clone(),
            path,
            status: response.status,
            unconsumed: replayer.unconsumed(&id)?,
            diffs: replayer.verify_inbound(&id, &response.message)?,
        })
    });
    replayer.delete(&id)?;
    report
}

/// The request target of an HTTP request line, `/` when there is none.
fn inbound_path(request: &str) -> String {
    request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .filter(|target| target.starts_with('/'))
        .unwrap_or("/")
        .to_string()
}

fn get_blocking(url: &str, id: &SessionId) -> Result<AppResponse, String> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(2))
        .timeout_read(Duration::from_secs(30))
        .build();
    let resp = match agent.get(url).set(REPLAY_HEADER, id.as_str()).call() {
        Ok(resp) => resp,
        Err(ureq::Error::Status(_, resp)) => resp,
        Err(ureq::Error::Transport(err)) => {
            return Err(format!("replay request failed for {url}: {err}"));
        }
    };

    let status = resp.status();
    let mut text = format!("HTTP/1.1 {status} {}\r\n", resp.status_text());
    for name in resp.headers_names() {
        for value in resp.all(&name) {
            text.push_str(&format!("{name}: {value}\r\n"));
        }
    }
    text.push_str("\r\n");

    let mut bytes = text.into_bytes();
    resp.into_reader()
        .read_to_end(&mut bytes)
        .map_err(|e| format!("failed reading replay response body: {e}"))?;
    debug!(url, status, "application answered replay");

    Ok(AppResponse {
        status,
        message: Message::Bytes(bytes),
    })
}
