//! On-disk session directory: one pretty-printed `<session-id>.json` per
//! recorded session.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use fastdev_wire::{Session, SessionId};
use serde::Serialize;
use tracing::debug;

use crate::EngineError;

const EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredSessionFile {
    #[serde(rename = "session")]
    pub id: SessionId,
    #[serde(skip)]
    pub path: PathBuf,
    pub size: u64,
    /// Milliseconds since the unix epoch, when the filesystem reports it.
    pub modified_unix_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SessionDir {
    root: PathBuf,
}

impl SessionDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, id: &SessionId) -> PathBuf {
        self.root.join(format!("{id}.{EXTENSION}"))
    }

    /// Writes `session`, replacing any previous file for the same id.
    pub fn save(&self, session: &Session) -> Result<PathBuf, EngineError> {
        fs::create_dir_all(&self.root).map_err(|source| io_error(&self.root, source))?;
        let path = self.path_for(&session.id);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        let json = session.to_json_pretty()?;
        fs::write(&tmp, json).map_err(|source| io_error(&tmp, source))?;
        fs::rename(&tmp, &path).map_err(|source| io_error(&path, source))?;
        debug!(session = %session.id, path = %path.display(), "session saved");
        Ok(path)
    }

    pub fn load(&self, id: &SessionId) -> Result<Session, EngineError> {
        let path = self.path_for(id);
        let json = fs::read_to_string(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                EngineError::SessionNotFound(id.clone())
            } else {
                io_error(&path, source)
            }
        })?;
        Ok(Session::from_json(&json)?)
    }

    pub fn remove(&self, id: &SessionId) -> Result<(), EngineError> {
        let path = self.path_for(id);
        fs::remove_file(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                EngineError::SessionNotFound(id.clone())
            } else {
                io_error(&path, source)
            }
        })
    }

    /// Session files in the directory, sorted by id. A missing directory is
    /// empty; files whose stem is not a session id are skipped.
    pub fn list(&self) -> Result<Vec<StoredSessionFile>, EngineError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error(&self.root, source)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| io_error(&self.root, source))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| SessionId::parse(stem).ok())
            else {
                continue;
            };
            let metadata = entry.metadata().map_err(|source| io_error(&path, source))?;
            if !metadata.is_file() {
                continue;
            }
            let modified_unix_ms = metadata
                .modified()
                .ok()
                .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
                .and_then(|since| u64::try_from(since.as_millis()).ok());
            files.push(StoredSessionFile {
                id,
                path,
                size: metadata.len(),
                modified_unix_ms,
            });
        }

        files.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(files)
    }
}

fn io_error(path: &Path, source: io::Error) -> EngineError {
    EngineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use fastdev_wire::Action;

    use super::*;

    fn sid(n: u8) -> SessionId {
        SessionId::parse(format!("{n:032x}")).unwrap()
    }

    #[test]
    fn save_load_list_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = SessionDir::new(tmp.path().join("sessions"));
        assert!(dir.list().unwrap().is_empty());

        let mut session = Session::new(sid(2));
        session.actions.push(Action::new("REDIS", "GET a", "1"));
        let path = dir.save(&session).unwrap();
        assert_eq!(path, dir.path_for(&sid(2)));
        dir.save(&Session::new(sid(1))).unwrap();

        let listed: Vec<SessionId> = dir.list().unwrap().into_iter().map(|f| f.id).collect();
        assert_eq!(listed, vec![sid(1), sid(2)]);
        assert_eq!(dir.load(&sid(2)).unwrap(), session);

        dir.remove(&sid(2)).unwrap();
        assert!(matches!(
            dir.load(&sid(2)),
            Err(EngineError::SessionNotFound(_))
        ));
    }

    #[test]
    fn saved_files_are_pretty_json() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = SessionDir::new(tmp.path());
        let path = dir.save(&Session::new(sid(3))).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.starts_with("{\n  \"session\": "));
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("notes.json"), "{}").unwrap();
        fs::write(tmp.path().join("README"), "hi").unwrap();
        let dir = SessionDir::new(tmp.path());
        dir.save(&Session::new(sid(4))).unwrap();

        let files = dir.list().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].size > 0);
    }

    #[test]
    fn corrupt_file_is_a_wire_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = SessionDir::new(tmp.path());
        fs::write(dir.path_for(&sid(5)), "not json").unwrap();
        assert!(matches!(dir.load(&sid(5)), Err(EngineError::Wire(_))));
    }
}
