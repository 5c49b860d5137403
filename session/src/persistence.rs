//! JSON snapshots of the session table

use serde::{Deserialize, Serialize};
use shared::Session;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub sessions: Vec<Session>,
    pub last_backup: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// Writes the snapshot next to `path` and renames it into place, so a crash
/// mid-write never leaves a truncated file behind.
pub async fn save(path: &Path, snapshot: &SessionSnapshot) -> Result<(), PersistError> {
    let data = serde_json::to_vec_pretty(snapshot)?;
    let tmp = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Loads a snapshot; a missing file is not an error.
pub async fn load(path: &Path) -> Result<Option<SessionSnapshot>, PersistError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
