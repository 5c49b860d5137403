//! JSON snapshots of the score table

use crate::board::ScoreRecord;
use serde::{Deserialize, Serialize};
use shared::SessionId;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub players: Vec<(SessionId, ScoreRecord)>,
    pub last_update: u64,
    pub saved_at: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

pub async fn save(path: &Path, snapshot: &ScoreSnapshot) -> Result<(), PersistError> {
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

pub async fn load(path: &Path) -> Result<Option<ScoreSnapshot>, PersistError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_json_layout() {
        let id = Uuid::nil();
        let snapshot = ScoreSnapshot {
            players: vec![(
                id,
                ScoreRecord {
                    name: "Alice".to_string(),
                    score: 7,
                    last_update: 3,
                },
            )],
            last_update: 3,
            saved_at: 4,
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["players"][0][0], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["players"][0][1]["score"], 7);
        assert_eq!(json["saved_at"], 4);
    }

    #[test]
    fn test_save_then_load() {
        tokio_test::block_on(async {
            let path = std::env::temp_dir().join(format!("scores-{}.json", Uuid::new_v4()));
            let snapshot = ScoreSnapshot {
                players: vec![],
                last_update: 1,
                saved_at: 2,
            };
            save(&path, &snapshot).await.unwrap();
            let loaded = load(&path).await.unwrap().unwrap();
            assert_eq!(loaded.saved_at, 2);
            let _ = std::fs::remove_file(&path);
        });
    }
}
