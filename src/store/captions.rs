//! Saved caption store.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{open_connection, persistence_error};
use crate::error::PipelineError;

/// One saved caption row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedCaption {
    pub id: i64,
    pub goal: String,
    pub caption: String,
    pub created_at: DateTime<Utc>,
}

/// SQLite store for captions the operator chose to keep.
pub struct CaptionStore {
    conn: Connection,
}

impl CaptionStore {
    /// Create or open the caption table in the database at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self, PipelineError> {
        let conn = open_connection(db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS captions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                goal TEXT NOT NULL,
                caption TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| persistence_error("create captions table", e))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_captions_created ON captions(created_at DESC)",
            [],
        )
        .map_err(|e| persistence_error("create captions index", e))?;

        Ok(CaptionStore { conn })
    }

    /// Save a caption. Returns the new row id.
    pub fn save(&self, goal: &str, caption: &str) -> Result<i64, PipelineError> {
        self.conn
            .execute(
                "INSERT INTO captions (goal, caption, created_at) VALUES (?1, ?2, ?3)",
                params![goal, caption, Utc::now().to_rfc3339()],
            )
            .map_err(|e| persistence_error("save caption", e))?;

        let id = self.conn.last_insert_rowid();
        info!("Saved caption {}", id);
        Ok(id)
    }

    /// List all saved captions, newest first.
    pub fn list(&self) -> Result<Vec<SavedCaption>, PipelineError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, goal, caption, created_at
                 FROM captions
                 ORDER BY created_at DESC, id DESC",
            )
            .map_err(|e| persistence_error("prepare caption query", e))?;

        let rows = stmt
            .query_map([], |row| {
                let created_at: String = row.get(3)?;
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            3,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?
                    .with_timezone(&Utc);

                Ok(SavedCaption {
                    id: row.get(0)?,
                    goal: row.get(1)?,
                    caption: row.get(2)?,
                    created_at,
                })
            })
            .map_err(|e| persistence_error("query captions", e))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| persistence_error("collect captions", e))
    }
}
