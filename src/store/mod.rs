//! SQLite persistence for captions and researched locations.
//!
//! Both stores are synchronous (rusqlite is blocking). Callers in async
//! contexts should wrap operations in `tokio::task::spawn_blocking`.

mod captions;
mod locations;

pub use captions::{CaptionStore, SavedCaption};
pub use locations::{LocationRecord, LocationStore, SavedLocation};

use std::path::Path;

use rusqlite::Connection;

use crate::error::PipelineError;

fn open_connection(db_path: &Path) -> Result<Connection, PipelineError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            PipelineError::Persistence(format!("Failed to create data dir: {}", e))
        })?;
    }

    Connection::open(db_path)
        .map_err(|e| PipelineError::Persistence(format!("Failed to open database: {}", e)))
}

fn persistence_error(action: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Persistence(format!("Failed to {}: {}", action, e))
}
