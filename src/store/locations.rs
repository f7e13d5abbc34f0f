//! Saved location store.
//!
//! Each row caches a resolved address together with the research gathered
//! for it, keyed by the normalized address. This backs both the read-through
//! location cache and the operator-facing saved locations list.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{open_connection, persistence_error};
use crate::error::PipelineError;
use crate::location::ResolvedLocation;
use crate::research::ResearchSummary;

/// List-view projection of a saved location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedLocation {
    pub id: i64,
    pub address: String,
    pub city: String,
    pub state: String,
    pub is_rural: bool,
    pub display_label: String,
}

/// Full cached row: the resolved location plus the research captured for it.
#[derive(Debug, Clone)]
pub struct LocationRecord {
    pub id: i64,
    pub address: String,
    pub location: ResolvedLocation,
    pub research: ResearchSummary,
    pub display_label: String,
}

fn display_label(city: &str, state: &str, address: &str) -> String {
    format!("{}, {} - {}", city, state, address)
}

/// SQLite store for researched locations.
pub struct LocationStore {
    conn: Connection,
}

impl LocationStore {
    /// Create or open the locations table in the database at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self, PipelineError> {
        let conn = open_connection(db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                normalized_key TEXT NOT NULL UNIQUE,
                city TEXT NOT NULL,
                state TEXT NOT NULL,
                is_rural INTEGER NOT NULL,
                chamber_excerpt TEXT,
                government_excerpt TEXT,
                full_research_text TEXT NOT NULL,
                fetch_succeeded INTEGER NOT NULL,
                fetched_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| persistence_error("create locations table", e))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_locations_city ON locations(city, state)",
            [],
        )
        .map_err(|e| persistence_error("create locations index", e))?;

        Ok(LocationStore { conn })
    }

    /// Insert a location if its normalized key has not been seen before.
    /// Returns true if a new row was created.
    pub fn save_if_new(
        &self,
        address: &str,
        location: &ResolvedLocation,
        research: &ResearchSummary,
    ) -> Result<bool, PipelineError> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO locations (
                    address, normalized_key, city, state, is_rural,
                    chamber_excerpt, government_excerpt, full_research_text,
                    fetch_succeeded, fetched_at, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    address,
                    location.normalized_address_key,
                    location.city,
                    location.state,
                    location.is_rural,
                    research.chamber_excerpt,
                    research.government_excerpt,
                    research.full_research_text,
                    research.fetch_succeeded,
                    research.fetched_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| persistence_error("save location", e))?
            > 0;

        if inserted {
            info!("Saved location: {}, {}", location.city, location.state);
        }
        Ok(inserted)
    }

    /// Replace the cached row for an address, inserting one if the address
    /// has never been saved. Rows are never mutated in place: the unique key
    /// conflict drops the old row and a fresh one takes its place. Used by
    /// operator-triggered re-research.
    pub fn replace_research(
        &self,
        address: &str,
        location: &ResolvedLocation,
        research: &ResearchSummary,
    ) -> Result<(), PipelineError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO locations (
                    address, normalized_key, city, state, is_rural,
                    chamber_excerpt, government_excerpt, full_research_text,
                    fetch_succeeded, fetched_at, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    address,
                    location.normalized_address_key,
                    location.city,
                    location.state,
                    location.is_rural,
                    research.chamber_excerpt,
                    research.government_excerpt,
                    research.full_research_text,
                    research.fetch_succeeded,
                    research.fetched_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| persistence_error("replace location research", e))?;

        info!(
            "Refreshed research for {}, {}",
            location.city, location.state
        );
        Ok(())
    }

    /// Look up the cached row for a normalized address key.
    pub fn find_by_key(&self, normalized_key: &str) -> Result<Option<LocationRecord>, PipelineError> {
        self.conn
            .query_row(
                "SELECT id, address, normalized_key, city, state, is_rural,
                        chamber_excerpt, government_excerpt, full_research_text,
                        fetch_succeeded, fetched_at
                 FROM locations WHERE normalized_key = ?1",
                params![normalized_key],
                record_from_row,
            )
            .optional()
            .map_err(|e| persistence_error("look up location", e))
    }

    /// Fetch one saved location by id.
    pub fn get(&self, id: i64) -> Result<Option<LocationRecord>, PipelineError> {
        self.conn
            .query_row(
                "SELECT id, address, normalized_key, city, state, is_rural,
                        chamber_excerpt, government_excerpt, full_research_text,
                        fetch_succeeded, fetched_at
                 FROM locations WHERE id = ?1",
                params![id],
                record_from_row,
            )
            .optional()
            .map_err(|e| persistence_error("get location", e))
    }

    /// List saved locations whose research completed, ordered by city then
    /// state.
    pub fn list(&self) -> Result<Vec<SavedLocation>, PipelineError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, address, city, state, is_rural
                 FROM locations
                 WHERE full_research_text != ''
                 ORDER BY city, state",
            )
            .map_err(|e| persistence_error("prepare location query", e))?;

        let rows = stmt
            .query_map([], |row| {
                let address: String = row.get(1)?;
                let city: String = row.get(2)?;
                let state: String = row.get(3)?;
                let label = display_label(&city, &state, &address);
                Ok(SavedLocation {
                    id: row.get(0)?,
                    address,
                    city,
                    state,
                    is_rural: row.get(4)?,
                    display_label: label,
                })
            })
            .map_err(|e| persistence_error("query locations", e))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| persistence_error("collect locations", e))
    }

    /// Delete a saved location. Returns true if a row was removed. Saved
    /// captions are unaffected.
    pub fn delete(&self, id: i64) -> Result<bool, PipelineError> {
        let removed = self
            .conn
            .execute("DELETE FROM locations WHERE id = ?1", params![id])
            .map_err(|e| persistence_error("delete location", e))?
            > 0;

        if removed {
            info!("Deleted location {}", id);
        }
        Ok(removed)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<LocationRecord> {
    let address: String = row.get(1)?;
    let city: String = row.get(3)?;
    let state: String = row.get(4)?;
    let fetched_at: String = row.get(10)?;
    let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);

    let label = display_label(&city, &state, &address);
    Ok(LocationRecord {
        id: row.get(0)?,
        address,
        location: ResolvedLocation {
            city,
            state,
            is_rural: row.get(5)?,
            normalized_address_key: row.get(2)?,
        },
        research: ResearchSummary {
            chamber_excerpt: row.get(6)?,
            government_excerpt: row.get(7)?,
            full_research_text: row.get(8)?,
            fetched_at,
            fetch_succeeded: row.get(9)?,
        },
        display_label: label,
    })
}
