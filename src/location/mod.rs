//! Address parsing and rural/urban classification.
//!
//! Resolution is purely local: a ladder of format heuristics pulls the
//! city and state out of free-text addresses, and an embedded population
//! table decides rurality. Nothing here touches the network, so a bad
//! address fails fast before any model or fetch call is made.

pub mod population;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PipelineError;

pub use population::population_of;

/// A parsed address plus the classification the research step needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub city: String,
    /// Two-letter state abbreviation, uppercase.
    pub state: String,
    pub is_rural: bool,
    /// Stable cache key derived from the raw address.
    pub normalized_address_key: String,
}

impl ResolvedLocation {
    /// "City, ST" label for saved-location lists.
    pub fn display_label(&self) -> String {
        format!("{}, {}", self.city, self.state)
    }
}

/// Full state names and their postal abbreviations.
const STATE_ABBREVIATIONS: [(&str, &str); 50] = [
    ("alabama", "AL"),
    ("alaska", "AK"),
    ("arizona", "AZ"),
    ("arkansas", "AR"),
    ("california", "CA"),
    ("colorado", "CO"),
    ("connecticut", "CT"),
    ("delaware", "DE"),
    ("florida", "FL"),
    ("georgia", "GA"),
    ("hawaii", "HI"),
    ("idaho", "ID"),
    ("illinois", "IL"),
    ("indiana", "IN"),
    ("iowa", "IA"),
    ("kansas", "KS"),
    ("kentucky", "KY"),
    ("louisiana", "LA"),
    ("maine", "ME"),
    ("maryland", "MD"),
    ("massachusetts", "MA"),
    ("michigan", "MI"),
    ("minnesota", "MN"),
    ("mississippi", "MS"),
    ("missouri", "MO"),
    ("montana", "MT"),
    ("nebraska", "NE"),
    ("nevada", "NV"),
    ("new hampshire", "NH"),
    ("new jersey", "NJ"),
    ("new mexico", "NM"),
    ("new york", "NY"),
    ("north carolina", "NC"),
    ("north dakota", "ND"),
    ("ohio", "OH"),
    ("oklahoma", "OK"),
    ("oregon", "OR"),
    ("pennsylvania", "PA"),
    ("rhode island", "RI"),
    ("south carolina", "SC"),
    ("south dakota", "SD"),
    ("tennessee", "TN"),
    ("texas", "TX"),
    ("utah", "UT"),
    ("vermont", "VT"),
    ("virginia", "VA"),
    ("washington", "WA"),
    ("west virginia", "WV"),
    ("wisconsin", "WI"),
    ("wyoming", "WY"),
];

fn abbreviation_for(state_name: &str) -> Option<&'static str> {
    STATE_ABBREVIATIONS
        .iter()
        .find(|(name, _)| *name == state_name)
        .map(|(_, abbr)| *abbr)
}

fn is_known_abbreviation(abbr: &str) -> bool {
    STATE_ABBREVIATIONS.iter().any(|(_, a)| *a == abbr)
}

/// "123 Main St, Springfield, IL 62701"
static COMMA_CITY_ABBR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([^,]+),\s*([A-Z]{2})\s*\d*").expect("valid pattern"));

/// "123 Main St, Springfield, Illinois 62701"
static COMMA_CITY_FULL_STATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([^,]+),\s*([A-Za-z\s]+)\s*\d*").expect("valid pattern"));

/// "Asheville, North Carolina 28801" with at most two city words.
/// Longer state names sort first so "west virginia" wins over "virginia".
static STATE_NAME_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    let mut names: Vec<&str> = STATE_ABBREVIATIONS.iter().map(|(name, _)| *name).collect();
    names.sort_by_key(|name| std::cmp::Reverse(name.len()));
    Regex::new(&format!(
        r"(?i)([A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)?)\s*,\s*({})\s*\d*$",
        names.join("|")
    ))
    .expect("valid pattern")
});

/// "Fayetteville, NC" with no street part.
static CITY_ABBR_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)*),\s*([A-Z]{2})\s*\d*$")
        .expect("valid pattern")
});

/// Pull (city, state) out of a free-text address.
///
/// Tries the most common US formats in order, tolerating missing ZIP
/// codes and unit numbers. Full state names are mapped to abbreviations;
/// lowercase two-letter abbreviations are accepted when they name a real
/// state.
fn parse_city_state(address: &str) -> Option<(String, String)> {
    if let Some(caps) = COMMA_CITY_ABBR_RE.captures(address) {
        return Some((caps[1].trim().to_string(), caps[2].to_string()));
    }

    if let Some(caps) = COMMA_CITY_FULL_STATE_RE.captures(address) {
        let city = caps[1].trim().to_string();
        let state_raw = caps[2].trim().to_lowercase();
        if let Some(abbr) = abbreviation_for(&state_raw) {
            return Some((city, abbr.to_string()));
        }
        let upper = state_raw.to_uppercase();
        if upper.len() == 2 && is_known_abbreviation(&upper) {
            return Some((city, upper));
        }
    }

    if let Some(caps) = STATE_NAME_SUFFIX_RE.captures(address) {
        let state_raw = caps[2].trim().to_lowercase();
        if let Some(abbr) = abbreviation_for(&state_raw) {
            return Some((caps[1].trim().to_string(), abbr.to_string()));
        }
    }

    if let Some(caps) = CITY_ABBR_SUFFIX_RE.captures(address) {
        return Some((caps[1].trim().to_string(), caps[2].to_string()));
    }

    None
}

/// Case- and whitespace-insensitive cache key for a raw address.
pub fn normalize_address_key(address: &str) -> String {
    address
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Turns raw addresses into [`ResolvedLocation`]s.
pub struct LocationResolver {
    rural_population_threshold: u64,
}

impl LocationResolver {
    pub fn new(rural_population_threshold: u64) -> Self {
        Self {
            rural_population_threshold,
        }
    }

    /// Resolve a raw address to city/state plus the rurality flag.
    ///
    /// # Errors
    /// `UserInput` for an empty address, `AddressParse` when no
    /// city/state pair can be isolated. Unknown cities default to urban
    /// since rurality only widens the research net.
    pub fn resolve(&self, address: &str) -> Result<ResolvedLocation, PipelineError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::UserInput(
                "Address must not be empty".to_string(),
            ));
        }

        let (city, state) = parse_city_state(trimmed).ok_or_else(|| {
            PipelineError::AddressParse(format!(
                "No recognizable city and state in '{}'",
                trimmed
            ))
        })?;

        let is_rural = population_of(&city, &state)
            .map(|population| population < self.rural_population_threshold)
            .unwrap_or(false);

        info!(
            "Resolved '{}' to {}, {} ({})",
            trimmed,
            city,
            state,
            if is_rural { "rural" } else { "urban" }
        );

        Ok(ResolvedLocation {
            city,
            state,
            is_rural,
            normalized_address_key: normalize_address_key(trimmed),
        })
    }
}
