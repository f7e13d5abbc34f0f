//! Embedded city population table backing the rural/urban heuristic.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::Deserialize;

const POPULATION_TOML: &str = include_str!("../../config/city_population.toml");

#[derive(Deserialize)]
struct PopulationTable {
    populations: HashMap<String, u64>,
}

static POPULATIONS: LazyLock<HashMap<String, u64>> = LazyLock::new(|| {
    let table: PopulationTable =
        toml::from_str(POPULATION_TOML).expect("embedded population table is valid TOML");
    table.populations
});

/// Population of `city, state` if the table knows it.
///
/// Lookup is case-insensitive. Unknown cities return `None` and the
/// caller defaults them to urban.
pub fn population_of(city: &str, state: &str) -> Option<u64> {
    let key = format!(
        "{}, {}",
        city.trim().to_lowercase(),
        state.trim().to_lowercase()
    );
    POPULATIONS.get(&key).copied()
}
