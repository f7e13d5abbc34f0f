//! Runtime settings: models, timeouts, thresholds, and storage paths.
//!
//! Settings start from built-in defaults, can be overlaid from a TOML
//! file, and pick up the API key from the environment. The key never
//! round-trips through config files.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PipelineError;
use crate::llm::ReasoningEffort;

/// Tunable settings for the caption pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Model used to describe photos and video frames.
    pub vision_model: String,
    /// Model used for caption generation, scoring, and refinement chat.
    pub text_model: String,
    /// Default reasoning effort for text-model calls.
    pub reasoning_effort: ReasoningEffort,
    /// Per-request timeout for local research fetches.
    pub research_timeout_secs: u64,
    /// City population at or below which county-site fallbacks are tried.
    pub rural_population_threshold: u64,
    /// Override for the SQLite database location.
    pub database_path: Option<PathBuf>,
    /// API key, read from `OPENAI_API_KEY`. Never serialized.
    #[serde(skip)]
    pub openai_api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vision_model: "gpt-4o".to_string(),
            text_model: "gpt-5.1".to_string(),
            reasoning_effort: ReasoningEffort::Medium,
            research_timeout_secs: 6,
            rural_population_threshold: 25_000,
            database_path: None,
            openai_api_key: None,
        }
    }
}

impl Settings {
    /// Load settings, overlaying a TOML file over the defaults when given.
    ///
    /// The environment is consulted last, so `OPENAI_API_KEY` always wins.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings file {}", path.display()))?;
                let settings: Settings = toml::from_str(&raw)
                    .with_context(|| format!("Invalid settings file {}", path.display()))?;
                info!("Loaded settings from {}", path.display());
                settings
            }
            None => Settings::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    /// Pick up secrets from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            let key = key.trim();
            if !key.is_empty() {
                self.openai_api_key = Some(key.to_string());
            }
        }
    }

    /// The API key, or a config error telling the user how to set it.
    pub fn require_api_key(&self) -> Result<&str, PipelineError> {
        self.openai_api_key.as_deref().ok_or_else(|| {
            PipelineError::Config(
                "OPENAI_API_KEY is not set. Export it before running the pipeline.".to_string(),
            )
        })
    }

    /// Where the SQLite database lives, honoring any configured override.
    pub fn resolve_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// Default database location under the platform data directory.
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("captionator")
        .join("captionator.db")
}
