//! Caption synthesis from goal, media, research, and brand voice.

pub mod prompts;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::brand::{BrandVoice, Platform};
use crate::error::PipelineError;
use crate::llm::{ReasoningEffort, TextGenerate};
use crate::location::ResolvedLocation;
use crate::media::MediaDescription;
use crate::research::ResearchSummary;

use prompts::{
    build_generation_prompt, build_regeneration_prompt, GENERATION_SYSTEM_PROMPT,
    REGENERATION_SYSTEM_PROMPT,
};

/// Everything one generate or regenerate call needs.
///
/// Assembled fresh per call; regeneration carries the cached media
/// description and research forward instead of re-running them.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub goal: String,
    pub platform: Platform,
    pub location: ResolvedLocation,
    pub research: ResearchSummary,
    pub media: MediaDescription,
    pub previous_caption: Option<String>,
}

/// A generated caption. Persisted only on explicit save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Caption {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// Drives the text capability to produce captions.
pub struct CaptionGenerator {
    text: Arc<dyn TextGenerate>,
    voice: BrandVoice,
    effort: ReasoningEffort,
}

impl CaptionGenerator {
    pub fn new(text: Arc<dyn TextGenerate>, voice: BrandVoice, effort: ReasoningEffort) -> Self {
        Self {
            text,
            voice,
            effort,
        }
    }

    /// Generate a caption for the given context.
    ///
    /// # Errors
    /// `CaptionGeneration` when the text capability fails or returns an
    /// empty caption. There is no pipeline-level retry.
    pub async fn generate(&self, context: &GenerationContext) -> Result<Caption, PipelineError> {
        info!(
            "Generating {} caption for {}",
            context.platform,
            context.location.display_label()
        );

        let prompt = build_generation_prompt(context, &self.voice);
        let text = self
            .text
            .complete(Some(GENERATION_SYSTEM_PROMPT), &prompt, self.effort)
            .await?;

        finish_caption(text, None)
    }

    /// Generate a variation that moves away from the previous caption.
    ///
    /// # Errors
    /// `UserInput` when no previous caption was supplied;
    /// `CaptionGeneration` when the capability fails, returns an empty
    /// caption, or parrots the previous caption back.
    pub async fn regenerate(&self, context: &GenerationContext) -> Result<Caption, PipelineError> {
        let previous = context.previous_caption.as_deref().ok_or_else(|| {
            PipelineError::UserInput("Regeneration requires the previous caption".to_string())
        })?;

        info!(
            "Regenerating {} caption for {}",
            context.platform,
            context.location.display_label()
        );

        let prompt = build_regeneration_prompt(context, &self.voice, previous);
        let text = self
            .text
            .complete(Some(REGENERATION_SYSTEM_PROMPT), &prompt, self.effort)
            .await?;

        finish_caption(text, Some(previous))
    }
}

/// Trim the model output and reject empty or unchanged captions.
fn finish_caption(text: String, previous: Option<&str>) -> Result<Caption, PipelineError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(PipelineError::CaptionGeneration(
            "Model returned an empty caption".to_string(),
        ));
    }
    if let Some(previous) = previous {
        if text == previous.trim() {
            return Err(PipelineError::CaptionGeneration(
                "Regeneration returned the same caption as before".to_string(),
            ));
        }
    }
    Ok(Caption::new(text))
}
