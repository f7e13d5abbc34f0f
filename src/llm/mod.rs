//! Language-model client traits and shared request types.
//!
//! The pipeline talks to models through two narrow capability traits so
//! the stages stay testable without network access. The OpenAI-backed
//! implementation lives in [`openai`].

pub mod openai;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub use openai::OpenAiClient;

/// How much reasoning the text model should spend on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningEffort {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(PipelineError::Config(format!(
                "Unknown reasoning effort '{}' (expected low, medium, or high)",
                other
            ))),
        }
    }
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn in a chat-completion conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Vision capability: describe media frames against a JSON schema.
#[async_trait]
pub trait VisionAnalyze: Send + Sync {
    /// Analyze one or more base64-encoded JPEG frames.
    ///
    /// Returns the model's raw text, which the caller parses against
    /// `schema`. Multiple frames describe one piece of media (video
    /// sampled at intervals), not independent images.
    async fn analyze_media(
        &self,
        frames_b64: &[String],
        prompt: &str,
        schema: &serde_json::Value,
    ) -> Result<String, PipelineError>;
}

/// Text capability: free-form completion, structured output, and chat.
#[async_trait]
pub trait TextGenerate: Send + Sync {
    /// Complete a prompt, optionally under a system message.
    async fn complete(
        &self,
        system: Option<&str>,
        prompt: &str,
        effort: ReasoningEffort,
    ) -> Result<String, PipelineError>;

    /// Complete a prompt with the response constrained to a JSON schema.
    async fn complete_structured(
        &self,
        prompt: &str,
        schema_name: &str,
        schema: &serde_json::Value,
        effort: ReasoningEffort,
    ) -> Result<String, PipelineError>;

    /// Continue a multi-turn conversation.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        effort: ReasoningEffort,
    ) -> Result<String, PipelineError>;
}

/// Strip a Markdown code fence from model output, if present.
///
/// Models sometimes wrap JSON in ```json fences even when asked not to.
pub fn strip_markdown_json(response: &str) -> &str {
    let trimmed = response.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    body.strip_suffix("```").unwrap_or(body).trim()
}
