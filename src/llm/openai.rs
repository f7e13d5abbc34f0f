//! OpenAI-backed implementation of the vision and text capabilities.
//!
//! All calls go through the chat-completions endpoint. Vision requests
//! attach frames as base64 data URLs; structured requests use the
//! strict `json_schema` response format so the model cannot drift from
//! the expected shape.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use super::{ChatMessage, ReasoningEffort, TextGenerate, VisionAnalyze};
use crate::error::PipelineError;

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Vision calls finish fast or not at all; text calls may reason longer.
const VISION_TIMEOUT_SECS: u64 = 45;
const TEXT_TIMEOUT_SECS: u64 = 120;

const VISION_MAX_TOKENS: u32 = 500;
const COMPLETION_MAX_TOKENS: u32 = 800;
const STRUCTURED_MAX_TOKENS: u32 = 400;
const CHAT_MAX_TOKENS: u32 = 500;

/// Client holding the API key and the two model identifiers.
///
/// Cheap to clone; each request builds its own `reqwest` client with the
/// timeout that fits the call type.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: String,
    vision_model: String,
    text_model: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        vision_model: impl Into<String>,
        text_model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            vision_model: vision_model.into(),
            text_model: text_model.into(),
        }
    }

    /// Build the request body for a vision analysis call.
    ///
    /// The prompt and every frame share one user message so the model
    /// treats the frames as views of the same piece of media.
    fn build_vision_body(
        &self,
        frames_b64: &[String],
        prompt: &str,
        schema: &serde_json::Value,
    ) -> serde_json::Value {
        let mut content = vec![serde_json::json!({"type": "text", "text": prompt})];
        for frame in frames_b64 {
            content.push(serde_json::json!({
                "type": "image_url",
                "image_url": {"url": format!("data:image/jpeg;base64,{}", frame)}
            }));
        }

        serde_json::json!({
            "model": self.vision_model,
            "max_tokens": VISION_MAX_TOKENS,
            "messages": [
                {"role": "user", "content": content}
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "media_description",
                    "strict": true,
                    "schema": schema
                }
            }
        })
    }

    fn build_completion_body(
        &self,
        system: Option<&str>,
        prompt: &str,
        effort: ReasoningEffort,
    ) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        serde_json::json!({
            "model": self.text_model,
            "max_tokens": COMPLETION_MAX_TOKENS,
            "reasoning_effort": effort.as_str(),
            "messages": messages
        })
    }

    fn build_structured_body(
        &self,
        prompt: &str,
        schema_name: &str,
        schema: &serde_json::Value,
        effort: ReasoningEffort,
    ) -> serde_json::Value {
        serde_json::json!({
            "model": self.text_model,
            "max_tokens": STRUCTURED_MAX_TOKENS,
            "reasoning_effort": effort.as_str(),
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name,
                    "strict": true,
                    "schema": schema
                }
            }
        })
    }

    fn build_chat_body(
        &self,
        messages: &[ChatMessage],
        effort: ReasoningEffort,
    ) -> Result<serde_json::Value, String> {
        let messages = serde_json::to_value(messages)
            .map_err(|e| format!("Failed to serialize chat messages: {}", e))?;

        Ok(serde_json::json!({
            "model": self.text_model,
            "max_tokens": CHAT_MAX_TOKENS,
            "reasoning_effort": effort.as_str(),
            "messages": messages
        }))
    }

    /// Post a chat-completions request and return the assistant text.
    async fn post_chat_completion(
        &self,
        body: &serde_json::Value,
        timeout_secs: u64,
    ) -> Result<String, String> {
        let client = build_api_client(timeout_secs)?;

        let response = client
            .post(API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let msg = if e.is_timeout() {
                    format!("OpenAI API timeout after {}s", timeout_secs)
                } else {
                    format!("OpenAI API request failed: {}", e)
                };
                error!("{}", msg);
                msg
            })?;

        let body_text = handle_api_response(response).await?;
        extract_message_content(&body_text)
    }
}

/// Build a reqwest client with the given timeout for API calls.
fn build_api_client(timeout_secs: u64) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))
}

/// Handle API response: check status and extract body text.
async fn handle_api_response(response: reqwest::Response) -> Result<String, String> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        let truncated: String = body.chars().take(1024).collect();
        let msg = format!("OpenAI API error: {} - {}", status, truncated);
        error!("{}", msg);
        return Err(msg);
    }
    response
        .text()
        .await
        .map_err(|e| format!("Failed to read OpenAI API response body: {}", e))
}

/// Parse the response wrapper: { "choices": [{"message": {"content": "..."}}] }
fn extract_message_content(body_text: &str) -> Result<String, String> {
    let resp_json: serde_json::Value = serde_json::from_str(body_text).map_err(|e| {
        let msg = format!("Failed to parse OpenAI API response wrapper: {}", e);
        error!("{}", msg);
        msg
    })?;

    resp_json["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| {
            let msg = "No content in OpenAI API response".to_string();
            error!("{}", msg);
            msg
        })
}

#[async_trait]
impl VisionAnalyze for OpenAiClient {
    async fn analyze_media(
        &self,
        frames_b64: &[String],
        prompt: &str,
        schema: &serde_json::Value,
    ) -> Result<String, PipelineError> {
        if frames_b64.is_empty() {
            return Err(PipelineError::MediaAnalysis(
                "No frames were provided for analysis".to_string(),
            ));
        }

        info!(
            "Analyzing {} frame(s) with vision model '{}'",
            frames_b64.len(),
            self.vision_model
        );

        let body = self.build_vision_body(frames_b64, prompt, schema);
        self.post_chat_completion(&body, VISION_TIMEOUT_SECS)
            .await
            .map_err(PipelineError::MediaAnalysis)
    }
}

#[async_trait]
impl TextGenerate for OpenAiClient {
    async fn complete(
        &self,
        system: Option<&str>,
        prompt: &str,
        effort: ReasoningEffort,
    ) -> Result<String, PipelineError> {
        info!(
            "Requesting completion from '{}' (effort: {})",
            self.text_model, effort
        );

        let body = self.build_completion_body(system, prompt, effort);
        self.post_chat_completion(&body, TEXT_TIMEOUT_SECS)
            .await
            .map_err(PipelineError::CaptionGeneration)
    }

    async fn complete_structured(
        &self,
        prompt: &str,
        schema_name: &str,
        schema: &serde_json::Value,
        effort: ReasoningEffort,
    ) -> Result<String, PipelineError> {
        info!(
            "Requesting structured completion '{}' from '{}' (effort: {})",
            schema_name, self.text_model, effort
        );

        let body = self.build_structured_body(prompt, schema_name, schema, effort);
        self.post_chat_completion(&body, TEXT_TIMEOUT_SECS)
            .await
            .map_err(PipelineError::CaptionGeneration)
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        effort: ReasoningEffort,
    ) -> Result<String, PipelineError> {
        info!(
            "Continuing chat with {} message(s) on '{}'",
            messages.len(),
            self.text_model
        );

        let body = self
            .build_chat_body(messages, effort)
            .map_err(PipelineError::CaptionGeneration)?;
        self.post_chat_completion(&body, TEXT_TIMEOUT_SECS)
            .await
            .map_err(PipelineError::CaptionGeneration)
    }
}
