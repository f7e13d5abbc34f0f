//! Conversational caption refinement.
//!
//! A [`RefinementSession`] wraps one caption in an editing conversation. Each
//! instruction replays the full turn history plus the fixed request context
//! to the text model, which returns the updated caption text. Sessions live
//! only as long as the client interaction that opened them and are never
//! persisted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::brand::Platform;
use crate::caption::GenerationContext;
use crate::error::PipelineError;
use crate::llm::{ChatMessage, ReasoningEffort, TextGenerate};

/// Request context frozen when the session starts. Later cache or location
/// changes do not affect an open session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub city: String,
    pub state: String,
    pub goal: String,
    pub platform: Platform,
}

impl From<&GenerationContext> for SessionContext {
    fn from(context: &GenerationContext) -> Self {
        SessionContext {
            city: context.location.city.clone(),
            state: context.location.state.clone(),
            goal: context.goal.clone(),
            platform: context.platform,
        }
    }
}

fn build_editing_system_prompt(
    brand_name: &str,
    context: &SessionContext,
    current_caption: &str,
) -> String {
    format!(
        r#"You are a caption editing assistant for {brand}.

ORIGINAL CONTEXT:
- Location: {city}, {state}
- Post Goal: {goal}
- Platform: {platform}

Your job is to help refine social media captions based on user requests.
- Keep the local, authentic voice
- Maintain relevance to the location and goal
- Follow the user's editing instructions precisely
- Be conversational and helpful

CURRENT CAPTION:
{caption}

The user will ask you to modify this caption. Make the requested changes and return ONLY the updated caption text, nothing else."#,
        brand = brand_name,
        city = context.city,
        state = context.state,
        goal = context.goal,
        platform = context.platform.display_name(),
        caption = current_caption,
    )
}

/// One caption's editing conversation. Owned by the caller and addressed by
/// [`RefinementSession::id`]; turns only ever append.
pub struct RefinementSession {
    id: Uuid,
    context: SessionContext,
    brand_name: String,
    turns: Vec<ChatMessage>,
    current_caption: String,
    text: Arc<dyn TextGenerate>,
    effort: ReasoningEffort,
}

impl RefinementSession {
    pub fn new(
        text: Arc<dyn TextGenerate>,
        brand_name: impl Into<String>,
        context: SessionContext,
        initial_caption: impl Into<String>,
        effort: ReasoningEffort,
    ) -> Self {
        RefinementSession {
            id: Uuid::new_v4(),
            context,
            brand_name: brand_name.into(),
            turns: Vec::new(),
            current_caption: initial_caption.into(),
            text,
            effort,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn current_caption(&self) -> &str {
        &self.current_caption
    }

    pub fn turns(&self) -> &[ChatMessage] {
        &self.turns
    }

    /// Apply one natural-language edit to the current caption.
    ///
    /// On success the session gains exactly one user turn and one assistant
    /// turn and the current caption is replaced with the model's output. On
    /// any failure the session is left exactly as it was.
    pub async fn apply_instruction(&mut self, instruction: &str) -> Result<String, PipelineError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(PipelineError::UserInput(
                "Edit instruction must not be empty".to_string(),
            ));
        }

        let system = build_editing_system_prompt(
            &self.brand_name,
            &self.context,
            &self.current_caption,
        );

        let mut messages = Vec::with_capacity(self.turns.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(self.turns.iter().cloned());
        messages.push(ChatMessage::user(instruction));

        let response = self.text.chat(&messages, self.effort).await?;
        let updated = response.trim();
        if updated.is_empty() {
            return Err(PipelineError::CaptionGeneration(
                "Model returned an empty caption edit".to_string(),
            ));
        }

        self.turns.push(ChatMessage::user(instruction));
        self.turns.push(ChatMessage::assistant(updated));
        self.current_caption = updated.to_string();
        info!(
            session = %self.id,
            turns = self.turns.len(),
            "Applied caption edit"
        );
        Ok(self.current_caption.clone())
    }
}
