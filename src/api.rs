//! Request/response contract for the transport layer.
//!
//! Mirrors the pipeline one operation per stage-group: generate,
//! regenerate, re-research, chat-edit, save, and the saved-location
//! operations. Errors cross this boundary as human-readable strings.
//! Media decoding (multipart upload, video frame extraction) happens
//! before these types: callers hand in a ready [`MediaPayload`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::brand::Platform;
use crate::caption::Caption;
use crate::chat::{RefinementSession, SessionContext};
use crate::error::PipelineError;
use crate::location::ResolvedLocation;
use crate::media::{MediaDescription, MediaPayload};
use crate::pipeline::{CaptionPipeline, GenerateRequest, GenerationOutcome, RegenerateRequest};
use crate::research::ResearchSummary;
use crate::score::{QualityScore, SENTINEL_ISSUE};
use crate::store::{SavedCaption, SavedLocation};

#[derive(Debug, Clone)]
pub struct GenerateCaptionRequest {
    pub goal: String,
    pub address: String,
    pub platform: String,
    pub media: MediaPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegenerateCaptionRequest {
    pub goal: String,
    pub platform: String,
    pub location: ResolvedLocation,
    pub media: MediaDescription,
    pub research: ResearchSummary,
    pub previous_caption: String,
}

/// Short operator-facing explanation of what the pipeline did.
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningSummary {
    pub media_confirmation: String,
    pub local_research_summary: String,
    pub caption_strategy: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptionResponse {
    pub caption: Caption,
    pub location: ResolvedLocation,
    pub media: MediaDescription,
    pub research: ResearchSummary,
    pub score: QualityScore,
    /// True when automated scoring was unavailable and `score` holds the
    /// neutral fallback.
    pub score_degraded: bool,
    pub reasoning: ReasoningSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReResearchRequest {
    pub address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReResearchResponse {
    pub location: ResolvedLocation,
    pub research: ResearchSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenChatSessionRequest {
    pub caption: String,
    pub city: String,
    pub state: String,
    pub goal: String,
    pub platform: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenChatSessionResponse {
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatEditRequest {
    pub session_id: Uuid,
    pub instruction: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatEditResponse {
    pub session_id: Uuid,
    pub caption: String,
    pub turns: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveCaptionRequest {
    pub goal: String,
    pub caption: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveCaptionResponse {
    pub id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptionListResponse {
    pub captions: Vec<SavedCaption>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationListResponse {
    pub locations: Vec<SavedLocation>,
}

impl std::ops::Deref for LocationListResponse {
    type Target = Vec<SavedLocation>;

    fn deref(&self) -> &Self::Target {
        &self.locations
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationDetailResponse {
    pub id: i64,
    pub address: String,
    pub city: String,
    pub state: String,
    pub is_rural: bool,
    pub display_label: String,
    pub research: ResearchSummary,
}

fn parse_platform(platform: &str) -> Result<Platform, PipelineError> {
    platform.trim().parse()
}

fn truncated(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let cut: String = text.chars().take(limit).collect();
        format!("{}...", cut)
    }
}

fn build_reasoning(outcome: &GenerationOutcome, goal: &str, platform: Platform) -> ReasoningSummary {
    ReasoningSummary {
        media_confirmation: format!(
            "Analyzed media: {}",
            truncated(&outcome.media.raw_analysis_text, 200)
        ),
        local_research_summary: format!(
            "Researched {}: {}",
            outcome.location.display_label(),
            truncated(&outcome.research.full_research_text, 300)
        ),
        caption_strategy: format!(
            "Created localized caption for {} targeting {} audience with goal: {}",
            platform.display_name(),
            outcome.location.display_label(),
            goal
        ),
    }
}

fn caption_response(outcome: GenerationOutcome, goal: &str, platform: Platform) -> CaptionResponse {
    let reasoning = build_reasoning(&outcome, goal, platform);
    let score_degraded = outcome.score.is_degraded();
    let mut score = outcome.score;
    if score_degraded {
        // The sentinel marks scoring as unavailable, not a caption problem.
        // Operators see the flag instead of a phantom issue.
        score.issues.retain(|issue| issue != SENTINEL_ISSUE);
    }
    CaptionResponse {
        caption: outcome.caption,
        location: outcome.location,
        media: outcome.media,
        research: outcome.research,
        score,
        score_degraded,
        reasoning,
    }
}

/// The operation surface the transport layer calls into. Holds the pipeline
/// plus the open refinement sessions.
pub struct CaptionApi {
    pipeline: CaptionPipeline,
    sessions: Mutex<HashMap<Uuid, RefinementSession>>,
}

impl CaptionApi {
    pub fn new(pipeline: CaptionPipeline) -> Self {
        CaptionApi {
            pipeline,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Generate a caption from media, goal, address, and platform.
    pub async fn generate_caption(
        &self,
        request: GenerateCaptionRequest,
    ) -> Result<CaptionResponse, String> {
        let platform = parse_platform(&request.platform)?;
        let goal = request.goal.clone();

        let outcome = self
            .pipeline
            .generate(GenerateRequest {
                goal: request.goal,
                address: request.address,
                platform,
                media: request.media,
            })
            .await?;

        Ok(caption_response(outcome, &goal, platform))
    }

    /// Generate a distinct variation, reusing prior analysis and research.
    pub async fn regenerate_caption(
        &self,
        request: RegenerateCaptionRequest,
    ) -> Result<CaptionResponse, String> {
        let platform = parse_platform(&request.platform)?;
        let goal = request.goal.clone();

        let outcome = self
            .pipeline
            .regenerate(RegenerateRequest {
                goal: request.goal,
                platform,
                location: request.location,
                media: request.media,
                research: request.research,
                previous_caption: request.previous_caption,
            })
            .await?;

        Ok(caption_response(outcome, &goal, platform))
    }

    /// Refresh the local research for an address.
    pub async fn re_research(
        &self,
        request: ReResearchRequest,
    ) -> Result<ReResearchResponse, String> {
        let outcome = self.pipeline.re_research(&request.address).await?;
        Ok(ReResearchResponse {
            location: outcome.location,
            research: outcome.research,
        })
    }

    /// Open a refinement conversation for a caption.
    pub async fn open_chat_session(
        &self,
        request: OpenChatSessionRequest,
    ) -> Result<OpenChatSessionResponse, String> {
        let platform = parse_platform(&request.platform)?;
        let session = self.pipeline.open_refinement_session(
            SessionContext {
                city: request.city,
                state: request.state,
                goal: request.goal,
                platform,
            },
            request.caption,
        );
        let session_id = session.id();

        self.sessions.lock().await.insert(session_id, session);
        info!("Opened chat session {}", session_id);
        Ok(OpenChatSessionResponse { session_id })
    }

    /// Apply one edit instruction within an open session.
    pub async fn chat_edit(&self, request: ChatEditRequest) -> Result<ChatEditResponse, String> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&request.session_id)
            .ok_or_else(|| format!("Unknown chat session {}", request.session_id))?;

        let caption = session.apply_instruction(&request.instruction).await?;
        Ok(ChatEditResponse {
            session_id: request.session_id,
            caption,
            turns: session.turns().len(),
        })
    }

    /// Discard a refinement session. Closing an unknown session is a no-op.
    pub async fn close_chat_session(&self, session_id: Uuid) {
        if self.sessions.lock().await.remove(&session_id).is_some() {
            info!("Closed chat session {}", session_id);
        }
    }

    /// Save a caption the operator wants to keep.
    pub async fn save_caption(
        &self,
        request: SaveCaptionRequest,
    ) -> Result<SaveCaptionResponse, String> {
        let id = self
            .pipeline
            .save_caption(&request.goal, &request.caption)
            .await?;
        Ok(SaveCaptionResponse {
            id,
            message: "Caption saved successfully".to_string(),
        })
    }

    /// All saved captions, newest first.
    pub async fn list_captions(&self) -> Result<CaptionListResponse, String> {
        let captions = self.pipeline.list_captions().await?;
        let total = captions.len();
        Ok(CaptionListResponse { captions, total })
    }

    /// All saved locations.
    pub async fn list_locations(&self) -> Result<LocationListResponse, String> {
        let locations = self.pipeline.list_locations().await?;
        Ok(LocationListResponse { locations })
    }

    /// One saved location with its cached research.
    pub async fn get_location(&self, id: i64) -> Result<LocationDetailResponse, String> {
        let record = self
            .pipeline
            .get_location(id)
            .await?
            .ok_or("Location not found")?;

        Ok(LocationDetailResponse {
            id: record.id,
            address: record.address,
            city: record.location.city,
            state: record.location.state,
            is_rural: record.location.is_rural,
            display_label: record.display_label,
            research: record.research,
        })
    }

    /// Delete a saved location. Previously saved captions are unaffected.
    pub async fn delete_location(&self, id: i64) -> Result<String, String> {
        if self.pipeline.delete_location(id).await? {
            Ok("Location deleted successfully".to_string())
        } else {
            Err("Location not found".to_string())
        }
    }
}
