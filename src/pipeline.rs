//! Pipeline orchestration.
//!
//! Turns (media, goal, address, platform) into a scored caption:
//! resolve the location, analyze media and gather local research
//! concurrently, generate the caption, then score it. Research failures
//! degrade; media analysis failures abort. Previously researched
//! addresses are served from the location cache.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::brand::{default_brand_voice, BrandVoice, Platform};
use crate::caption::{Caption, CaptionGenerator, GenerationContext};
use crate::chat::{RefinementSession, SessionContext};
use crate::config::Settings;
use crate::error::PipelineError;
use crate::llm::{OpenAiClient, ReasoningEffort, TextGenerate, VisionAnalyze};
use crate::location::{normalize_address_key, LocationResolver, ResolvedLocation};
use crate::media::{MediaAnalyzer, MediaDescription, MediaPayload};
use crate::research::{FetchContent, LocalResearchAggregator, ResearchFetcher, ResearchSummary};
use crate::score::{QualityScore, QualityScorer};
use crate::store::{CaptionStore, LocationRecord, LocationStore, SavedCaption, SavedLocation};

/// Progress signal emitted as each pipeline stage completes. Generation can
/// take tens of seconds at higher reasoning effort, so callers render these
/// instead of a spinner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    MediaAnalyzed,
    ResearchCompleted,
    CaptionGenerated,
    CaptionScored,
}

/// Inputs for a first caption generation.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub goal: String,
    pub address: String,
    pub platform: Platform,
    pub media: MediaPayload,
}

/// Inputs for regenerating a variation. Media analysis and research are
/// carried forward from the previous result rather than recomputed.
#[derive(Debug, Clone)]
pub struct RegenerateRequest {
    pub goal: String,
    pub platform: Platform,
    pub location: ResolvedLocation,
    pub media: MediaDescription,
    pub research: ResearchSummary,
    pub previous_caption: String,
}

/// Everything a completed generate or regenerate produces.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub caption: Caption,
    pub location: ResolvedLocation,
    pub media: MediaDescription,
    pub research: ResearchSummary,
    pub score: QualityScore,
}

/// Result of an operator-triggered research refresh.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutcome {
    pub location: ResolvedLocation,
    pub research: ResearchSummary,
}

/// The caption pipeline. One instance serves many requests; each request
/// owns its context and shares only the location cache and caption store.
pub struct CaptionPipeline {
    resolver: LocationResolver,
    analyzer: MediaAnalyzer,
    aggregator: LocalResearchAggregator,
    generator: CaptionGenerator,
    scorer: QualityScorer,
    text: Arc<dyn TextGenerate>,
    voice: BrandVoice,
    effort: ReasoningEffort,
    db_path: PathBuf,
    events: Option<UnboundedSender<StageEvent>>,
}

impl CaptionPipeline {
    /// Build a pipeline backed by the OpenAI API and live web fetches.
    pub fn from_settings(settings: &Settings) -> Result<Self, PipelineError> {
        let api_key = settings.require_api_key()?;
        let client = Arc::new(OpenAiClient::new(
            api_key,
            &settings.vision_model,
            &settings.text_model,
        ));
        let fetcher = Arc::new(ResearchFetcher::new(Duration::from_secs(
            settings.research_timeout_secs,
        )));

        Ok(Self::with_capabilities(
            settings,
            Arc::clone(&client) as Arc<dyn VisionAnalyze>,
            client,
            fetcher,
        ))
    }

    /// Build a pipeline over explicit capability implementations.
    pub fn with_capabilities(
        settings: &Settings,
        vision: Arc<dyn VisionAnalyze>,
        text: Arc<dyn TextGenerate>,
        fetcher: Arc<dyn FetchContent>,
    ) -> Self {
        let voice = default_brand_voice();
        CaptionPipeline {
            resolver: LocationResolver::new(settings.rural_population_threshold),
            analyzer: MediaAnalyzer::new(vision),
            aggregator: LocalResearchAggregator::new(fetcher),
            generator: CaptionGenerator::new(
                Arc::clone(&text),
                voice.clone(),
                settings.reasoning_effort,
            ),
            scorer: QualityScorer::new(
                Arc::clone(&text),
                voice.clone(),
                settings.reasoning_effort,
            ),
            text,
            voice,
            effort: settings.reasoning_effort,
            db_path: settings.resolve_database_path(),
            events: None,
        }
    }

    /// Register a channel that receives stage-completion events.
    pub fn set_stage_listener(&mut self, events: UnboundedSender<StageEvent>) {
        self.events = Some(events);
    }

    fn emit(&self, event: StageEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Run the full pipeline for one request.
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerationOutcome, PipelineError> {
        let goal = request.goal.trim().to_string();
        if goal.is_empty() {
            return Err(PipelineError::UserInput("Goal must not be empty".to_string()));
        }
        let address = request.address.trim().to_string();
        if address.is_empty() {
            return Err(PipelineError::UserInput(
                "Address must not be empty".to_string(),
            ));
        }

        let cached = self.lookup_cached_location(&address).await;
        let from_cache = cached.is_some();

        let (location, research, media) = match cached {
            Some(record) => {
                info!(
                    "Using cached research for {}, {}",
                    record.location.city, record.location.state
                );
                let media = self.analyzer.analyze(&request.media).await?;
                self.emit(StageEvent::MediaAnalyzed);
                self.emit(StageEvent::ResearchCompleted);
                (record.location, record.research, media)
            }
            None => {
                let location = self.resolver.resolve(&address)?;

                let media_task = async {
                    let media = self.analyzer.analyze(&request.media).await;
                    if media.is_ok() {
                        self.emit(StageEvent::MediaAnalyzed);
                    }
                    media
                };
                let research_task = async {
                    let research = self.aggregator.research(&location).await;
                    self.emit(StageEvent::ResearchCompleted);
                    research
                };

                let (media, research) = tokio::join!(media_task, research_task);
                (location, research, media?)
            }
        };

        let context = GenerationContext {
            goal,
            platform: request.platform,
            location,
            research,
            media,
            previous_caption: None,
        };

        let caption = self.generator.generate(&context).await?;
        self.emit(StageEvent::CaptionGenerated);

        let score = self.scorer.score(&caption.text, &context).await;
        self.emit(StageEvent::CaptionScored);

        if !from_cache {
            self.cache_location(&address, &context.location, &context.research)
                .await;
        }

        Ok(GenerationOutcome {
            caption,
            location: context.location,
            media: context.media,
            research: context.research,
            score,
        })
    }

    /// Produce a different caption for the same request, reusing the media
    /// analysis and research from the first pass.
    pub async fn regenerate(
        &self,
        request: RegenerateRequest,
    ) -> Result<GenerationOutcome, PipelineError> {
        let goal = request.goal.trim().to_string();
        if goal.is_empty() {
            return Err(PipelineError::UserInput("Goal must not be empty".to_string()));
        }
        let previous = request.previous_caption.trim();
        if previous.is_empty() {
            return Err(PipelineError::UserInput(
                "A previous caption is required to regenerate".to_string(),
            ));
        }

        let context = GenerationContext {
            goal,
            platform: request.platform,
            location: request.location,
            research: request.research,
            media: request.media,
            previous_caption: Some(previous.to_string()),
        };

        let caption = self.generator.regenerate(&context).await?;
        self.emit(StageEvent::CaptionGenerated);

        let score = self.scorer.score(&caption.text, &context).await;
        self.emit(StageEvent::CaptionScored);

        Ok(GenerationOutcome {
            caption,
            location: context.location,
            media: context.media,
            research: context.research,
            score,
        })
    }

    /// Force a fresh research pass for an address, bypassing and then
    /// updating the cache.
    pub async fn re_research(&self, address: &str) -> Result<ResearchOutcome, PipelineError> {
        let address = address.trim().to_string();
        if address.is_empty() {
            return Err(PipelineError::UserInput(
                "Address must not be empty".to_string(),
            ));
        }

        let location = self.resolver.resolve(&address)?;
        let research = self.aggregator.research(&location).await;
        self.emit(StageEvent::ResearchCompleted);

        let record_location = location.clone();
        let record_research = research.clone();
        let result = self
            .with_location_store(move |store| {
                store.replace_research(&address, &record_location, &record_research)
            })
            .await;
        if let Err(e) = result {
            warn!("Failed to update cached research: {}", e);
        }

        Ok(ResearchOutcome { location, research })
    }

    /// Open a refinement conversation for a generated caption.
    pub fn open_refinement_session(
        &self,
        context: SessionContext,
        caption: impl Into<String>,
    ) -> RefinementSession {
        RefinementSession::new(
            Arc::clone(&self.text),
            self.voice.brand_name.clone(),
            context,
            caption,
            self.effort,
        )
    }

    /// Persist a caption the operator chose to keep.
    pub async fn save_caption(&self, goal: &str, caption: &str) -> Result<i64, PipelineError> {
        let goal = goal.trim().to_string();
        let caption = caption.trim().to_string();
        if caption.is_empty() {
            return Err(PipelineError::UserInput(
                "Caption must not be empty".to_string(),
            ));
        }

        self.with_caption_store(move |store| store.save(&goal, &caption))
            .await
    }

    /// All saved captions, newest first.
    pub async fn list_captions(&self) -> Result<Vec<SavedCaption>, PipelineError> {
        self.with_caption_store(|store| store.list()).await
    }

    /// All saved locations, ordered by city.
    pub async fn list_locations(&self) -> Result<Vec<SavedLocation>, PipelineError> {
        self.with_location_store(|store| store.list()).await
    }

    /// One saved location with its cached research.
    pub async fn get_location(&self, id: i64) -> Result<Option<LocationRecord>, PipelineError> {
        self.with_location_store(move |store| store.get(id)).await
    }

    /// Remove a saved location. Saved captions are untouched.
    pub async fn delete_location(&self, id: i64) -> Result<bool, PipelineError> {
        self.with_location_store(move |store| store.delete(id))
            .await
    }

    async fn lookup_cached_location(&self, address: &str) -> Option<LocationRecord> {
        let key = normalize_address_key(address);
        match self
            .with_location_store(move |store| store.find_by_key(&key))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!("Location cache lookup failed: {}", e);
                None
            }
        }
    }

    async fn cache_location(
        &self,
        address: &str,
        location: &ResolvedLocation,
        research: &ResearchSummary,
    ) {
        let address = address.to_string();
        let location = location.clone();
        let research = research.clone();
        let result = self
            .with_location_store(move |store| store.save_if_new(&address, &location, &research))
            .await;
        if let Err(e) = result {
            warn!("Failed to cache location: {}", e);
        }
    }

    async fn with_location_store<T, F>(&self, action: F) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce(&LocationStore) -> Result<T, PipelineError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let store = LocationStore::new(&db_path)?;
            action(&store)
        })
        .await
        .map_err(|e| PipelineError::Persistence(format!("Storage task failed: {}", e)))?
    }

    async fn with_caption_store<T, F>(&self, action: F) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce(&CaptionStore) -> Result<T, PipelineError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let store = CaptionStore::new(&db_path)?;
            action(&store)
        })
        .await
        .map_err(|e| PipelineError::Persistence(format!("Storage task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use crate::research::FetchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct MockVision {
        response: String,
    }

    #[async_trait]
    impl VisionAnalyze for MockVision {
        async fn analyze_media(
            &self,
            _frames_b64: &[String],
            _prompt: &str,
            _schema: &serde_json::Value,
        ) -> Result<String, PipelineError> {
            Ok(self.response.clone())
        }
    }

    struct MockText {
        caption: String,
        score: String,
    }

    #[async_trait]
    impl TextGenerate for MockText {
        async fn complete(
            &self,
            _system: Option<&str>,
            _prompt: &str,
            _effort: ReasoningEffort,
        ) -> Result<String, PipelineError> {
            Ok(self.caption.clone())
        }

        async fn complete_structured(
            &self,
            _prompt: &str,
            _schema_name: &str,
            _schema: &serde_json::Value,
            _effort: ReasoningEffort,
        ) -> Result<String, PipelineError> {
            Ok(self.score.clone())
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _effort: ReasoningEffort,
        ) -> Result<String, PipelineError> {
            Ok(self.caption.clone())
        }
    }

    struct MockFetcher {
        pages: HashMap<String, String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FetchContent for MockFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or(FetchError::Status(404))
        }
    }

    fn vision_response() -> String {
        serde_json::json!({
            "activities": ["trampoline jumping", "dodgeball"],
            "mood": "high energy",
            "promotion_signal": "birthday packages",
            "visible_text": "",
            "target_demographic": "families with kids",
            "summary": "Kids bouncing on trampolines at a birthday party."
        })
        .to_string()
    }

    fn score_response() -> String {
        serde_json::json!({
            "brand_consistency": 88,
            "local_relevance": 84,
            "goal_alignment": 90,
            "overall_quality": 86,
            "issues": [],
            "strengths": ["Clear call to action"],
            "recommendation": "Approve"
        })
        .to_string()
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(320, 240, image::Rgb([200, 80, 40]));
        let mut bytes = Vec::new();
        img.write_with_encoder(image::codecs::png::PngEncoder::new(&mut bytes))
            .unwrap();
        bytes
    }

    fn test_pipeline(dir: &TempDir, fetcher: Arc<MockFetcher>) -> CaptionPipeline {
        let settings = Settings {
            database_path: Some(dir.path().join("captionator.db")),
            ..Settings::default()
        };
        CaptionPipeline::with_capabilities(
            &settings,
            Arc::new(MockVision {
                response: vision_response(),
            }),
            Arc::new(MockText {
                caption: "Fayetteville, birthday season starts now. Book your party!".to_string(),
                score: score_response(),
            }),
            fetcher,
        )
    }

    fn empty_fetcher() -> Arc<MockFetcher> {
        Arc::new(MockFetcher {
            pages: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn fayetteville_request() -> GenerateRequest {
        GenerateRequest {
            goal: "Promote birthday parties with $99 discount".to_string(),
            address: "2051 Skibo Rd, Fayetteville, NC 28314".to_string(),
            platform: Platform::Facebook,
            media: MediaPayload::Image { bytes: png_bytes() },
        }
    }

    #[tokio::test]
    async fn test_generate_emits_stage_events_in_order() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = test_pipeline(&dir, empty_fetcher());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        pipeline.set_stage_listener(tx);

        pipeline.generate(fayetteville_request()).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        // Media and research order is not fixed between themselves, but both
        // precede generation and scoring.
        assert_eq!(events.len(), 4);
        assert!(events[..2].contains(&StageEvent::MediaAnalyzed));
        assert!(events[..2].contains(&StageEvent::ResearchCompleted));
        assert_eq!(events[2], StageEvent::CaptionGenerated);
        assert_eq!(events[3], StageEvent::CaptionScored);
    }

    #[tokio::test]
    async fn test_generate_rejects_blank_goal_before_any_capability_call() {
        let dir = TempDir::new().unwrap();
        let fetcher = empty_fetcher();
        let pipeline = test_pipeline(&dir, Arc::clone(&fetcher));

        let mut request = fayetteville_request();
        request.goal = "   ".to_string();

        let err = pipeline.generate(request).await.unwrap_err();
        assert!(matches!(err, PipelineError::UserInput(_)));
        assert!(fetcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_rejects_unparseable_address() {
        let dir = TempDir::new().unwrap();
        let pipeline = test_pipeline(&dir, empty_fetcher());

        let mut request = fayetteville_request();
        request.address = "somewhere out there".to_string();

        let err = pipeline.generate(request).await.unwrap_err();
        assert!(matches!(err, PipelineError::AddressParse(_)));
    }

    #[tokio::test]
    async fn test_second_generate_hits_cache_and_skips_fetches() {
        let dir = TempDir::new().unwrap();
        let fetcher = empty_fetcher();
        let pipeline = test_pipeline(&dir, Arc::clone(&fetcher));

        pipeline.generate(fayetteville_request()).await.unwrap();
        let first_fetch_count = fetcher.calls.lock().unwrap().len();
        assert!(first_fetch_count > 0);

        // Same address, different casing: still one cache entry, no new
        // fetches.
        let mut request = fayetteville_request();
        request.address = "2051 SKIBO RD, FAYETTEVILLE, NC 28314".to_string();
        let outcome = pipeline.generate(request).await.unwrap();

        assert_eq!(fetcher.calls.lock().unwrap().len(), first_fetch_count);
        assert_eq!(outcome.location.city, "Fayetteville");
        assert_eq!(pipeline.list_locations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_generation_does_not_cache_location() {
        struct FailingText;

        #[async_trait]
        impl TextGenerate for FailingText {
            async fn complete(
                &self,
                _system: Option<&str>,
                _prompt: &str,
                _effort: ReasoningEffort,
            ) -> Result<String, PipelineError> {
                Err(PipelineError::CaptionGeneration("model offline".to_string()))
            }

            async fn complete_structured(
                &self,
                _prompt: &str,
                _schema_name: &str,
                _schema: &serde_json::Value,
                _effort: ReasoningEffort,
            ) -> Result<String, PipelineError> {
                Err(PipelineError::CaptionGeneration("model offline".to_string()))
            }

            async fn chat(
                &self,
                _messages: &[ChatMessage],
                _effort: ReasoningEffort,
            ) -> Result<String, PipelineError> {
                Err(PipelineError::CaptionGeneration("model offline".to_string()))
            }
        }

        let dir = TempDir::new().unwrap();
        let settings = Settings {
            database_path: Some(dir.path().join("captionator.db")),
            ..Settings::default()
        };
        let pipeline = CaptionPipeline::with_capabilities(
            &settings,
            Arc::new(MockVision {
                response: vision_response(),
            }),
            Arc::new(FailingText),
            empty_fetcher(),
        );

        let err = pipeline.generate(fayetteville_request()).await.unwrap_err();
        assert!(matches!(err, PipelineError::CaptionGeneration(_)));
        assert!(pipeline.list_locations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_regenerate_reuses_media_and_research_without_fetches() {
        let dir = TempDir::new().unwrap();
        let fetcher = empty_fetcher();
        let pipeline = test_pipeline(&dir, Arc::clone(&fetcher));

        let outcome = pipeline.generate(fayetteville_request()).await.unwrap();
        let fetches_after_generate = fetcher.calls.lock().unwrap().len();

        let regenerated = pipeline
            .regenerate(RegenerateRequest {
                goal: "Promote birthday parties with $99 discount".to_string(),
                platform: Platform::Facebook,
                location: outcome.location.clone(),
                media: outcome.media.clone(),
                research: outcome.research.clone(),
                previous_caption: "A totally different previous caption".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(fetcher.calls.lock().unwrap().len(), fetches_after_generate);
        assert!(!regenerated.caption.text.is_empty());
        assert_eq!(regenerated.score.overall_score, 87);
    }

    #[tokio::test]
    async fn test_regenerate_requires_previous_caption() {
        let dir = TempDir::new().unwrap();
        let pipeline = test_pipeline(&dir, empty_fetcher());
        let outcome = pipeline.generate(fayetteville_request()).await.unwrap();

        let err = pipeline
            .regenerate(RegenerateRequest {
                goal: "Promote birthday parties".to_string(),
                platform: Platform::Facebook,
                location: outcome.location,
                media: outcome.media,
                research: outcome.research,
                previous_caption: "  ".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::UserInput(_)));
    }

    #[tokio::test]
    async fn test_re_research_bypasses_and_updates_cache() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher {
            pages: HashMap::from([(
                "https://www.fayettevillechamber.com/".to_string(),
                "<html><head><title>Fayetteville Chamber</title></head><body><p>The chamber hosts the annual Dogwood Festival downtown with live music and local vendors every spring.</p></body></html>"
                    .to_string(),
            )]),
            calls: Mutex::new(Vec::new()),
        });
        let pipeline = test_pipeline(&dir, Arc::clone(&fetcher));

        pipeline.generate(fayetteville_request()).await.unwrap();
        let calls_after_generate = fetcher.calls.lock().unwrap().len();

        let refreshed = pipeline
            .re_research("2051 Skibo Rd, Fayetteville, NC 28314")
            .await
            .unwrap();

        assert!(fetcher.calls.lock().unwrap().len() > calls_after_generate);
        assert!(refreshed.research.fetch_succeeded);
        assert!(refreshed
            .research
            .full_research_text
            .contains("Dogwood Festival"));

        // The cache now serves the refreshed research.
        let record = pipeline
            .get_location(pipeline.list_locations().await.unwrap()[0].id)
            .await
            .unwrap()
            .unwrap();
        assert!(record.research.full_research_text.contains("Dogwood Festival"));
    }

    #[tokio::test]
    async fn test_save_caption_validates_and_persists() {
        let dir = TempDir::new().unwrap();
        let pipeline = test_pipeline(&dir, empty_fetcher());

        let err = pipeline.save_caption("goal", "   ").await.unwrap_err();
        assert!(matches!(err, PipelineError::UserInput(_)));

        let id = pipeline
            .save_caption("Promote birthday parties", "Fayetteville, let's jump!")
            .await
            .unwrap();
        assert!(id > 0);

        let captions = pipeline.list_captions().await.unwrap();
        assert_eq!(captions.len(), 1);
        assert_eq!(captions[0].caption, "Fayetteville, let's jump!");
    }

    #[tokio::test]
    async fn test_delete_location_round_trip() {
        let dir = TempDir::new().unwrap();
        let pipeline = test_pipeline(&dir, empty_fetcher());

        pipeline.generate(fayetteville_request()).await.unwrap();
        let id = pipeline.list_locations().await.unwrap()[0].id;

        assert!(pipeline.delete_location(id).await.unwrap());
        assert!(pipeline.list_locations().await.unwrap().is_empty());
        assert!(!pipeline.delete_location(id).await.unwrap());
    }
}
