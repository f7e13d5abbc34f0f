use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use captionator::api::{
    CaptionApi, ChatEditRequest, GenerateCaptionRequest, OpenChatSessionRequest,
    RegenerateCaptionRequest, SaveCaptionRequest,
};
use captionator::config::Settings;
use captionator::error::PipelineError;
use captionator::llm::{ChatMessage, ReasoningEffort, TextGenerate, VisionAnalyze};
use captionator::media::MediaPayload;
use captionator::pipeline::CaptionPipeline;
use captionator::research::{FetchContent, FetchError, NO_RESEARCH_PLACEHOLDER};
use captionator::score::QualityTier;

struct MockVision {
    frames_seen: Mutex<Vec<usize>>,
}

impl MockVision {
    fn new() -> Arc<Self> {
        Arc::new(MockVision {
            frames_seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl VisionAnalyze for MockVision {
    async fn analyze_media(
        &self,
        frames_b64: &[String],
        _prompt: &str,
        _schema: &serde_json::Value,
    ) -> Result<String, PipelineError> {
        self.frames_seen.lock().unwrap().push(frames_b64.len());
        Ok(serde_json::json!({
            "activities": ["trampoline jumping", "dodgeball"],
            "mood": "high energy",
            "promotion_signal": "birthday packages",
            "visible_text": "",
            "target_demographic": "families with kids",
            "summary": "Kids bouncing on trampolines at a birthday party."
        })
        .to_string())
    }
}

struct ScriptedText {
    captions: Mutex<VecDeque<String>>,
    chat_reply: String,
}

impl ScriptedText {
    fn new(captions: Vec<&str>) -> Arc<Self> {
        Arc::new(ScriptedText {
            captions: Mutex::new(captions.into_iter().map(String::from).collect()),
            chat_reply: "Fayetteville, jump in! 🎉".to_string(),
        })
    }
}

#[async_trait]
impl TextGenerate for ScriptedText {
    async fn complete(
        &self,
        _system: Option<&str>,
        _prompt: &str,
        _effort: ReasoningEffort,
    ) -> Result<String, PipelineError> {
        self.captions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PipelineError::CaptionGeneration("no scripted caption".to_string()))
    }

    async fn complete_structured(
        &self,
        _prompt: &str,
        _schema_name: &str,
        _schema: &serde_json::Value,
        _effort: ReasoningEffort,
    ) -> Result<String, PipelineError> {
        Ok(serde_json::json!({
            "brand_consistency": 88,
            "local_relevance": 84,
            "goal_alignment": 90,
            "overall_quality": 86,
            "issues": [],
            "strengths": ["Clear call to action"],
            "recommendation": "Approve"
        })
        .to_string())
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _effort: ReasoningEffort,
    ) -> Result<String, PipelineError> {
        Ok(self.chat_reply.clone())
    }
}

struct MockFetcher {
    pages: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    fn with_pages(pages: HashMap<String, String>) -> Arc<Self> {
        Arc::new(MockFetcher {
            pages,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Self::with_pages(HashMap::new())
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl FetchContent for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.pages.get(url).cloned().ok_or(FetchError::Status(404))
    }
}

fn chamber_page() -> String {
    "<html><head><title>Fayetteville Chamber of Commerce</title></head><body>\
     <p>The Greater Fayetteville Chamber hosts the annual Dogwood Festival downtown \
     with live music, food trucks, and local vendors every spring.</p>\
     </body></html>"
        .to_string()
}

fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(320, 240, image::Rgb([210, 90, 30]));
    let mut bytes = Vec::new();
    img.write_with_encoder(image::codecs::png::PngEncoder::new(&mut bytes))
        .expect("Failed to encode test image");
    bytes
}

fn build_api(
    dir: &TempDir,
    vision: Arc<MockVision>,
    text: Arc<ScriptedText>,
    fetcher: Arc<MockFetcher>,
) -> CaptionApi {
    let settings = Settings {
        database_path: Some(dir.path().join("captionator.db")),
        ..Settings::default()
    };
    CaptionApi::new(CaptionPipeline::with_capabilities(
        &settings, vision, text, fetcher,
    ))
}

fn fayetteville_request() -> GenerateCaptionRequest {
    GenerateCaptionRequest {
        goal: "Promote birthday parties with $99 discount".to_string(),
        address: "2051 Skibo Rd, Fayetteville, NC 28314".to_string(),
        platform: "Facebook".to_string(),
        media: MediaPayload::Image { bytes: png_bytes() },
    }
}

#[tokio::test]
async fn test_generate_caption_end_to_end() {
    let dir = TempDir::new().unwrap();
    let fetcher = MockFetcher::with_pages(HashMap::from([(
        "https://www.fayettevillechamber.com/".to_string(),
        chamber_page(),
    )]));
    let api = build_api(
        &dir,
        MockVision::new(),
        ScriptedText::new(vec![
            "Fayetteville families, birthday season starts now! Book your $99 party today. 🎉",
        ]),
        fetcher,
    );

    let response = api
        .generate_caption(fayetteville_request())
        .await
        .expect("generation should succeed");

    assert_eq!(response.location.city, "Fayetteville");
    assert_eq!(response.location.state, "NC");
    assert!(!response.location.is_rural);

    assert!(!response.media.activities.is_empty());
    assert!(response.caption.text.contains("Fayetteville"));

    assert!(response.research.fetch_succeeded);
    assert!(response.research.full_research_text.contains("Dogwood Festival"));

    assert_eq!(response.score.overall_score, 87);
    assert_eq!(response.score.tier, QualityTier::Good);
    assert!(!response.score.is_degraded());

    assert!(response.reasoning.caption_strategy.contains("Facebook"));
}

#[tokio::test]
async fn test_research_failure_never_blocks_generation() {
    let dir = TempDir::new().unwrap();
    let fetcher = MockFetcher::failing();
    let api = build_api(
        &dir,
        MockVision::new(),
        ScriptedText::new(vec!["Fayetteville, your weekend just got an upgrade."]),
        Arc::clone(&fetcher),
    );

    let response = api
        .generate_caption(fayetteville_request())
        .await
        .expect("generation must survive failed research");

    assert!(fetcher.call_count() > 0);
    assert!(!response.research.fetch_succeeded);
    assert_eq!(response.research.full_research_text, NO_RESEARCH_PLACEHOLDER);
    assert!(!response.caption.text.is_empty());
}

#[tokio::test]
async fn test_repeat_address_is_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let fetcher = MockFetcher::with_pages(HashMap::from([(
        "https://www.fayettevillechamber.com/".to_string(),
        chamber_page(),
    )]));
    let api = build_api(
        &dir,
        MockVision::new(),
        ScriptedText::new(vec!["First caption.", "Second caption."]),
        Arc::clone(&fetcher),
    );

    api.generate_caption(fayetteville_request())
        .await
        .expect("first generation should succeed");
    let fetches_after_first = fetcher.call_count();

    let mut repeat = fayetteville_request();
    repeat.address = "2051 skibo rd,  Fayetteville,  NC 28314".to_string();
    let response = api
        .generate_caption(repeat)
        .await
        .expect("second generation should succeed");

    assert_eq!(fetcher.call_count(), fetches_after_first);
    assert!(response.research.full_research_text.contains("Dogwood Festival"));

    let locations = api.list_locations().await.unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].city, "Fayetteville");
}

#[tokio::test]
async fn test_regenerate_produces_distinct_caption() {
    let dir = TempDir::new().unwrap();
    let api = build_api(
        &dir,
        MockVision::new(),
        ScriptedText::new(vec![
            "Fayetteville, birthday HQ. Book now!",
            "Big birthday energy, Fayetteville. Save your spot today.",
        ]),
        MockFetcher::failing(),
    );

    let first = api
        .generate_caption(fayetteville_request())
        .await
        .expect("first generation should succeed");

    let second = api
        .regenerate_caption(RegenerateCaptionRequest {
            goal: "Promote birthday parties with $99 discount".to_string(),
            platform: "Facebook".to_string(),
            location: first.location.clone(),
            media: first.media.clone(),
            research: first.research.clone(),
            previous_caption: first.caption.text.clone(),
        })
        .await
        .expect("regeneration should succeed");

    assert_ne!(second.caption.text, first.caption.text);
}

#[tokio::test]
async fn test_regenerate_rejects_identical_output() {
    let dir = TempDir::new().unwrap();
    let api = build_api(
        &dir,
        MockVision::new(),
        ScriptedText::new(vec![
            "Fayetteville, birthday HQ. Book now!",
            "Fayetteville, birthday HQ. Book now!",
        ]),
        MockFetcher::failing(),
    );

    let first = api
        .generate_caption(fayetteville_request())
        .await
        .expect("first generation should succeed");

    let err = api
        .regenerate_caption(RegenerateCaptionRequest {
            goal: "Promote birthday parties with $99 discount".to_string(),
            platform: "Facebook".to_string(),
            location: first.location,
            media: first.media,
            research: first.research,
            previous_caption: first.caption.text,
        })
        .await
        .unwrap_err();

    assert!(err.contains("same caption"));
}

#[tokio::test]
async fn test_video_frames_are_capped_for_analysis() {
    let dir = TempDir::new().unwrap();
    let vision = MockVision::new();
    let api = build_api(
        &dir,
        Arc::clone(&vision),
        ScriptedText::new(vec!["Fayetteville in motion."]),
        MockFetcher::failing(),
    );

    let mut request = fayetteville_request();
    request.media = MediaPayload::VideoFrames {
        frames: vec![png_bytes(), png_bytes(), png_bytes(), png_bytes(), png_bytes()],
    };

    api.generate_caption(request)
        .await
        .expect("video generation should succeed");

    let frames_seen = vision.frames_seen.lock().unwrap();
    assert_eq!(frames_seen.as_slice(), &[3]);
}

#[tokio::test]
async fn test_delete_location_leaves_saved_captions() {
    let dir = TempDir::new().unwrap();
    let api = build_api(
        &dir,
        MockVision::new(),
        ScriptedText::new(vec!["Fayetteville, let's jump!"]),
        MockFetcher::failing(),
    );

    let response = api
        .generate_caption(fayetteville_request())
        .await
        .expect("generation should succeed");

    api.save_caption(SaveCaptionRequest {
        goal: "Promote birthday parties with $99 discount".to_string(),
        caption: response.caption.text.clone(),
    })
    .await
    .expect("saving should succeed");

    let location_id = api.list_locations().await.unwrap()[0].id;
    api.delete_location(location_id)
        .await
        .expect("delete should succeed");

    assert!(api.list_locations().await.unwrap().is_empty());
    let captions = api.list_captions().await.unwrap();
    assert_eq!(captions.total, 1);
    assert_eq!(captions.captions[0].caption, response.caption.text);
}

#[tokio::test]
async fn test_chat_refinement_appends_two_turns_per_instruction() {
    let dir = TempDir::new().unwrap();
    let api = build_api(
        &dir,
        MockVision::new(),
        ScriptedText::new(vec![]),
        MockFetcher::failing(),
    );

    let session = api
        .open_chat_session(OpenChatSessionRequest {
            caption: "Fayetteville, let's jump!".to_string(),
            city: "Fayetteville".to_string(),
            state: "NC".to_string(),
            goal: "Promote birthday parties".to_string(),
            platform: "facebook".to_string(),
        })
        .await
        .expect("session should open");

    for expected_turns in [2, 4, 6] {
        let edited = api
            .chat_edit(ChatEditRequest {
                session_id: session.session_id,
                instruction: "tighten it up".to_string(),
            })
            .await
            .expect("edit should succeed");
        assert_eq!(edited.turns, expected_turns);
        assert!(!edited.caption.is_empty());
    }

    api.close_chat_session(session.session_id).await;
    let err = api
        .chat_edit(ChatEditRequest {
            session_id: session.session_id,
            instruction: "one more".to_string(),
        })
        .await
        .unwrap_err();
    assert!(err.contains("Unknown chat session"));
}
