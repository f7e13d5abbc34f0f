//! Media analysis: turning an uploaded photo or video into a structured
//! description the caption generator can build on.
//!
//! Video arrives as pre-extracted frames (sampling happens at the upload
//! boundary); the analyzer sends a handful of them in one vision call
//! and describes the clip as a whole. Vision failure is fatal to the
//! request since the caption is grounded in this description.

pub mod image_prep;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PipelineError;
use crate::llm::{strip_markdown_json, VisionAnalyze};

pub use image_prep::prepare_image;

/// Frames above this count are dropped before the vision call.
pub const MAX_ANALYZED_FRAMES: usize = 3;

const VIDEO_EXTENSIONS: [&str; 7] = [".mp4", ".mov", ".avi", ".mkv", ".webm", ".flv", ".wmv"];

const ANALYSIS_PROMPT: &str = r#"Analyze this promotional media for a family entertainment venue. Describe:
1. activities: the activities, attractions, or scenes shown
2. mood: the overall mood and tone
3. promotion_signal: what promotion or message the media is trying to convey
4. visible_text: any text visible in the media (empty string if none)
5. target_demographic: who the media is aimed at (families, kids, teens, etc.)
6. summary: a concise but thorough description of the whole piece

Be concise but thorough. If several frames are supplied they are moments
from one video; describe the video as a whole, not frame by frame."#;

/// Whether a filename looks like a video by extension.
pub fn is_video_file(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Media submitted for analysis: one image, or frames sampled from a video.
#[derive(Debug, Clone)]
pub enum MediaPayload {
    Image { bytes: Vec<u8> },
    VideoFrames { frames: Vec<Vec<u8>> },
}

/// Structured description of one piece of media.
///
/// Produced once per upload and reused across regenerate calls without
/// another vision round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescription {
    pub activities: Vec<String>,
    pub mood: String,
    pub promotion_signal: String,
    pub visible_text: String,
    pub target_demographic: String,
    pub raw_analysis_text: String,
}

/// Strict response schema for the vision call.
pub fn media_description_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "activities": {"type": "array", "items": {"type": "string"}},
            "mood": {"type": "string"},
            "promotion_signal": {"type": "string"},
            "visible_text": {"type": "string"},
            "target_demographic": {"type": "string"},
            "summary": {"type": "string"}
        },
        "required": [
            "activities",
            "mood",
            "promotion_signal",
            "visible_text",
            "target_demographic",
            "summary"
        ],
        "additionalProperties": false
    })
}

/// Map the vision response JSON to a [`MediaDescription`].
/// The summary is required; everything else degrades to empty.
fn parse_media_description(json: &serde_json::Value) -> Result<MediaDescription, String> {
    let summary = json["summary"]
        .as_str()
        .ok_or("Missing 'summary' field")?
        .to_string();

    let activities = json["activities"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    Ok(MediaDescription {
        activities,
        mood: json["mood"].as_str().unwrap_or("").to_string(),
        promotion_signal: json["promotion_signal"].as_str().unwrap_or("").to_string(),
        visible_text: json["visible_text"].as_str().unwrap_or("").to_string(),
        target_demographic: json["target_demographic"].as_str().unwrap_or("").to_string(),
        raw_analysis_text: summary,
    })
}

/// Runs the vision capability over prepared frames.
pub struct MediaAnalyzer {
    vision: Arc<dyn VisionAnalyze>,
}

impl MediaAnalyzer {
    pub fn new(vision: Arc<dyn VisionAnalyze>) -> Self {
        Self { vision }
    }

    /// Analyze one media payload into a structured description.
    ///
    /// # Errors
    /// `MediaAnalysis` on undecodable frames, an empty video sample, a
    /// failed vision call, or a response that does not match the schema.
    /// All of these abort the request.
    pub async fn analyze(&self, payload: &MediaPayload) -> Result<MediaDescription, PipelineError> {
        let frames = match payload {
            MediaPayload::Image { bytes } => vec![prepare_image(bytes)?],
            MediaPayload::VideoFrames { frames } => {
                if frames.is_empty() {
                    return Err(PipelineError::MediaAnalysis(
                        "Video contained no frames to analyze".to_string(),
                    ));
                }
                frames
                    .iter()
                    .take(MAX_ANALYZED_FRAMES)
                    .map(|bytes| prepare_image(bytes))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        info!("Analyzing media ({} frame(s))", frames.len());

        let schema = media_description_schema();
        let response = self
            .vision
            .analyze_media(&frames, ANALYSIS_PROMPT, &schema)
            .await?;

        let cleaned = strip_markdown_json(&response);
        let json: serde_json::Value = serde_json::from_str(cleaned).map_err(|e| {
            PipelineError::MediaAnalysis(format!(
                "Vision response was not valid JSON: {}",
                e
            ))
        })?;

        let description = parse_media_description(&json).map_err(|e| {
            PipelineError::MediaAnalysis(format!("Vision response missing fields: {}", e))
        })?;

        info!(
            "Media described: {} activities, mood '{}'",
            description.activities.len(),
            description.mood
        );

        Ok(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;
    use std::sync::Mutex;

    struct MockVision {
        response: String,
        frames_seen: Mutex<usize>,
    }

    impl MockVision {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                frames_seen: Mutex::new(0),
            }
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
            *self.frames_seen.lock().unwrap() = frames_b64.len();
            Ok(self.response.clone())
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn vision_json() -> String {
        serde_json::json!({
            "activities": ["trampoline jumping", "birthday party"],
            "mood": "high energy",
            "promotion_signal": "birthday party packages",
            "visible_text": "$99 OFF",
            "target_demographic": "families with kids",
            "summary": "Kids bouncing on trampolines at a birthday party with a discount banner."
        })
        .to_string()
    }

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file("party.mp4"));
        assert!(is_video_file("CLIP.MOV"));
        assert!(is_video_file("promo.webm"));
        assert!(!is_video_file("photo.jpg"));
        assert!(!is_video_file("notes.txt"));
    }

    #[test]
    fn test_schema_requires_all_fields() {
        let schema = media_description_schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 6);
        assert!(required.iter().any(|v| v == "activities"));
        assert!(required.iter().any(|v| v == "summary"));
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["properties"]["activities"]["type"], "array");
    }

    #[test]
    fn test_parse_media_description() {
        let json: serde_json::Value = serde_json::from_str(&vision_json()).unwrap();
        let description = parse_media_description(&json).unwrap();
        assert_eq!(description.activities.len(), 2);
        assert_eq!(description.mood, "high energy");
        assert_eq!(description.visible_text, "$99 OFF");
        assert!(description.raw_analysis_text.contains("trampolines"));
    }

    #[test]
    fn test_parse_media_description_requires_summary() {
        let json = serde_json::json!({"activities": [], "mood": "calm"});
        let err = parse_media_description(&json).unwrap_err();
        assert!(err.contains("summary"));
    }

    #[tokio::test]
    async fn test_analyze_image() {
        let analyzer = MediaAnalyzer::new(Arc::new(MockVision::new(&vision_json())));
        let payload = MediaPayload::Image {
            bytes: png_bytes(300, 300),
        };

        let description = analyzer.analyze(&payload).await.unwrap();
        assert!(!description.activities.is_empty());
        assert_eq!(description.target_demographic, "families with kids");
    }

    #[tokio::test]
    async fn test_analyze_accepts_fenced_json() {
        let fenced = format!("```json\n{}\n```", vision_json());
        let analyzer = MediaAnalyzer::new(Arc::new(MockVision::new(&fenced)));
        let payload = MediaPayload::Image {
            bytes: png_bytes(300, 300),
        };

        assert!(analyzer.analyze(&payload).await.is_ok());
    }

    #[tokio::test]
    async fn test_analyze_caps_video_frames() {
        let vision = Arc::new(MockVision::new(&vision_json()));
        let analyzer = MediaAnalyzer::new(vision.clone());
        let payload = MediaPayload::VideoFrames {
            frames: vec![
                png_bytes(300, 300),
                png_bytes(300, 300),
                png_bytes(300, 300),
                png_bytes(300, 300),
                png_bytes(300, 300),
            ],
        };

        analyzer.analyze(&payload).await.unwrap();
        assert_eq!(*vision.frames_seen.lock().unwrap(), MAX_ANALYZED_FRAMES);
    }

    #[tokio::test]
    async fn test_analyze_rejects_empty_video() {
        let analyzer = MediaAnalyzer::new(Arc::new(MockVision::new(&vision_json())));
        let payload = MediaPayload::VideoFrames { frames: vec![] };

        let err = analyzer.analyze(&payload).await.unwrap_err();
        assert!(matches!(err, PipelineError::MediaAnalysis(_)));
    }

    #[tokio::test]
    async fn test_analyze_rejects_malformed_response() {
        let analyzer = MediaAnalyzer::new(Arc::new(MockVision::new("not json at all")));
        let payload = MediaPayload::Image {
            bytes: png_bytes(300, 300),
        };

        let err = analyzer.analyze(&payload).await.unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }
}
