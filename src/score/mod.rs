//! Caption quality scoring.
//!
//! Every generated caption is scored against a four-dimension rubric in a
//! single structured model call. Scoring is advisory and never blocks the
//! pipeline: any model or parse failure degrades to a neutral sentinel
//! score instead of an error.

mod rubric;

pub use rubric::{build_scoring_prompt, parse_quality_score, scoring_schema};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::brand::BrandVoice;
use crate::caption::GenerationContext;
use crate::llm::{ReasoningEffort, TextGenerate};

/// Issue text that marks a degraded sentinel score. Callers should treat it
/// as "scoring unavailable" rather than a real caption problem.
pub const SENTINEL_ISSUE: &str = "Could not analyze automatically";

const SCHEMA_NAME: &str = "caption_quality";

/// Human-readable quality band derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Excellent => "Excellent",
            QualityTier::Good => "Good",
            QualityTier::Fair => "Fair",
            QualityTier::Poor => "Poor",
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a composite score onto its tier.
pub fn tier_for(overall: u8) -> QualityTier {
    match overall {
        90..=u8::MAX => QualityTier::Excellent,
        80..=89 => QualityTier::Good,
        70..=79 => QualityTier::Fair,
        _ => QualityTier::Poor,
    }
}

/// Composite score: the four sub-scores averaged and rounded to the nearest
/// integer.
pub fn composite_score(scores: [u8; 4]) -> u8 {
    let sum: u32 = scores.iter().map(|s| u32::from(*s)).sum();
    (f64::from(sum) / 4.0).round() as u8
}

/// Rubric result for one caption. All scores are on a 0-100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub brand_consistency: u8,
    pub local_relevance: u8,
    pub goal_alignment: u8,
    pub overall_quality: u8,
    /// Rounded mean of the four sub-scores, computed locally.
    pub overall_score: u8,
    pub tier: QualityTier,
    pub strengths: Vec<String>,
    pub issues: Vec<String>,
    pub recommendation: String,
}

impl QualityScore {
    /// Neutral fallback used when the scoring call fails or returns
    /// something unparseable.
    pub fn degraded() -> Self {
        let overall = composite_score([75, 75, 75, 75]);
        QualityScore {
            brand_consistency: 75,
            local_relevance: 75,
            goal_alignment: 75,
            overall_quality: 75,
            overall_score: overall,
            tier: tier_for(overall),
            strengths: vec!["Manual review recommended".to_string()],
            issues: vec![SENTINEL_ISSUE.to_string()],
            recommendation: "Review".to_string(),
        }
    }

    /// True when this score is the fallback sentinel rather than a real
    /// model assessment.
    pub fn is_degraded(&self) -> bool {
        self.issues.iter().any(|issue| issue == SENTINEL_ISSUE)
    }
}

/// Scores captions against the brand rubric.
pub struct QualityScorer {
    text: Arc<dyn TextGenerate>,
    voice: BrandVoice,
    effort: ReasoningEffort,
}

impl QualityScorer {
    pub fn new(text: Arc<dyn TextGenerate>, voice: BrandVoice, effort: ReasoningEffort) -> Self {
        QualityScorer {
            text,
            voice,
            effort,
        }
    }

    /// Score a caption. Never fails: model errors and malformed responses
    /// degrade to [`QualityScore::degraded`].
    pub async fn score(&self, caption: &str, context: &GenerationContext) -> QualityScore {
        let prompt = build_scoring_prompt(caption, context, &self.voice);
        let schema = scoring_schema();

        let response = match self
            .text
            .complete_structured(&prompt, SCHEMA_NAME, &schema, self.effort)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Quality scoring call failed, using fallback score: {}", e);
                return QualityScore::degraded();
            }
        };

        match parse_quality_score(&response) {
            Ok(score) => {
                info!(
                    overall = score.overall_score,
                    tier = %score.tier,
                    "Caption scored"
                );
                score
            }
            Err(e) => {
                warn!("Quality scoring response unusable, using fallback score: {}", e);
                QualityScore::degraded()
            }
        }
    }
}
