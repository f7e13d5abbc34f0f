//! Scoring prompt, response schema, and response parsing.

use crate::brand::BrandVoice;
use crate::caption::GenerationContext;
use crate::llm::strip_markdown_json;

use super::{composite_score, tier_for, QualityScore};

/// Media and research context are cut to this length in the prompt.
const CONTEXT_SNIPPET_LIMIT: usize = 300;

fn snippet(text: &str) -> String {
    text.chars().take(CONTEXT_SNIPPET_LIMIT).collect()
}

/// Build the single structured scoring prompt covering all four rubric
/// dimensions.
pub fn build_scoring_prompt(
    caption: &str,
    context: &GenerationContext,
    voice: &BrandVoice,
) -> String {
    let location = context.location.display_label();
    let research = if context.research.fetch_succeeded {
        snippet(&context.research.full_research_text)
    } else {
        "none available".to_string()
    };

    format!(
        r#"You are a quality control expert for {brand} reviewing a social media caption.

**CAPTION TO REVIEW:**
"{caption}"

**CONTEXT:**
- Goal: {goal}
- Location: {location}
- Platform: {platform}
- Media content: {media}
- Local research: {research}

**SCORE THIS CAPTION ON:**

1. **brand_consistency (0-100)**: Does it match {brand}'s voice ({tone})? Avoids generic template language and banned phrasing?

2. **local_relevance (0-100)**: Does it feel authentic to {location}? Uses local references appropriately rather than just substituting the city name?

3. **goal_alignment (0-100)**: Does it accomplish the stated goal: "{goal}"?

4. **overall_quality (0-100)**: Grammar, clarity, engagement, call-to-action effectiveness, fit for {platform}.

Also list up to 3 issues, up to 3 strengths, and a recommendation of
"Approve", "Revise", or "Reject"."#,
        brand = voice.brand_name,
        caption = caption,
        goal = context.goal,
        location = location,
        platform = context.platform.display_name(),
        media = snippet(&context.media.raw_analysis_text),
        research = research,
        tone = voice.tone.join(", "),
    )
}

/// Strict response schema for the scoring call. The composite score is
/// computed locally, so the model is never asked for it.
pub fn scoring_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "brand_consistency": {"type": "integer"},
            "local_relevance": {"type": "integer"},
            "goal_alignment": {"type": "integer"},
            "overall_quality": {"type": "integer"},
            "issues": {"type": "array", "items": {"type": "string"}},
            "strengths": {"type": "array", "items": {"type": "string"}},
            "recommendation": {"type": "string", "enum": ["Approve", "Revise", "Reject"]}
        },
        "required": [
            "brand_consistency",
            "local_relevance",
            "goal_alignment",
            "overall_quality",
            "issues",
            "strengths",
            "recommendation"
        ],
        "additionalProperties": false
    })
}

fn sub_score(json: &serde_json::Value, field: &str) -> Result<u8, String> {
    let value = json[field]
        .as_u64()
        .ok_or_else(|| format!("Missing '{}' field", field))?;
    Ok(value.min(100) as u8)
}

fn string_list(json: &serde_json::Value, field: &str) -> Vec<String> {
    json[field]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Parse the scoring response into a [`QualityScore`], recomputing the
/// composite locally regardless of anything the model emitted.
pub fn parse_quality_score(response: &str) -> Result<QualityScore, String> {
    let cleaned = strip_markdown_json(response);
    let json: serde_json::Value = serde_json::from_str(cleaned)
        .map_err(|e| format!("Scoring response was not valid JSON: {}", e))?;

    let brand_consistency = sub_score(&json, "brand_consistency")?;
    let local_relevance = sub_score(&json, "local_relevance")?;
    let goal_alignment = sub_score(&json, "goal_alignment")?;
    let overall_quality = sub_score(&json, "overall_quality")?;

    let overall_score = composite_score([
        brand_consistency,
        local_relevance,
        goal_alignment,
        overall_quality,
    ]);

    Ok(QualityScore {
        brand_consistency,
        local_relevance,
        goal_alignment,
        overall_quality,
        overall_score,
        tier: tier_for(overall_score),
        strengths: string_list(&json, "strengths"),
        issues: string_list(&json, "issues"),
        recommendation: json["recommendation"]
            .as_str()
            .unwrap_or("Review")
            .to_string(),
    })
}
