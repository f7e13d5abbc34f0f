//! Prompt assembly for caption generation and regeneration.
//!
//! Sections are concatenated in a fixed order: platform constraints,
//! goal, media description, research (or its absence marker), rurality,
//! then the brand voice guardrails. Keeping the order stable makes
//! generations comparable across requests.

use crate::brand::BrandVoice;
use crate::media::MediaDescription;
use crate::research::ResearchSummary;

use super::GenerationContext;

pub const GENERATION_SYSTEM_PROMPT: &str = "You are an expert social media copywriter who specializes in creating authentic, localized content that resonates with specific communities.";

pub const REGENERATION_SYSTEM_PROMPT: &str =
    "You are an expert social media copywriter creating alternative versions of localized content.";

/// Excerpts longer than this are cut before prompt insertion.
const RESEARCH_EXCERPT_LIMIT: usize = 500;

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn media_section(media: &MediaDescription) -> String {
    format!(
        "**MEDIA ANALYSIS:**\nActivities: {}\nMood: {}\nPromotion: {}\nVisible text: {}\nTarget demographic: {}\nSummary: {}",
        media.activities.join(", "),
        media.mood,
        media.promotion_signal,
        if media.visible_text.is_empty() { "(none)" } else { &media.visible_text },
        media.target_demographic,
        media.raw_analysis_text
    )
}

fn research_section(research: &ResearchSummary, is_rural: bool) -> String {
    let body = if research.fetch_succeeded {
        let chamber = if research.chamber_excerpt.is_empty() {
            "(none)".to_string()
        } else {
            truncate(&research.chamber_excerpt, RESEARCH_EXCERPT_LIMIT)
        };
        let government = if research.government_excerpt.is_empty() {
            "(none)".to_string()
        } else {
            truncate(&research.government_excerpt, RESEARCH_EXCERPT_LIMIT)
        };
        format!(
            "Chamber of Commerce info: {}\nGovernment/city info: {}",
            chamber, government
        )
    } else {
        research.full_research_text.clone()
    };

    format!(
        "**LOCAL AREA RESEARCH:**\n{}\nArea type: {}",
        body,
        if is_rural { "Rural" } else { "Urban" }
    )
}

/// Build the first-pass generation prompt.
pub fn build_generation_prompt(context: &GenerationContext, voice: &BrandVoice) -> String {
    let city = &context.location.city;
    let state = &context.location.state;

    format!(
        r#"You are a social media copywriter creating a {platform} caption for {brand} in {city}, {state}.

{platform_block}

**POST GOAL:** {goal}

{media}

{research}

{brand_voice}

**YOUR TASK:**
Create an authentic, localized social media caption that:
1. Achieves the stated goal
2. Reflects the local community's culture and vibe (not generic!)
3. Uses language that resonates with {city}, {state} residents
4. Matches the media content and tone
5. Feels personal and community-focused, NOT like a corporate template

- Keep it authentic - this should NOT feel like a location swap
- Do NOT simply substitute the city name into a template caption
- Include relevant hashtags (mix of brand + local)
- Include a clear call-to-action
- Make it sound like it was written BY someone from {city}, FOR people in {city}

Generate the caption now. Respond with the caption text only."#,
        platform = context.platform.display_name(),
        brand = voice.brand_name,
        city = city,
        state = state,
        platform_block = voice.platform_block(context.platform),
        goal = context.goal,
        media = media_section(&context.media),
        research = research_section(&context.research, context.location.is_rural),
        brand_voice = voice.prompt_block(),
    )
}

/// Build the regeneration prompt: same context, explicit instruction to
/// move away from the previous caption's phrasing.
pub fn build_regeneration_prompt(
    context: &GenerationContext,
    voice: &BrandVoice,
    previous_caption: &str,
) -> String {
    let city = &context.location.city;
    let state = &context.location.state;

    format!(
        r#"You previously created this caption for {brand} in {city}, {state}:

"{previous}"

Now create a DIFFERENT version that:
- Has a different tone/approach
- Uses different local references
- Has different wording while maintaining the same goal
- Does not reuse the previous caption's opening line or phrasing
- Still feels authentic to {city}, {state}

{platform_block}

**POST GOAL:** {goal}

{media}

{research}

{brand_voice}

Create a fresh, alternative caption now. Respond with the caption text only."#,
        brand = voice.brand_name,
        city = city,
        state = state,
        previous = previous_caption,
        platform_block = voice.platform_block(context.platform),
        goal = context.goal,
        media = media_section(&context.media),
        research = research_section(&context.research, context.location.is_rural),
        brand_voice = voice.prompt_block(),
    )
}
