//! Local research: chamber-of-commerce and government site lookups.
//!
//! Research enriches captions with real community context but is never
//! allowed to fail a request. Candidate URLs are derived from the city
//! and state, fetched politely, and condensed into short excerpts. When
//! nothing can be fetched the summary degrades to a placeholder and the
//! pipeline carries on.

pub mod fetch;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::location::ResolvedLocation;

pub use fetch::{FetchContent, FetchError, ResearchFetcher};

/// Summary text used when every candidate fetch failed.
pub const NO_RESEARCH_PLACEHOLDER: &str = "no local research available";

const EXCERPT_MAX_CHARS: usize = 600;
const MAX_PARAGRAPHS: usize = 3;

/// Condensed local research for one resolved location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSummary {
    pub chamber_excerpt: String,
    pub government_excerpt: String,
    pub full_research_text: String,
    pub fetched_at: DateTime<Utc>,
    pub fetch_succeeded: bool,
}

impl ResearchSummary {
    /// The degraded summary: explicit placeholder, nothing fetched.
    pub fn unavailable() -> Self {
        Self {
            chamber_excerpt: String::new(),
            government_excerpt: String::new(),
            full_research_text: NO_RESEARCH_PLACEHOLDER.to_string(),
            fetched_at: Utc::now(),
            fetch_succeeded: false,
        }
    }
}

fn city_slug(city: &str) -> String {
    city.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Chamber-of-commerce site pattern, e.g. `www.fayettevillechamber.com`.
pub fn chamber_url(city: &str) -> String {
    format!("https://www.{}chamber.com/", city_slug(city))
}

/// City government site pattern, e.g. `www.fayettevillenc.gov`.
pub fn government_url(city: &str, state: &str) -> String {
    format!(
        "https://www.{}{}.gov/",
        city_slug(city),
        state.to_lowercase()
    )
}

/// County site pattern tried for rural towns, e.g. `www.co.gaffney.sc.us`.
pub fn county_url(city: &str, state: &str) -> String {
    format!(
        "https://www.co.{}.{}.us/",
        city_slug(city),
        state.to_lowercase()
    )
}

/// Condense a page into a short excerpt: title, meta description, and the
/// first few substantial paragraphs. Falls back to a plain-text render of
/// the whole page when the structured parts come up empty.
fn extract_excerpt(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts: Vec<String> = Vec::new();

    if let Ok(selector) = Selector::parse("title") {
        if let Some(element) = document.select(&selector).next() {
            let title = element.text().collect::<String>().trim().to_string();
            if !title.is_empty() {
                parts.push(title);
            }
        }
    }

    if let Ok(selector) = Selector::parse("meta[name='description']") {
        if let Some(element) = document.select(&selector).next() {
            if let Some(content) = element.value().attr("content") {
                let content = content.trim();
                if !content.is_empty() {
                    parts.push(content.to_string());
                }
            }
        }
    }

    if let Ok(selector) = Selector::parse("p") {
        let mut paragraphs = 0;
        for element in document.select(&selector) {
            let text = element.text().collect::<String>();
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            // Skip nav crumbs and one-liners.
            if text.len() >= 80 {
                parts.push(text);
                paragraphs += 1;
                if paragraphs >= MAX_PARAGRAPHS {
                    break;
                }
            }
        }
    }

    let excerpt = if parts.is_empty() {
        html2text::from_read(html.as_bytes(), 120).unwrap_or_else(|e| {
            warn!("html2text conversion failed: {}", e);
            String::new()
        })
    } else {
        parts.join(" ")
    };

    let excerpt = excerpt.split_whitespace().collect::<Vec<_>>().join(" ");
    excerpt.chars().take(EXCERPT_MAX_CHARS).collect()
}

/// Fetches candidate community sites and condenses them into a summary.
pub struct LocalResearchAggregator {
    fetcher: Arc<dyn FetchContent>,
}

impl LocalResearchAggregator {
    pub fn new(fetcher: Arc<dyn FetchContent>) -> Self {
        Self { fetcher }
    }

    /// Research a location. Never fails: any combination of fetch
    /// failures degrades to a partial or placeholder summary.
    pub async fn research(&self, location: &ResolvedLocation) -> ResearchSummary {
        info!(
            "Researching {} ({})",
            location.display_label(),
            if location.is_rural { "rural" } else { "urban" }
        );

        let chamber = self
            .fetch_excerpt("chamber of commerce", &chamber_url(&location.city))
            .await;

        let mut government = self
            .fetch_excerpt(
                "city government",
                &government_url(&location.city, &location.state),
            )
            .await;

        // Rural towns often have no city site of their own; try the county.
        if government.is_none() && location.is_rural {
            government = self
                .fetch_excerpt(
                    "county government",
                    &county_url(&location.city, &location.state),
                )
                .await;
        }

        build_summary(location, chamber, government)
    }

    async fn fetch_excerpt(&self, label: &str, url: &str) -> Option<String> {
        match self.fetcher.fetch(url).await {
            Ok(html) => {
                let excerpt = extract_excerpt(&html);
                if excerpt.is_empty() {
                    warn!("No usable text on {} page {}", label, url);
                    None
                } else {
                    info!("Got {} excerpt from {} ({} chars)", label, url, excerpt.len());
                    Some(excerpt)
                }
            }
            Err(err) => {
                warn!("Could not fetch {} page {}: {}", label, url, err);
                None
            }
        }
    }
}

fn build_summary(
    location: &ResolvedLocation,
    chamber: Option<String>,
    government: Option<String>,
) -> ResearchSummary {
    let fetch_succeeded = chamber.is_some() || government.is_some();

    let full_research_text = if fetch_succeeded {
        let mut sections = vec![format!("Local research for {}:", location.display_label())];
        if let Some(text) = &chamber {
            sections.push(format!("Chamber of commerce: {}", text));
        }
        if let Some(text) = &government {
            sections.push(format!("Local government: {}", text));
        }
        sections.join("\n\n")
    } else {
        NO_RESEARCH_PLACEHOLDER.to_string()
    };

    ResearchSummary {
        chamber_excerpt: chamber.unwrap_or_default(),
        government_excerpt: government.unwrap_or_default(),
        full_research_text,
        fetched_at: Utc::now(),
        fetch_succeeded,
    }
}
