//! Brand voice guidelines and social platform targets.
//!
//! The voice config keeps captions consistent across every location.
//! A default is compiled into the binary; operators can point at their
//! own TOML file to rebrand without recompiling.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PipelineError;

/// Brand voice config compiled into the binary as the default.
const DEFAULT_BRAND_VOICE_TOML: &str = include_str!("../config/brand_voice.toml");

/// Social platform a caption is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Facebook,
    Instagram,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
        }
    }

    /// Capitalized name for prompts and user-facing text.
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Facebook => "Facebook",
            Platform::Instagram => "Instagram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            other => Err(PipelineError::UserInput(format!(
                "Unknown platform '{}'. Supported: facebook, instagram",
                other
            ))),
        }
    }
}

/// Formatting rules for one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformRules {
    pub caption_length: String,
    pub hashtag_strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformGuidelines {
    pub facebook: PlatformRules,
    pub instagram: PlatformRules,
}

/// The brand voice guidelines enforced on every caption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandVoice {
    pub brand_name: String,
    pub tone: Vec<String>,
    pub dos: Vec<String>,
    pub donts: Vec<String>,
    pub required_elements: Vec<String>,
    pub emoji_usage: String,
    pub punctuation: String,
    pub platforms: PlatformGuidelines,
}

impl BrandVoice {
    /// Formatting rules for the given platform.
    pub fn rules_for(&self, platform: Platform) -> &PlatformRules {
        match platform {
            Platform::Facebook => &self.platforms.facebook,
            Platform::Instagram => &self.platforms.instagram,
        }
    }

    /// The brand voice block injected into generation and scoring prompts.
    pub fn prompt_block(&self) -> String {
        let mut block = format!(
            "**{} BRAND VOICE REQUIREMENTS:**\n\nTONE: {}\n\nYOU MUST:\n",
            self.brand_name.to_uppercase(),
            self.tone.join(", ")
        );
        for rule in &self.dos {
            block.push_str(&format!("- {}\n", rule));
        }
        block.push_str("\nNEVER:\n");
        for rule in &self.donts {
            block.push_str(&format!("- {}\n", rule));
        }
        block.push_str("\nREQUIRED:\n");
        for rule in &self.required_elements {
            block.push_str(&format!("- {}\n", rule));
        }
        block.push_str(
            "\nThis is NOT negotiable - violating these guidelines makes the caption unusable.",
        );
        block
    }

    /// The platform-specific block injected into generation prompts.
    pub fn platform_block(&self, platform: Platform) -> String {
        let rules = self.rules_for(platform);
        format!(
            "PLATFORM: {}\n- Caption length: {}\n- Hashtags: {}\n- Emoji usage: {}\n- Punctuation: {}",
            platform.display_name(),
            rules.caption_length,
            rules.hashtag_strategy,
            self.emoji_usage,
            self.punctuation
        )
    }
}

/// Load brand voice guidelines from a TOML file.
pub fn load_brand_voice(path: &Path) -> anyhow::Result<BrandVoice> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read brand voice file {}", path.display()))?;
    let voice: BrandVoice = toml::from_str(&raw)
        .with_context(|| format!("Invalid brand voice file {}", path.display()))?;
    info!("Loaded brand voice for '{}' from {}", voice.brand_name, path.display());
    Ok(voice)
}

/// The compiled-in brand voice guidelines.
pub fn default_brand_voice() -> BrandVoice {
    toml::from_str(DEFAULT_BRAND_VOICE_TOML).expect("embedded brand voice config is valid TOML")
}
