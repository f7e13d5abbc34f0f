//! Error types shared across the caption pipeline.

use thiserror::Error;

/// Errors surfaced by pipeline stages and stores.
///
/// Each variant corresponds to one stage of the pipeline so callers can
/// tell user mistakes apart from upstream service failures.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The caller supplied input the pipeline cannot work with.
    #[error("Invalid input: {0}")]
    UserInput(String),

    /// The street address did not contain a recognizable city and state.
    #[error("Could not parse address: {0}")]
    AddressParse(String),

    /// The vision service failed to describe the supplied media.
    #[error("Media analysis failed: {0}")]
    MediaAnalysis(String),

    /// The language model failed to produce or refine a caption.
    #[error("Caption generation failed: {0}")]
    CaptionGeneration(String),

    /// Configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A database read or write failed.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl PipelineError {
    /// Whether retrying the same request may succeed without changes.
    ///
    /// User-facing input problems never are. Service and storage failures
    /// are usually transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::UserInput(_) | PipelineError::AddressParse(_) => false,
            PipelineError::MediaAnalysis(_)
            | PipelineError::CaptionGeneration(_)
            | PipelineError::Persistence(_) => true,
            PipelineError::Config(_) => false,
        }
    }
}

impl From<PipelineError> for String {
    fn from(err: PipelineError) -> Self {
        err.to_string()
    }
}
