pub mod api;
pub mod brand;
pub mod caption;
pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod location;
pub mod media;
pub mod pipeline;
pub mod research;
pub mod score;
pub mod store;

pub use api::CaptionApi;
pub use caption::Caption;
pub use config::Settings;
pub use error::PipelineError;
pub use pipeline::{CaptionPipeline, GenerationOutcome, StageEvent};
pub use score::{QualityScore, QualityTier};

/// Install the global tracing subscriber. Respects `RUST_LOG`, defaulting
/// to `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
