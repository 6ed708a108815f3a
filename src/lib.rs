//! SignalParse Library
//!
//! Turns free-text trading alerts into structured, validated trade
//! instructions with a calibrated confidence score, learning which sources
//! and patterns to trust from reported outcomes.

pub mod config;
pub mod error;
pub mod extract;
pub mod normalize;
pub mod pipeline;
pub mod scoring;
pub mod store;
pub mod types;
pub mod validate;

pub use error::Rejected;
pub use pipeline::Pipeline;
pub use store::FeedbackStore;
pub use types::{
    ConfidenceLevel, Direction, Outcome, OutcomeResult, ScoredSignal, SignalState, SourceProfile,
};

/// Install the default tracing subscriber for embedding binaries.
/// Filter via RUST_LOG (e.g. `RUST_LOG=signalparse=debug`).
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
