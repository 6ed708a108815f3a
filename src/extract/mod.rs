//! Extraction stages
//!
//! Three independently failing extractors share one contract and are tried
//! in priority order by the pipeline: model-assisted (external service),
//! structured templates (rigid, high precision) and heuristic scanning
//! (loose per-field scans, lowest precision).

pub mod heuristic;
pub mod model;
pub mod structured;

pub use heuristic::HeuristicExtractor;
pub use model::{CompletionService, HttpCompletionService, ModelExtractor};
pub use structured::StructuredExtractor;

use crate::error::ExtractError;
use crate::types::{Candidate, ExtractionMethod};
use async_trait::async_trait;

/// Common contract for extraction stages.
///
/// `Ok(None)` means "nothing found here" and sends the pipeline to the next
/// stage; `Err` means the stage itself broke (timeout, malformed service
/// reply) and is handled the same way, but logged louder.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn method(&self) -> ExtractionMethod;

    /// Minimum stage confidence the pipeline requires to accept a candidate
    /// from this stage
    fn min_confidence(&self) -> f64;

    async fn extract(&self, text: &str) -> Result<Option<Candidate>, ExtractError>;
}

/// Completeness of an extraction in [0,1]: required fields (symbol,
/// direction, entry, target) over 4, optional fields (stop, extra targets)
/// half-weighted over 2. Shared by the validator and the model stage's
/// confidence fallback.
pub(crate) fn completeness_score(
    has_symbol: bool,
    has_direction: bool,
    has_entry: bool,
    has_target: bool,
    has_stop: bool,
    has_multiple_targets: bool,
) -> f64 {
    let required = [has_symbol, has_direction, has_entry, has_target]
        .iter()
        .filter(|&&b| b)
        .count() as f64;
    let optional = [has_stop, has_multiple_targets]
        .iter()
        .filter(|&&b| b)
        .count() as f64;
    (required / 4.0 + 0.5 * (optional / 2.0)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completeness_full() {
        // 1.0 + 0.5 clamps to 1.0
        let c = completeness_score(true, true, true, true, true, true);
        assert!((c - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_completeness_required_only() {
        let c = completeness_score(true, true, true, true, false, false);
        assert!((c - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_completeness_partial() {
        // symbol + direction + entry, no targets, no optionals
        let c = completeness_score(true, true, true, false, false, false);
        assert!((c - 0.75).abs() < 1e-9);
    }
}
