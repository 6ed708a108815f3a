//! Multi-factor confidence scoring
//!
//! Folds stage confidence together with what the feedback store knows about
//! the source into one calibrated [0,1] score. Pure given its inputs: the
//! profile lookup happens in the store, not here.

use crate::config::ScoringConfig;
use crate::types::{ConfidenceLevel, SourceProfile, ValidatedSignal};
use tracing::debug;

/// Store-derived inputs the scorer reads alongside the signal
pub struct ScoreInputs<'a> {
    pub profile: &'a SourceProfile,
    /// Trailing win rate for the current hour of day, when enough samples
    /// exist
    pub hour_win_rate: Option<f64>,
}

pub struct ConfidenceScorer {
    config: ScoringConfig,
}

impl ConfidenceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Weighted sum of bounded [0,1] factors, plus a small learned
    /// adjustment for sources with a decidedly hot or cold trailing record.
    pub fn score(&self, signal: &ValidatedSignal, inputs: &ScoreInputs<'_>) -> (f64, ConfidenceLevel) {
        let cfg = &self.config;
        let profile = inputs.profile;

        let source_win_rate = profile.win_rate.clamp(0.0, 1.0);
        let symbol_win_rate = profile
            .symbol_win_rates
            .get(&signal.candidate.symbol)
            .copied()
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        let stage_confidence = signal.candidate.stage_confidence.clamp(0.0, 1.0);
        let time_of_day = inputs.hour_win_rate.unwrap_or(0.5).clamp(0.0, 1.0);
        let market = cfg.market_factor.clamp(0.0, 1.0);
        let completeness = signal.completeness.clamp(0.0, 1.0);
        let calibration = profile.confidence_accuracy.clamp(0.0, 1.0);

        let weight_total = cfg.weight_source_win_rate
            + cfg.weight_symbol_win_rate
            + cfg.weight_stage_confidence
            + cfg.weight_time_of_day
            + cfg.weight_market_factor
            + cfg.weight_completeness
            + cfg.weight_calibration;

        let weighted = cfg.weight_source_win_rate * source_win_rate
            + cfg.weight_symbol_win_rate * symbol_win_rate
            + cfg.weight_stage_confidence * stage_confidence
            + cfg.weight_time_of_day * time_of_day
            + cfg.weight_market_factor * market
            + cfg.weight_completeness * completeness
            + cfg.weight_calibration * calibration;

        let mut score = if weight_total > 0.0 {
            weighted / weight_total
        } else {
            0.5
        };

        // Learned adjustment: only sources with real resolved history move
        if profile.total > 0 {
            if source_win_rate > cfg.hot_source_win_rate {
                score += cfg.learned_adjustment;
            } else if source_win_rate < cfg.cold_source_win_rate {
                score -= cfg.learned_adjustment;
            }
        }

        let score = score.clamp(0.0, 1.0);
        let level = ConfidenceLevel::from_score(score);

        debug!(
            source = %profile.source_id,
            symbol = %signal.candidate.symbol,
            source_win_rate,
            symbol_win_rate,
            stage_confidence,
            time_of_day,
            completeness,
            calibration,
            score,
            %level,
            "confidence scored"
        );

        (score, level)
    }
}
