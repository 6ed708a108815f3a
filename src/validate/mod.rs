//! Candidate validation
//!
//! Enforces schema completeness, numeric sanity and directional consistency
//! before anything reaches the scorer. Symbol aliases are canonicalized
//! here; unknown symbols and out-of-band prices only warn (broker feeds
//! differ), but a direction that contradicts its own levels is a hard
//! reject - a signal is never silently "fixed" into an execution.

use crate::config::ValidationConfig;
use crate::error::ValidateError;
use crate::extract::completeness_score;
use crate::types::{Candidate, Direction, ValidatedSignal};
use tracing::debug;

/// Reward distance over risk distance. A zero-distance stop yields 0,
/// never a division blowup.
pub fn risk_reward(entry_avg: f64, stop: f64, target_avg: f64) -> f64 {
    let risk = (entry_avg - stop).abs();
    if risk > 0.0 {
        (target_avg - entry_avg).abs() / risk
    } else {
        0.0
    }
}

pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, mut candidate: Candidate) -> Result<ValidatedSignal, ValidateError> {
        let mut warnings = Vec::new();

        // Required fields
        if candidate.symbol.trim().is_empty() {
            return Err(ValidateError::MissingField("symbol"));
        }
        if candidate.entry.is_empty() {
            return Err(ValidateError::MissingField("entry"));
        }
        let stop = candidate.stop.ok_or(ValidateError::MissingField("stop"))?;
        if candidate.targets.is_empty() {
            return Err(ValidateError::MissingField("target"));
        }

        // Numeric sanity: all levels strictly positive and finite
        if !candidate.entry.iter().all(|p| p.is_finite() && *p > 0.0) {
            return Err(ValidateError::NonPositivePrice("entry"));
        }
        if !(stop.is_finite() && stop > 0.0) {
            return Err(ValidateError::NonPositivePrice("stop"));
        }
        if !candidate.targets.iter().all(|p| p.is_finite() && *p > 0.0) {
            return Err(ValidateError::NonPositivePrice("target"));
        }

        // Symbol canonicalization; unknown symbols pass with a warning
        let upper = candidate.symbol.to_uppercase();
        let canonical = match self.config.symbol_aliases.get(&upper) {
            Some(resolved) => resolved.clone(),
            None => upper,
        };
        if !self.config.price_bands.contains_key(&canonical) {
            warnings.push(format!("unknown symbol: {canonical}"));
        }
        candidate.symbol = canonical;

        // Range sanity against the configured band, warning only
        if let Some(band) = self.config.price_bands.get(&candidate.symbol) {
            let out_of_band = candidate
                .entry
                .iter()
                .chain(candidate.targets.iter())
                .chain(std::iter::once(&stop))
                .any(|p| !band.contains(*p));
            if out_of_band {
                warnings.push(format!(
                    "price outside expected band [{}, {}] for {}",
                    band.min, band.max, candidate.symbol
                ));
            }
        }

        // Directional consistency is a hard failure
        let entry_avg = candidate.entry_avg();
        let target_avg = candidate.target_avg();
        match candidate.direction {
            Direction::Buy => {
                if stop >= entry_avg || target_avg <= entry_avg {
                    return Err(ValidateError::DirectionalInconsistency(format!(
                        "BUY requires stop {stop} < entry {entry_avg} < target {target_avg}"
                    )));
                }
            }
            Direction::Sell => {
                if stop <= entry_avg || target_avg >= entry_avg {
                    return Err(ValidateError::DirectionalInconsistency(format!(
                        "SELL requires target {target_avg} < entry {entry_avg} < stop {stop}"
                    )));
                }
            }
        }

        // Derived levels are guesses the heuristic stage flagged; surface
        // them and exclude them from the completeness tally
        for field in &candidate.derived_fields {
            warnings.push(format!("derived:{field}"));
        }
        let stop_parsed = !candidate.derived_fields.iter().any(|f| f == "stop");
        let targets_parsed = !candidate.derived_fields.iter().any(|f| f == "target");

        let completeness = completeness_score(
            true,
            true,
            true,
            targets_parsed,
            stop_parsed,
            targets_parsed && candidate.targets.len() > 1,
        );

        let risk_reward = risk_reward(entry_avg, stop, target_avg);

        debug!(
            symbol = %candidate.symbol,
            direction = %candidate.direction,
            risk_reward,
            completeness,
            warnings = warnings.len(),
            "candidate validated"
        );

        Ok(ValidatedSignal {
            candidate,
            risk_reward,
            completeness,
            warnings,
        })
    }
}
