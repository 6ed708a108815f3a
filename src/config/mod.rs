//! Configuration management for SignalParse
//!
//! Loads from YAML/TOML files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub model_stage: ModelStageConfig,
    pub structured_stage: StructuredStageConfig,
    pub heuristic_stage: HeuristicStageConfig,
    /// Table-valued and therefore file/env only, no set_default entries
    #[serde(default)]
    pub validation: ValidationConfig,
    pub scoring: ScoringConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Version tag for logging
    pub tag: String,
    /// Dedup cache TTL for identical raw text, in seconds
    pub dedup_cache_ttl_secs: u64,
    /// Maximum entries held in the dedup cache
    pub dedup_cache_max_entries: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelStageConfig {
    /// Enable the model-assisted stage
    pub enabled: bool,
    /// Completion service endpoint
    pub endpoint: String,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Retries after the first failed call
    pub max_retries: usize,
    /// Base backoff delay in milliseconds (doubles per retry, jittered)
    pub backoff_base_ms: u64,
    /// Minimum stage confidence to accept a candidate
    pub min_confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StructuredStageConfig {
    /// Confidence assigned to a full template match
    pub match_confidence: f64,
    /// Minimum stage confidence to accept a candidate
    pub min_confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeuristicStageConfig {
    /// Fixed confidence for heuristic candidates
    pub base_confidence: f64,
    /// Minimum stage confidence to accept a candidate
    pub min_confidence: f64,
    /// Sane price range for unlabeled price scanning
    pub sane_price_min: f64,
    pub sane_price_max: f64,
    /// Stop distance derived when no stop is present (fraction of entry)
    pub derived_stop_pct: f64,
    /// Target distances derived when no target is present
    pub derived_target_pcts: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Symbol alias table (GOLD -> XAUUSD, ...)
    #[serde(default = "default_symbol_aliases")]
    pub symbol_aliases: HashMap<String, String>,
    /// Expected price band per canonical symbol
    #[serde(default = "default_price_bands")]
    pub price_bands: HashMap<String, PriceBand>,
    /// Abbreviations expanded by the normalizer
    #[serde(default = "default_abbreviations")]
    pub abbreviations: HashMap<String, String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            symbol_aliases: default_symbol_aliases(),
            price_bands: default_price_bands(),
            abbreviations: default_abbreviations(),
        }
    }
}

/// Weights of the confidence factors. They are normalized at score time,
/// so they need not sum exactly to 1.0 after an override.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    pub weight_source_win_rate: f64,
    pub weight_symbol_win_rate: f64,
    pub weight_stage_confidence: f64,
    pub weight_time_of_day: f64,
    pub weight_market_factor: f64,
    pub weight_completeness: f64,
    pub weight_calibration: f64,
    /// Neutral market factor until a market-data feed exists
    pub market_factor: f64,
    /// Trailing win rate above which the learned adjustment adds 0.1
    pub hot_source_win_rate: f64,
    /// Trailing win rate below which the learned adjustment subtracts 0.1
    pub cold_source_win_rate: f64,
    pub learned_adjustment: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Data directory for the append-only CSV logs
    pub data_dir: String,
    /// Trailing aggregation window in days
    pub window_days: i64,
    /// Minimum resolved samples before a profile leaves neutral
    pub min_samples: usize,
    /// Minimum resolved samples for an hourly win-rate bucket
    pub min_hour_samples: usize,
    /// SourceProfile cache TTL in seconds
    pub profile_cache_ttl_secs: u64,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Pipeline defaults
            .set_default("pipeline.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("pipeline.dedup_cache_ttl_secs", 300)?
            .set_default("pipeline.dedup_cache_max_entries", 4096)?
            // Model stage defaults
            .set_default("model_stage.enabled", true)?
            .set_default("model_stage.endpoint", "http://localhost:8080/v1/extract")?
            .set_default("model_stage.timeout_ms", 5000)?
            .set_default("model_stage.max_retries", 2)?
            .set_default("model_stage.backoff_base_ms", 250)?
            .set_default("model_stage.min_confidence", 0.70)?
            // Structured stage defaults
            .set_default("structured_stage.match_confidence", 0.80)?
            .set_default("structured_stage.min_confidence", 0.75)?
            // Heuristic stage defaults
            .set_default("heuristic_stage.base_confidence", 0.60)?
            .set_default("heuristic_stage.min_confidence", 0.50)?
            .set_default("heuristic_stage.sane_price_min", 0.0001)?
            .set_default("heuristic_stage.sane_price_max", 1_000_000.0)?
            .set_default("heuristic_stage.derived_stop_pct", 0.005)?
            .set_default("heuristic_stage.derived_target_pcts", vec![0.01, 0.02])?
            // Scoring defaults
            .set_default("scoring.weight_source_win_rate", 0.25)?
            .set_default("scoring.weight_symbol_win_rate", 0.20)?
            .set_default("scoring.weight_stage_confidence", 0.15)?
            .set_default("scoring.weight_time_of_day", 0.10)?
            .set_default("scoring.weight_market_factor", 0.10)?
            .set_default("scoring.weight_completeness", 0.10)?
            .set_default("scoring.weight_calibration", 0.10)?
            .set_default("scoring.market_factor", 0.5)?
            .set_default("scoring.hot_source_win_rate", 0.7)?
            .set_default("scoring.cold_source_win_rate", 0.3)?
            .set_default("scoring.learned_adjustment", 0.1)?
            // Store defaults
            .set_default("store.data_dir", "./data")?
            .set_default("store.window_days", 30)?
            .set_default("store.min_samples", 5)?
            .set_default("store.min_hour_samples", 5)?
            .set_default("store.profile_cache_ttl_secs", 60)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (SIGNALPARSE__*)
            .add_source(Environment::with_prefix("SIGNALPARSE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Generate a digest of the config for startup logging
    pub fn digest(&self) -> String {
        format!(
            "tag={} model={} min_conf=[{:.2}/{:.2}/{:.2}] window={}d min_samples={}",
            self.pipeline.tag,
            self.model_stage.enabled,
            self.model_stage.min_confidence,
            self.structured_stage.min_confidence,
            self.heuristic_stage.min_confidence,
            self.store.window_days,
            self.store.min_samples
        )
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig {
                tag: env!("CARGO_PKG_VERSION").to_string(),
                dedup_cache_ttl_secs: 300,
                dedup_cache_max_entries: 4096,
            },
            model_stage: ModelStageConfig {
                enabled: true,
                endpoint: "http://localhost:8080/v1/extract".to_string(),
                timeout_ms: 5000,
                max_retries: 2,
                backoff_base_ms: 250,
                min_confidence: 0.70,
            },
            structured_stage: StructuredStageConfig {
                match_confidence: 0.80,
                min_confidence: 0.75,
            },
            heuristic_stage: HeuristicStageConfig {
                base_confidence: 0.60,
                min_confidence: 0.50,
                sane_price_min: 0.0001,
                sane_price_max: 1_000_000.0,
                derived_stop_pct: 0.005,
                derived_target_pcts: vec![0.01, 0.02],
            },
            validation: ValidationConfig::default(),
            scoring: ScoringConfig {
                weight_source_win_rate: 0.25,
                weight_symbol_win_rate: 0.20,
                weight_stage_confidence: 0.15,
                weight_time_of_day: 0.10,
                weight_market_factor: 0.10,
                weight_completeness: 0.10,
                weight_calibration: 0.10,
                market_factor: 0.5,
                hot_source_win_rate: 0.7,
                cold_source_win_rate: 0.3,
                learned_adjustment: 0.1,
            },
            store: StoreConfig {
                data_dir: "./data".to_string(),
                window_days: 30,
                min_samples: 5,
                min_hour_samples: 5,
                profile_cache_ttl_secs: 60,
            },
        }
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let cfg = AppConfig::default();
        let sum = cfg.scoring.weight_source_win_rate
            + cfg.scoring.weight_symbol_win_rate
            + cfg.scoring.weight_stage_confidence
            + cfg.scoring.weight_time_of_day
            + cfg.scoring.weight_market_factor
            + cfg.scoring.weight_completeness
            + cfg.scoring.weight_calibration;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_digest_mentions_tag() {
        let cfg = AppConfig::default();
        assert!(cfg.digest().contains("tag="));
    }
}
