//! Pipeline orchestrator
//!
//! The single entry point callers use: normalize, try the extraction stages
//! in priority order, validate, score against the feedback store, record
//! exactly one parse attempt per run. A TTL cache on the content hash
//! short-circuits repeated copies of the same alert, and concurrent
//! duplicates coalesce on a per-key lock so only one of them runs the stage
//! chain.
//!
//! All store writes happen after the stage chain resolves, so cancelling an
//! in-flight `interpret` (dropping the future, e.g. on shutdown) never
//! leaves partial attempt records behind.

use crate::config::AppConfig;
use crate::error::Rejected;
use crate::extract::{
    CompletionService, Extractor, HeuristicExtractor, ModelExtractor, StructuredExtractor,
};
use crate::normalize::Normalizer;
use crate::scoring::{ConfidenceScorer, ScoreInputs};
use crate::store::FeedbackStore;
use crate::types::{signal_hash, Outcome, ParseAttempt, ScoredSignal};
use crate::validate::Validator;
use anyhow::Result;
use chrono::{Timelike, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

struct CachedResult {
    signal: ScoredSignal,
    inserted_at: Instant,
}

pub struct Pipeline {
    normalizer: Normalizer,
    extractors: Vec<Box<dyn Extractor>>,
    validator: Validator,
    scorer: ConfidenceScorer,
    store: Arc<FeedbackStore>,
    cache: RwLock<HashMap<String, CachedResult>>,
    /// One lock per in-flight hash:source key; concurrent duplicates queue
    /// here instead of re-running the stage chain
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    cache_ttl: Duration,
    cache_max_entries: usize,
}

impl Pipeline {
    /// Standard assembly: model stage over HTTP, then templates, then
    /// heuristics
    pub fn new(config: AppConfig, store: Arc<FeedbackStore>) -> Self {
        let model = ModelExtractor::from_config(config.model_stage.clone());
        Self::assemble(config, store, Box::new(model))
    }

    /// Assembly with an injected completion service (tests, offline runs)
    pub fn with_completion_service(
        config: AppConfig,
        store: Arc<FeedbackStore>,
        service: Box<dyn CompletionService>,
    ) -> Self {
        let model = ModelExtractor::new(service, config.model_stage.clone());
        Self::assemble(config, store, Box::new(model))
    }

    fn assemble(config: AppConfig, store: Arc<FeedbackStore>, model: Box<dyn Extractor>) -> Self {
        let extractors: Vec<Box<dyn Extractor>> = vec![
            model,
            Box::new(StructuredExtractor::new(config.structured_stage.clone())),
            Box::new(HeuristicExtractor::new(config.heuristic_stage.clone())),
        ];
        info!(config = %config.digest(), "pipeline assembled");

        Self {
            normalizer: Normalizer::new(config.validation.abbreviations.clone()),
            extractors,
            validator: Validator::new(config.validation),
            scorer: ConfidenceScorer::new(config.scoring),
            store,
            cache: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            cache_ttl: Duration::from_secs(config.pipeline.dedup_cache_ttl_secs),
            cache_max_entries: config.pipeline.dedup_cache_max_entries,
        }
    }

    /// Interpret one raw alert. The returned ScoredSignal is owned by the
    /// caller; the pipeline keeps no reference beyond its dedup cache.
    pub async fn interpret(&self, raw_text: &str, source_id: &str) -> Result<ScoredSignal, Rejected> {
        let started = Instant::now();
        let normalized = self.normalizer.normalize(raw_text);
        let hash = signal_hash(&normalized);

        let cache_key = format!("{hash}:{source_id}");
        if let Some(cached) = self.cache_lookup(&cache_key) {
            debug!(%hash, source_id, "dedup cache hit");
            return Ok(cached);
        }

        // Coalesce concurrent duplicates: one task per key runs the stage
        // chain, the rest queue on its lock and take the cached result
        let key_lock = {
            let mut in_flight = self.in_flight.lock().await;
            Arc::clone(in_flight.entry(cache_key.clone()).or_default())
        };
        let running = key_lock.lock().await;

        let result = match self.cache_lookup(&cache_key) {
            Some(cached) => {
                debug!(%hash, source_id, "dedup cache hit after coalescing");
                Ok(cached)
            }
            None => {
                self.run_stages(&normalized, &hash, &cache_key, source_id, started)
                    .await
            }
        };

        drop(running);
        let mut in_flight = self.in_flight.lock().await;
        // A newer caller may have replaced the entry; only remove our own
        if let Some(entry) = in_flight.get(&cache_key) {
            if Arc::ptr_eq(entry, &key_lock) {
                in_flight.remove(&cache_key);
            }
        }

        result
    }

    async fn run_stages(
        &self,
        normalized: &str,
        hash: &str,
        cache_key: &str,
        source_id: &str,
        started: Instant,
    ) -> Result<ScoredSignal, Rejected> {
        // Stage chain: first candidate clearing its stage threshold wins
        let mut candidate = None;
        let mut last_stage_error = None;
        for extractor in &self.extractors {
            let method = extractor.method();
            match extractor.extract(normalized).await {
                Ok(Some(c)) if c.stage_confidence >= extractor.min_confidence() => {
                    debug!(%method, confidence = c.stage_confidence, "stage accepted");
                    candidate = Some(c);
                    break;
                }
                Ok(Some(c)) => {
                    debug!(
                        %method,
                        confidence = c.stage_confidence,
                        threshold = extractor.min_confidence(),
                        "stage candidate below threshold"
                    );
                }
                Ok(None) => {
                    debug!(%method, "stage found nothing");
                }
                Err(e) => {
                    warn!(%method, error = %e, "stage failed, advancing");
                    last_stage_error = Some(e.to_string());
                }
            }
        }

        let latency_ms = started.elapsed().as_millis() as u64;

        let Some(candidate) = candidate else {
            error!(source_id, text = normalized, "all extraction stages failed");
            self.record(ParseAttempt {
                signal_hash: hash.to_string(),
                source_id: source_id.to_string(),
                method: None,
                symbol: None,
                success: false,
                confidence: 0.0,
                error: Some(last_stage_error.unwrap_or_else(|| "AllStagesFailed".to_string())),
                latency_ms,
                timestamp: Utc::now().timestamp(),
            });
            return Err(Rejected::AllStagesFailed);
        };

        let method = candidate.method;
        let validated = match self.validator.validate(candidate) {
            Ok(v) => v,
            Err(e) => {
                warn!(source_id, %method, error = %e, "candidate rejected by validation");
                self.record(ParseAttempt {
                    signal_hash: hash.to_string(),
                    source_id: source_id.to_string(),
                    method: Some(method.to_string()),
                    symbol: None,
                    success: false,
                    confidence: 0.0,
                    error: Some(e.to_string()),
                    latency_ms,
                    timestamp: Utc::now().timestamp(),
                });
                return Err(Rejected::Invalid(e));
            }
        };

        let profile = self.store.source_profile(source_id);
        let hour_win_rate = self.store.hour_win_rate(Utc::now().hour());
        let (confidence, confidence_level) = self.scorer.score(
            &validated,
            &ScoreInputs {
                profile: &profile,
                hour_win_rate,
            },
        );

        let scored = ScoredSignal {
            signal_hash: hash.to_string(),
            source_id: source_id.to_string(),
            validated,
            confidence,
            confidence_level,
            scored_at: Utc::now(),
        };

        self.record(ParseAttempt {
            signal_hash: hash.to_string(),
            source_id: source_id.to_string(),
            method: Some(method.to_string()),
            symbol: Some(scored.validated.candidate.symbol.clone()),
            success: true,
            confidence,
            error: None,
            latency_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now().timestamp(),
        });

        self.cache_insert(cache_key.to_string(), scored.clone());

        info!(
            %hash,
            source_id,
            symbol = %scored.validated.candidate.symbol,
            direction = %scored.validated.candidate.direction,
            %method,
            confidence,
            level = %confidence_level,
            "signal interpreted"
        );

        Ok(scored)
    }

    /// Forward a realized trade outcome into the feedback store
    pub fn report_outcome(&self, outcome: Outcome) -> Result<()> {
        self.store.record_outcome(&outcome)
    }

    /// Losing learning data is non-fatal; losing a trade decision is not.
    /// Store write failures are logged and swallowed here so the caller
    /// still gets their result.
    fn record(&self, attempt: ParseAttempt) {
        if let Err(e) = self.store.record_attempt(&attempt) {
            warn!(hash = %attempt.signal_hash, error = %e, "dropping parse attempt record");
        }
    }

    fn cache_lookup(&self, key: &str) -> Option<ScoredSignal> {
        let cache = self.cache.read().ok()?;
        let cached = cache.get(key)?;
        if cached.inserted_at.elapsed() < self.cache_ttl {
            Some(cached.signal.clone())
        } else {
            None
        }
    }

    fn cache_insert(&self, key: String, signal: ScoredSignal) {
        let Ok(mut cache) = self.cache.write() else {
            return;
        };
        let ttl = self.cache_ttl;
        cache.retain(|_, v| v.inserted_at.elapsed() < ttl);
        if cache.len() >= self.cache_max_entries {
            // Evict the oldest live entry rather than growing unbounded
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, v)| v.inserted_at)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest);
            }
        }
        cache.insert(
            key,
            CachedResult {
                signal,
                inserted_at: Instant::now(),
            },
        );
    }
}
