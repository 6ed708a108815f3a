//! Outcome & feedback store
//!
//! Append-only CSV logs of every parse attempt and every reported trade
//! outcome, plus the derived SourceProfile projection. The logs are the
//! source of truth; profiles are rebuilt lazily from them on a TTL and can
//! always be recomputed from scratch. Appends are serialized per file so
//! concurrent pipeline invocations never interleave partial rows.

use crate::config::StoreConfig;
use crate::types::{Outcome, OutcomeResult, ParseAttempt, SignalState, SourceProfile};
use anyhow::{Context, Result};
use chrono::{TimeZone, Timelike, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// CSV row for a reported outcome. Result is stored as its display string
/// so the log stays greppable.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OutcomeRow {
    signal_hash: String,
    result: String,
    realized_price: Option<f64>,
    closed_at: i64,
}

/// Aggregate counters for operators and tests
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_attempts: usize,
    pub successful_attempts: usize,
    pub failed_attempts: usize,
    pub total_outcomes: usize,
    pub attempts_per_source: HashMap<String, usize>,
}

struct CachedProfile {
    profile: SourceProfile,
    built_at: Instant,
}

struct CachedHours {
    win_rates: HashMap<u32, f64>,
    built_at: Instant,
}

pub struct FeedbackStore {
    config: StoreConfig,
    attempts_path: PathBuf,
    outcomes_path: PathBuf,
    /// Serializes appends; one guard per store keeps both files consistent
    write_lock: Mutex<()>,
    profile_cache: RwLock<HashMap<String, CachedProfile>>,
    hourly_cache: RwLock<Option<CachedHours>>,
}

impl FeedbackStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let data_dir = PathBuf::from(&config.data_dir);
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

        let attempts_path = data_dir.join("parse_attempts.csv");
        let outcomes_path = data_dir.join("outcomes.csv");
        info!(
            attempts = %attempts_path.display(),
            outcomes = %outcomes_path.display(),
            "feedback store ready"
        );

        Ok(Self {
            config,
            attempts_path,
            outcomes_path,
            write_lock: Mutex::new(()),
            profile_cache: RwLock::new(HashMap::new()),
            hourly_cache: RwLock::new(None),
        })
    }

    /// Append one attempt record. Re-parses of identical text append again;
    /// aggregation keeps only the latest row per hash, which gives the same
    /// observable result as an overwrite without read-modify-write.
    pub fn record_attempt(&self, attempt: &ParseAttempt) -> Result<()> {
        self.append_row(&self.attempts_path, attempt)
    }

    /// Append one reported outcome and invalidate derived caches. Outcomes
    /// for hashes with no recorded attempt are kept; they join up if the
    /// attempt ever appears.
    pub fn record_outcome(&self, outcome: &Outcome) -> Result<()> {
        let row = OutcomeRow {
            signal_hash: outcome.signal_hash.clone(),
            result: outcome.result.to_string(),
            realized_price: outcome.realized_price,
            closed_at: outcome.closed_at,
        };
        self.append_row(&self.outcomes_path, &row)?;

        // Profiles derived from outcomes are now stale
        if let Ok(mut cache) = self.profile_cache.write() {
            cache.clear();
        }
        if let Ok(mut cache) = self.hourly_cache.write() {
            *cache = None;
        }
        Ok(())
    }

    /// Source profile over the trailing window, rebuilt when the cached copy
    /// is older than the TTL. Sources below the minimum sample size get the
    /// neutral profile.
    pub fn source_profile(&self, source_id: &str) -> SourceProfile {
        let ttl = Duration::from_secs(self.config.profile_cache_ttl_secs);
        if let Ok(cache) = self.profile_cache.read() {
            if let Some(cached) = cache.get(source_id) {
                if cached.built_at.elapsed() < ttl {
                    return cached.profile.clone();
                }
            }
        }

        // Redundant rebuilds by concurrent readers are fine: the aggregation
        // is read-only and idempotent
        let profile = match self.build_profile(source_id) {
            Ok(profile) => profile,
            Err(e) => {
                warn!(source_id, error = %e, "profile rebuild failed, using neutral");
                SourceProfile::neutral(source_id)
            }
        };

        if let Ok(mut cache) = self.profile_cache.write() {
            cache.insert(
                source_id.to_string(),
                CachedProfile {
                    profile: profile.clone(),
                    built_at: Instant::now(),
                },
            );
        }
        profile
    }

    /// Trailing win rate for an hour of day across all sources, None below
    /// the per-bucket sample minimum
    pub fn hour_win_rate(&self, hour: u32) -> Option<f64> {
        let ttl = Duration::from_secs(self.config.profile_cache_ttl_secs);
        if let Ok(cache) = self.hourly_cache.read() {
            if let Some(cached) = cache.as_ref() {
                if cached.built_at.elapsed() < ttl {
                    return cached.win_rates.get(&hour).copied();
                }
            }
        }

        let win_rates = match self.build_hourly_win_rates() {
            Ok(rates) => rates,
            Err(e) => {
                warn!(error = %e, "hourly win-rate rebuild failed");
                HashMap::new()
            }
        };
        let result = win_rates.get(&hour).copied();

        if let Ok(mut cache) = self.hourly_cache.write() {
            *cache = Some(CachedHours {
                win_rates,
                built_at: Instant::now(),
            });
        }
        result
    }

    /// Lifecycle of one signal hash as recorded in the logs
    pub fn signal_state(&self, signal_hash: &str) -> Result<SignalState> {
        let attempt = self
            .read_attempts()?
            .into_iter()
            .filter(|a| a.signal_hash == signal_hash)
            .max_by_key(|a| a.timestamp);

        let Some(attempt) = attempt else {
            return Ok(SignalState::Unknown);
        };

        if !attempt.success {
            return Ok(SignalState::Rejected {
                reason: attempt.error.unwrap_or_else(|| "unknown".to_string()),
            });
        }

        match self.outcomes_by_hash()?.get(signal_hash) {
            Some(result) => Ok(SignalState::Resolved { result: *result }),
            None => Ok(SignalState::AwaitingOutcome),
        }
    }

    /// Counters over the full logs
    pub fn stats(&self) -> Result<StoreStats> {
        let attempts = self.read_attempts()?;
        let outcomes = self.read_outcomes()?;

        let mut attempts_per_source: HashMap<String, usize> = HashMap::new();
        let mut successful = 0;
        for attempt in &attempts {
            *attempts_per_source
                .entry(attempt.source_id.clone())
                .or_default() += 1;
            if attempt.success {
                successful += 1;
            }
        }

        Ok(StoreStats {
            total_attempts: attempts.len(),
            successful_attempts: successful,
            failed_attempts: attempts.len() - successful,
            total_outcomes: outcomes.len(),
            attempts_per_source,
        })
    }

    // ------------------------------------------------------------------
    // Aggregation
    // ------------------------------------------------------------------

    fn window_start(&self) -> i64 {
        Utc::now().timestamp() - self.config.window_days * 86_400
    }

    /// Latest attempt per hash for one source inside the trailing window
    fn windowed_attempts(&self, source_id: Option<&str>) -> Result<Vec<ParseAttempt>> {
        let cutoff = self.window_start();
        let mut latest: HashMap<String, ParseAttempt> = HashMap::new();
        for attempt in self.read_attempts()? {
            if attempt.timestamp < cutoff {
                continue;
            }
            if let Some(source) = source_id {
                if attempt.source_id != source {
                    continue;
                }
            }
            match latest.get(&attempt.signal_hash) {
                Some(existing) if existing.timestamp >= attempt.timestamp => {}
                _ => {
                    latest.insert(attempt.signal_hash.clone(), attempt);
                }
            }
        }
        Ok(latest.into_values().collect())
    }

    /// Latest reported outcome per hash
    fn outcomes_by_hash(&self) -> Result<HashMap<String, OutcomeResult>> {
        let mut map: HashMap<String, (OutcomeResult, i64)> = HashMap::new();
        for row in self.read_outcomes()? {
            let Some(result) = OutcomeResult::from_str(&row.result) else {
                warn!(result = %row.result, "unrecognized outcome result in log");
                continue;
            };
            match map.get(&row.signal_hash) {
                Some((_, closed_at)) if *closed_at >= row.closed_at => {}
                _ => {
                    map.insert(row.signal_hash, (result, row.closed_at));
                }
            }
        }
        Ok(map.into_iter().map(|(k, (r, _))| (k, r)).collect())
    }

    fn build_profile(&self, source_id: &str) -> Result<SourceProfile> {
        let attempts = self.windowed_attempts(Some(source_id))?;
        if attempts.len() < self.config.min_samples {
            debug!(
                source_id,
                samples = attempts.len(),
                "below minimum sample size, neutral profile"
            );
            return Ok(SourceProfile::neutral(source_id));
        }

        let outcomes = self.outcomes_by_hash()?;

        let mut wins = 0usize;
        let mut losses = 0usize;
        let mut accurate = 0usize;
        let mut resolved = 0usize;
        let mut confidence_sum = 0.0;
        let mut confidence_count = 0usize;
        let mut symbol_tallies: HashMap<String, (usize, usize)> = HashMap::new();

        for attempt in &attempts {
            if attempt.success {
                confidence_sum += attempt.confidence;
                confidence_count += 1;
            }
            let Some(is_win) = outcomes
                .get(&attempt.signal_hash)
                .and_then(|result| result.is_win())
            else {
                // No outcome yet (or a neutral one): the attempt stays
                // neutral, which is expected, not an error
                continue;
            };

            resolved += 1;
            if is_win {
                wins += 1;
            } else {
                losses += 1;
            }

            // Confidence agreed with the outcome
            if (attempt.confidence >= 0.7 && is_win) || (attempt.confidence < 0.5 && !is_win) {
                accurate += 1;
            }

            if let Some(symbol) = &attempt.symbol {
                let tally = symbol_tallies.entry(symbol.clone()).or_insert((0, 0));
                tally.1 += 1;
                if is_win {
                    tally.0 += 1;
                }
            }
        }

        let win_rate = if resolved > 0 {
            wins as f64 / resolved as f64
        } else {
            0.5
        };
        let avg_confidence = if confidence_count > 0 {
            confidence_sum / confidence_count as f64
        } else {
            0.5
        };
        let confidence_accuracy = if resolved > 0 {
            accurate as f64 / resolved as f64
        } else {
            0.5
        };
        let symbol_win_rates = symbol_tallies
            .into_iter()
            .map(|(symbol, (w, n))| (symbol, w as f64 / n as f64))
            .collect();

        Ok(SourceProfile {
            source_id: source_id.to_string(),
            total: attempts.len(),
            wins,
            losses,
            avg_confidence,
            win_rate,
            confidence_accuracy,
            symbol_win_rates,
        })
    }

    fn build_hourly_win_rates(&self) -> Result<HashMap<u32, f64>> {
        let attempts = self.windowed_attempts(None)?;
        let outcomes = self.outcomes_by_hash()?;

        let mut tallies: HashMap<u32, (usize, usize)> = HashMap::new();
        for attempt in &attempts {
            let Some(is_win) = outcomes
                .get(&attempt.signal_hash)
                .and_then(|result| result.is_win())
            else {
                continue;
            };
            let Some(ts) = Utc.timestamp_opt(attempt.timestamp, 0).single() else {
                continue;
            };
            let tally = tallies.entry(ts.hour()).or_insert((0, 0));
            tally.1 += 1;
            if is_win {
                tally.0 += 1;
            }
        }

        Ok(tallies
            .into_iter()
            .filter(|(_, (_, n))| *n >= self.config.min_hour_samples)
            .map(|(hour, (w, n))| (hour, w as f64 / n as f64))
            .collect())
    }

    // ------------------------------------------------------------------
    // CSV plumbing
    // ------------------------------------------------------------------

    fn append_row<T: Serialize>(&self, path: &Path, row: &T) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("store write lock poisoned"))?;

        let write_header = !path.exists()
            || fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let mut writer = WriterBuilder::new().has_headers(write_header).from_writer(file);
        writer
            .serialize(row)
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        writer.flush().context("Failed to flush CSV writer")?;
        Ok(())
    }

    fn read_attempts(&self) -> Result<Vec<ParseAttempt>> {
        Self::read_rows(&self.attempts_path)
    }

    fn read_outcomes(&self) -> Result<Vec<OutcomeRow>> {
        Self::read_rows(&self.outcomes_path)
    }

    fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut rows = Vec::new();
        for record in reader.deserialize() {
            match record {
                Ok(row) => rows.push(row),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping bad CSV row"),
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static DIR_SEQ: AtomicU64 = AtomicU64::new(0);

    fn test_store(min_samples: usize) -> FeedbackStore {
        let seq = DIR_SEQ.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "signalparse-store-{}-{}",
            std::process::id(),
            seq
        ));
        let _ = fs::remove_dir_all(&dir);
        FeedbackStore::new(StoreConfig {
            data_dir: dir.to_string_lossy().to_string(),
            window_days: 30,
            min_samples,
            min_hour_samples: 1,
            profile_cache_ttl_secs: 0,
        })
        .unwrap()
    }

    fn attempt(hash: &str, source: &str, confidence: f64, success: bool) -> ParseAttempt {
        ParseAttempt {
            signal_hash: hash.to_string(),
            source_id: source.to_string(),
            method: Some("structured".to_string()),
            symbol: Some("EURUSD".to_string()),
            success,
            confidence,
            error: None,
            latency_ms: 3,
            timestamp: Utc::now().timestamp(),
        }
    }

    fn outcome(hash: &str, result: OutcomeResult) -> Outcome {
        Outcome {
            signal_hash: hash.to_string(),
            result,
            realized_price: None,
            closed_at: Utc::now().timestamp(),
        }
    }

    #[test]
    fn test_round_trip_and_stats() {
        let store = test_store(5);
        store.record_attempt(&attempt("h1", "alice", 0.8, true)).unwrap();
        store.record_attempt(&attempt("h2", "alice", 0.3, false)).unwrap();
        store.record_outcome(&outcome("h1", OutcomeResult::TargetHit)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.successful_attempts, 1);
        assert_eq!(stats.failed_attempts, 1);
        assert_eq!(stats.total_outcomes, 1);
        assert_eq!(stats.attempts_per_source.get("alice"), Some(&2));
    }

    #[test]
    fn test_below_min_samples_is_neutral() {
        let store = test_store(5);
        for i in 0..3 {
            store
                .record_attempt(&attempt(&format!("h{i}"), "bob", 0.8, true))
                .unwrap();
            store
                .record_outcome(&outcome(&format!("h{i}"), OutcomeResult::TargetHit))
                .unwrap();
        }
        let profile = store.source_profile("bob");
        assert_eq!(profile.total, 0);
        assert!((profile.win_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_profile_win_rate() {
        let store = test_store(5);
        for i in 0..10 {
            store
                .record_attempt(&attempt(&format!("h{i}"), "carol", 0.8, true))
                .unwrap();
            let result = if i < 8 {
                OutcomeResult::TargetHit
            } else {
                OutcomeResult::StopHit
            };
            store.record_outcome(&outcome(&format!("h{i}"), result)).unwrap();
        }
        let profile = store.source_profile("carol");
        assert_eq!(profile.total, 10);
        assert_eq!(profile.wins, 8);
        assert_eq!(profile.losses, 2);
        assert!((profile.win_rate - 0.8).abs() < 1e-9);
        assert!((profile.symbol_win_rates["EURUSD"] - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_accuracy() {
        let store = test_store(2);
        // High confidence win and low confidence loss: both accurate
        store.record_attempt(&attempt("h1", "dave", 0.9, true)).unwrap();
        store.record_outcome(&outcome("h1", OutcomeResult::TargetHit)).unwrap();
        store.record_attempt(&attempt("h2", "dave", 0.3, true)).unwrap();
        store.record_outcome(&outcome("h2", OutcomeResult::StopHit)).unwrap();
        // High confidence loss: inaccurate
        store.record_attempt(&attempt("h3", "dave", 0.9, true)).unwrap();
        store.record_outcome(&outcome("h3", OutcomeResult::StopHit)).unwrap();

        let profile = store.source_profile("dave");
        assert!((profile.confidence_accuracy - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_hash_keeps_latest() {
        let store = test_store(1);
        let mut first = attempt("h1", "erin", 0.4, true);
        first.timestamp -= 60;
        store.record_attempt(&first).unwrap();
        store.record_attempt(&attempt("h1", "erin", 0.9, true)).unwrap();
        store.record_outcome(&outcome("h1", OutcomeResult::TargetHit)).unwrap();

        let profile = store.source_profile("erin");
        // One logical attempt, not two
        assert_eq!(profile.total, 1);
        assert!((profile.avg_confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_orphan_outcome_is_neutral() {
        let store = test_store(1);
        store
            .record_outcome(&outcome("no-such-hash", OutcomeResult::TargetHit))
            .unwrap();
        store.record_attempt(&attempt("h1", "frank", 0.8, true)).unwrap();

        let profile = store.source_profile("frank");
        assert_eq!(profile.wins, 0);
        assert!((profile.win_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_neutral_outcomes_do_not_count() {
        let store = test_store(1);
        store.record_attempt(&attempt("h1", "gail", 0.8, true)).unwrap();
        store.record_outcome(&outcome("h1", OutcomeResult::Breakeven)).unwrap();
        store.record_attempt(&attempt("h2", "gail", 0.8, true)).unwrap();
        store.record_outcome(&outcome("h2", OutcomeResult::TargetHit)).unwrap();

        let profile = store.source_profile("gail");
        assert_eq!(profile.wins, 1);
        assert_eq!(profile.losses, 0);
        assert!((profile.win_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_signal_state_lifecycle() {
        let store = test_store(1);
        assert_eq!(store.signal_state("h1").unwrap(), SignalState::Unknown);

        store.record_attempt(&attempt("h1", "ivan", 0.8, true)).unwrap();
        assert_eq!(
            store.signal_state("h1").unwrap(),
            SignalState::AwaitingOutcome
        );

        store.record_outcome(&outcome("h1", OutcomeResult::StopHit)).unwrap();
        assert_eq!(
            store.signal_state("h1").unwrap(),
            SignalState::Resolved {
                result: OutcomeResult::StopHit
            }
        );

        let mut failed = attempt("h2", "ivan", 0.0, false);
        failed.error = Some("AllStagesFailed".to_string());
        store.record_attempt(&failed).unwrap();
        assert_eq!(
            store.signal_state("h2").unwrap(),
            SignalState::Rejected {
                reason: "AllStagesFailed".to_string()
            }
        );
    }

    #[test]
    fn test_hour_win_rate() {
        let store = test_store(1);
        store.record_attempt(&attempt("h1", "hank", 0.8, true)).unwrap();
        store.record_outcome(&outcome("h1", OutcomeResult::TargetHit)).unwrap();

        let hour = Utc::now().hour();
        assert_eq!(store.hour_win_rate(hour), Some(1.0));
        // An hour with no samples stays unknown
        let other = (hour + 12) % 24;
        assert_eq!(store.hour_win_rate(other), None);
    }
}
