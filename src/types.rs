//! Core types used throughout SignalParse
//!
//! Defines the data model for raw alerts, extraction candidates,
//! validated/scored signals and the feedback records behind learning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// Parse from a direction keyword or sentiment synonym
    pub fn from_token(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" | "LONG" | "UP" | "BULL" | "BULLISH" | "CALL" => Some(Direction::Buy),
            "SELL" | "SHORT" | "DOWN" | "BEAR" | "BEARISH" | "PUT" => Some(Direction::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

/// Which extraction stage produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionMethod {
    Model,
    Structured,
    Heuristic,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionMethod::Model => write!(f, "model"),
            ExtractionMethod::Structured => write!(f, "structured"),
            ExtractionMethod::Heuristic => write!(f, "heuristic"),
        }
    }
}

/// Discrete confidence band for a scored signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    /// Map a [0,1] score to its band
    pub fn from_score(score: f64) -> Self {
        if score >= 0.90 {
            ConfidenceLevel::VeryHigh
        } else if score >= 0.75 {
            ConfidenceLevel::High
        } else if score >= 0.60 {
            ConfidenceLevel::Medium
        } else if score >= 0.40 {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceLevel::VeryLow => write!(f, "VERY_LOW"),
            ConfidenceLevel::Low => write!(f, "LOW"),
            ConfidenceLevel::Medium => write!(f, "MEDIUM"),
            ConfidenceLevel::High => write!(f, "HIGH"),
            ConfidenceLevel::VeryHigh => write!(f, "VERY_HIGH"),
        }
    }
}

/// Raw inbound alert, immutable once received
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSignal {
    pub text: String,
    pub source_id: String,
    pub received_at: DateTime<Utc>,
}

impl RawSignal {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            received_at: Utc::now(),
        }
    }
}

/// Content hash identifying a signal (hex sha256 of normalized text).
/// Used for dedup, caching and joining attempts with outcomes.
pub fn signal_hash(normalized_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Raw extraction output from a single stage, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: String,
    pub direction: Direction,
    /// One or more entry prices (range entries keep both ends)
    pub entry: Vec<f64>,
    pub stop: Option<f64>,
    pub targets: Vec<f64>,
    /// Stage self-reported confidence in [0,1]
    pub stage_confidence: f64,
    pub method: ExtractionMethod,
    /// Field names the stage fabricated instead of parsing ("stop", "target")
    pub derived_fields: Vec<String>,
}

impl Candidate {
    /// Mean of the entry prices
    pub fn entry_avg(&self) -> f64 {
        if self.entry.is_empty() {
            return 0.0;
        }
        self.entry.iter().sum::<f64>() / self.entry.len() as f64
    }

    /// Mean of the target prices
    pub fn target_avg(&self) -> f64 {
        if self.targets.is_empty() {
            return 0.0;
        }
        self.targets.iter().sum::<f64>() / self.targets.len() as f64
    }
}

/// Candidate that passed schema and consistency checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedSignal {
    pub candidate: Candidate,
    /// |target_avg - entry_avg| / |entry_avg - stop|, 0 when risk is 0
    pub risk_reward: f64,
    /// Field-presence score in [0,1], input to the confidence scorer
    pub completeness: f64,
    /// Non-fatal findings: unknown symbol, out-of-band prices, derived fields
    pub warnings: Vec<String>,
}

/// Final pipeline output, owned by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredSignal {
    pub signal_hash: String,
    pub source_id: String,
    pub validated: ValidatedSignal,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub scored_at: DateTime<Utc>,
}

/// Append-only record of one pipeline run (success or failure)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseAttempt {
    pub signal_hash: String,
    pub source_id: String,
    /// Winning stage; None when every stage failed
    pub method: Option<String>,
    pub symbol: Option<String>,
    pub success: bool,
    pub confidence: f64,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub timestamp: i64,
}

/// How a concluded trade resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeResult {
    TargetHit,
    StopHit,
    Breakeven,
    Expired,
    Cancelled,
}

impl OutcomeResult {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "TARGET_HIT" => Some(OutcomeResult::TargetHit),
            "STOP_HIT" => Some(OutcomeResult::StopHit),
            "BREAKEVEN" => Some(OutcomeResult::Breakeven),
            "EXPIRED" => Some(OutcomeResult::Expired),
            "CANCELLED" => Some(OutcomeResult::Cancelled),
            _ => None,
        }
    }

    /// Whether the result counts as a win for win-rate aggregation.
    /// Breakeven/expired/cancelled are neutral (neither win nor loss).
    pub fn is_win(&self) -> Option<bool> {
        match self {
            OutcomeResult::TargetHit => Some(true),
            OutcomeResult::StopHit => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for OutcomeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeResult::TargetHit => write!(f, "TARGET_HIT"),
            OutcomeResult::StopHit => write!(f, "STOP_HIT"),
            OutcomeResult::Breakeven => write!(f, "BREAKEVEN"),
            OutcomeResult::Expired => write!(f, "EXPIRED"),
            OutcomeResult::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Realized trade outcome, reported once by the execution layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub signal_hash: String,
    pub result: OutcomeResult,
    pub realized_price: Option<f64>,
    pub closed_at: i64,
}

/// Lifecycle of a signal hash as observable from the feedback logs.
/// AwaitingOutcome may last forever if the execution layer never reports
/// back; that is expected, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SignalState {
    /// No attempt recorded for this hash
    Unknown,
    /// Interpretation failed; terminal
    Rejected { reason: String },
    /// Scored and returned to the caller, no outcome yet
    AwaitingOutcome,
    /// Outcome reported; terminal
    Resolved { result: OutcomeResult },
}

/// Derived per-source trust profile, rebuilt from the feedback log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProfile {
    pub source_id: String,
    /// Resolved attempts in the trailing window
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub avg_confidence: f64,
    pub win_rate: f64,
    /// Fraction of attempts where confidence agreed with the outcome
    pub confidence_accuracy: f64,
    /// Win rate per symbol for this source
    pub symbol_win_rates: std::collections::HashMap<String, f64>,
}

impl SourceProfile {
    /// Neutral profile used for unknown sources or thin history
    pub fn neutral(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            total: 0,
            wins: 0,
            losses: 0,
            avg_confidence: 0.5,
            win_rate: 0.5,
            confidence_accuracy: 0.5,
            symbol_win_rates: std::collections::HashMap::new(),
        }
    }
}
