//! Heuristic extraction stage
//!
//! Last resort after the model and template stages: independent per-field
//! scans over loose text. Needs at least a direction, a price and a symbol
//! token to produce anything; missing stop/targets are derived from the
//! entry and flagged in `derived_fields` so the validator can warn about
//! them instead of presenting guessed numbers as parsed signal content.

use super::Extractor;
use crate::config::HeuristicStageConfig;
use crate::error::ExtractError;
use crate::types::{Candidate, Direction, ExtractionMethod};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

/// Tokens that look like tickers but never are
const SYMBOL_STOPLIST: &[&str] = &[
    "BUY", "SELL", "LONG", "SHORT", "BULL", "BEAR", "BULLISH", "BEARISH", "CALL", "PUT", "STOP",
    "LOSS", "TAKE", "PROFIT", "ENTRY", "TARGET", "LIMIT", "MARKET", "BREAKEVEN", "SIGNAL", "THE",
    "AND", "NOW", "FOR", "WITH", "FROM", "ZONE", "AREA", "PRICE", "ORDER", "RISK", "PIPS", "ALERT",
];

pub struct HeuristicExtractor {
    config: HeuristicStageConfig,
    entry_re: Regex,
    range_re: Regex,
    stop_re: Regex,
    target_re: Regex,
    price_re: Regex,
    token_re: Regex,
}

impl HeuristicExtractor {
    pub fn new(config: HeuristicStageConfig) -> Self {
        let price = r"(\d+(?:\.\d+)?)";
        Self {
            config,
            entry_re: Regex::new(&format!(
                r"(?i)(?:\bENTRY\b|\bBUY\b|\bSELL\b|\bAT\b|@)\s*:?\s*{price}(?:\s*-\s*{price})?"
            ))
            .expect("static regex"),
            range_re: Regex::new(&format!(r"{price}\s*-\s*{price}")).expect("static regex"),
            stop_re: Regex::new(&format!(
                r"(?i)(?:STOP\s*LOSS|STOPLOSS|\bSL\b|\bSTOP\b)\s*:?\s*{price}"
            ))
            .expect("static regex"),
            // The optional label index (TP1, TAKE PROFIT 2) must be followed
            // by a colon or whitespace so it can never bite into the price
            target_re: Regex::new(&format!(
                r"(?i)(?:TAKE\s*PROFIT|TAKEPROFIT|\bTP\b|\bTARGET\b)(?:\s*\d+)?\s*(?::\s*|\s){price}"
            ))
            .expect("static regex"),
            price_re: Regex::new(r"\d+(?:\.\d+)?").expect("static regex"),
            token_re: Regex::new(r"[A-Za-z][A-Za-z0-9]{1,9}").expect("static regex"),
        }
    }

    fn sane(&self, p: f64) -> bool {
        p.is_finite() && p >= self.config.sane_price_min && p <= self.config.sane_price_max
    }

    /// First direction keyword or sentiment synonym in the text
    fn find_direction(&self, text: &str) -> Option<Direction> {
        self.token_re
            .find_iter(text)
            .find_map(|t| Direction::from_token(t.as_str()))
    }

    /// Longest plausible ticker token outside the stoplist
    fn find_symbol(&self, text: &str) -> Option<String> {
        let mut best: Option<String> = None;
        for token in self.token_re.find_iter(text) {
            let upper = token.as_str().to_uppercase();
            if upper.len() < 3 || SYMBOL_STOPLIST.contains(&upper.as_str()) {
                continue;
            }
            // Tokens that are mostly digits are prices, not tickers
            if upper.chars().filter(|c| c.is_ascii_alphabetic()).count() < 2 {
                continue;
            }
            let longer = best.as_ref().map(|b| upper.len() > b.len()).unwrap_or(true);
            if longer {
                best = Some(upper);
            }
        }
        best
    }

    /// Entry price(s): explicit label, then range pattern, then the first
    /// plausible price that is not claimed by a stop/target label
    fn find_entry(&self, text: &str, claimed: &[f64]) -> Vec<f64> {
        if let Some(caps) = self.entry_re.captures(text) {
            let mut entry = Vec::new();
            if let Some(p) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) {
                if self.sane(p) {
                    entry.push(p);
                }
            }
            if let Some(p) = caps.get(2).and_then(|m| m.as_str().parse::<f64>().ok()) {
                if self.sane(p) {
                    entry.push(p);
                }
            }
            if !entry.is_empty() {
                return entry;
            }
        }

        if let Some(caps) = self.range_re.captures(text) {
            let lo = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
            let hi = caps.get(2).and_then(|m| m.as_str().parse::<f64>().ok());
            if let (Some(lo), Some(hi)) = (lo, hi) {
                if self.sane(lo) && self.sane(hi) {
                    return vec![lo, hi];
                }
            }
        }

        self.price_re
            .find_iter(text)
            .filter_map(|m| m.as_str().parse::<f64>().ok())
            .find(|p| self.sane(*p) && !claimed.iter().any(|c| (c - p).abs() < f64::EPSILON))
            .map(|p| vec![p])
            .unwrap_or_default()
    }

    fn find_stop(&self, text: &str) -> Option<f64> {
        self.stop_re
            .captures(text)
            .and_then(|c| c.get(1)?.as_str().parse::<f64>().ok())
            .filter(|p| self.sane(*p))
    }

    fn find_targets(&self, text: &str) -> Vec<f64> {
        self.target_re
            .captures_iter(text)
            .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
            .filter(|p| self.sane(*p))
            .collect()
    }
}

#[async_trait]
impl Extractor for HeuristicExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Heuristic
    }

    fn min_confidence(&self) -> f64 {
        self.config.min_confidence
    }

    async fn extract(&self, text: &str) -> Result<Option<Candidate>, ExtractError> {
        let direction = match self.find_direction(text) {
            Some(d) => d,
            None => return Ok(None),
        };

        let stop = self.find_stop(text);
        let targets = self.find_targets(text);

        let mut claimed: Vec<f64> = targets.clone();
        if let Some(s) = stop {
            claimed.push(s);
        }

        let entry = self.find_entry(text, &claimed);
        if entry.is_empty() {
            return Ok(None);
        }

        let symbol = match self.find_symbol(text) {
            Some(s) => s,
            None => return Ok(None),
        };

        let entry_avg = entry.iter().sum::<f64>() / entry.len() as f64;
        let mut derived_fields = Vec::new();

        // Missing levels are fabricated from the entry by direction and
        // flagged; they are guesses, not signal content
        let stop = match stop {
            Some(s) => s,
            None => {
                derived_fields.push("stop".to_string());
                match direction {
                    Direction::Buy => entry_avg * (1.0 - self.config.derived_stop_pct),
                    Direction::Sell => entry_avg * (1.0 + self.config.derived_stop_pct),
                }
            }
        };

        let targets = if targets.is_empty() {
            derived_fields.push("target".to_string());
            self.config
                .derived_target_pcts
                .iter()
                .map(|pct| match direction {
                    Direction::Buy => entry_avg * (1.0 + pct),
                    Direction::Sell => entry_avg * (1.0 - pct),
                })
                .collect()
        } else {
            targets
        };

        debug!(
            symbol = %symbol,
            %direction,
            derived = ?derived_fields,
            "heuristic candidate assembled"
        );

        Ok(Some(Candidate {
            symbol,
            direction,
            entry,
            stop: Some(stop),
            targets,
            stage_confidence: self.config.base_confidence,
            method: ExtractionMethod::Heuristic,
            derived_fields,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> HeuristicExtractor {
        HeuristicExtractor::new(HeuristicStageConfig {
            base_confidence: 0.60,
            min_confidence: 0.50,
            sane_price_min: 0.0001,
            sane_price_max: 1_000_000.0,
            derived_stop_pct: 0.005,
            derived_target_pcts: vec![0.01, 0.02],
        })
    }

    #[tokio::test]
    async fn test_loose_gold_sell() {
        // Normalized form of "Gold sell at 2340, sl 2345, tp 2330"
        let text = "Gold sell at 2340, STOP LOSS 2345, TAKE PROFIT 2330";
        let c = extractor().extract(text).await.unwrap().unwrap();
        assert_eq!(c.symbol, "GOLD");
        assert_eq!(c.direction, Direction::Sell);
        assert_eq!(c.entry, vec![2340.0]);
        assert_eq!(c.stop, Some(2345.0));
        assert_eq!(c.targets, vec![2330.0]);
        assert!(c.derived_fields.is_empty());
        assert!((c.stage_confidence - 0.60).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_derives_missing_stop_and_targets() {
        let text = "going long EURUSD at 1.0850";
        let c = extractor().extract(text).await.unwrap().unwrap();
        assert_eq!(c.direction, Direction::Buy);
        assert_eq!(c.entry, vec![1.0850]);
        // stop 0.5% below, targets 1% and 2% above
        assert!((c.stop.unwrap() - 1.0850 * 0.995).abs() < 1e-9);
        assert_eq!(c.targets.len(), 2);
        assert!(c.targets[0] > 1.0850 && c.targets[1] > c.targets[0]);
        assert_eq!(c.derived_fields, vec!["stop", "target"]);
    }

    #[tokio::test]
    async fn test_range_entry() {
        let text = "SELL USDJPY zone 148.20 - 148.60 STOP LOSS 149.10 TAKE PROFIT 147.00";
        let c = extractor().extract(text).await.unwrap().unwrap();
        assert_eq!(c.entry, vec![148.20, 148.60]);
    }

    #[tokio::test]
    async fn test_no_direction_is_not_found() {
        let text = "EURUSD is at 1.0850 right here";
        assert!(extractor().extract(text).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_prices_is_not_found() {
        let text = "Invalid text without proper signal format";
        assert!(extractor().extract(text).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_symbol_is_longest_plausible_token() {
        let text = "buy now XAUUSD dip 2340 STOP LOSS 2330 TAKE PROFIT 2360";
        let c = extractor().extract(text).await.unwrap().unwrap();
        assert_eq!(c.symbol, "XAUUSD");
    }
}
