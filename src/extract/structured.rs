//! Structured-pattern extraction stage
//!
//! A small ordered set of rigid templates over canonical phrasings. The
//! first template that matches the whole text wins; a full match implies a
//! well-formed alert, so confidence is fixed high. Anything looser falls
//! through to the heuristic stage.
//!
//! Templates run on normalized text, where the normalizer has already
//! expanded SL/TP into STOP LOSS/TAKE PROFIT.

use super::Extractor;
use crate::config::StructuredStageConfig;
use crate::error::ExtractError;
use crate::types::{Candidate, Direction, ExtractionMethod};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

struct Template {
    name: &'static str,
    re: Regex,
}

pub struct StructuredExtractor {
    templates: Vec<Template>,
    target_re: Regex,
    config: StructuredStageConfig,
}

const PRICE: &str = r"\d+(?:\.\d+)?";

impl StructuredExtractor {
    pub fn new(config: StructuredStageConfig) -> Self {
        // "BUY EURUSD @ 1.0850, STOP LOSS: 1.0800, TAKE PROFIT: 1.0900"
        let inline = format!(
            r"^(?P<dir>BUY|SELL)\s(?P<sym>[A-Z][A-Z0-9]{{1,9}})\s@\s(?P<entry>{PRICE})\s*,?\s(?:STOP LOSS|SL)\s*:?\s(?P<stop>{PRICE})\s*,?\s(?P<targets>(?:(?:TAKE PROFIT|TP)\s*\d*\s*:?\s{PRICE}\s*,?\s?)+)[.!]?$"
        );
        // "EURUSD BUY ENTRY: 1.0850 - 1.0860 STOP LOSS: 1.0800 TAKE PROFIT 1: 1.0900 TAKE PROFIT 2: 1.0950"
        let block = format!(
            r"^(?P<sym>[A-Z][A-Z0-9]{{1,9}})\s(?P<dir>BUY|SELL)\s(?:ENTRY|LIMIT|MARKET)\s*:?\s(?P<entry>{PRICE})(?:\s*-\s*(?P<entry2>{PRICE}))?\s(?:STOP LOSS|SL)\s*:?\s(?P<stop>{PRICE})\s(?P<targets>(?:(?:TAKE PROFIT|TP)\s*\d*\s*:?\s{PRICE}\s*,?\s?)+)[.!]?$"
        );

        let templates = vec![
            Template {
                name: "inline",
                re: Regex::new(&inline).expect("static regex"),
            },
            Template {
                name: "block",
                re: Regex::new(&block).expect("static regex"),
            },
        ];

        let target_re = Regex::new(&format!(r"(?:TAKE PROFIT|TP)\s*\d*\s*:?\s({PRICE})"))
            .expect("static regex");

        Self {
            templates,
            target_re,
            config,
        }
    }

    fn candidate_from(&self, caps: &regex::Captures<'_>) -> Option<Candidate> {
        let symbol = caps.name("sym")?.as_str().to_string();
        let direction = Direction::from_token(caps.name("dir")?.as_str())?;

        let mut entry = vec![caps.name("entry")?.as_str().parse::<f64>().ok()?];
        if let Some(e2) = caps.name("entry2") {
            entry.push(e2.as_str().parse::<f64>().ok()?);
        }

        let stop = caps.name("stop")?.as_str().parse::<f64>().ok()?;

        let targets: Vec<f64> = self
            .target_re
            .captures_iter(caps.name("targets")?.as_str())
            .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
            .collect();
        if targets.is_empty() {
            return None;
        }

        Some(Candidate {
            symbol,
            direction,
            entry,
            stop: Some(stop),
            targets,
            stage_confidence: self.config.match_confidence,
            method: ExtractionMethod::Structured,
            derived_fields: Vec::new(),
        })
    }
}

#[async_trait]
impl Extractor for StructuredExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Structured
    }

    fn min_confidence(&self) -> f64 {
        self.config.min_confidence
    }

    async fn extract(&self, text: &str) -> Result<Option<Candidate>, ExtractError> {
        for template in &self.templates {
            if let Some(caps) = template.re.captures(text) {
                if let Some(candidate) = self.candidate_from(&caps) {
                    debug!(template = template.name, symbol = %candidate.symbol, "template matched");
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> StructuredExtractor {
        StructuredExtractor::new(StructuredStageConfig {
            match_confidence: 0.80,
            min_confidence: 0.75,
        })
    }

    #[tokio::test]
    async fn test_inline_template() {
        let text = "BUY EURUSD @ 1.0850, STOP LOSS: 1.0800, TAKE PROFIT: 1.0900";
        let c = extractor().extract(text).await.unwrap().unwrap();
        assert_eq!(c.symbol, "EURUSD");
        assert_eq!(c.direction, Direction::Buy);
        assert_eq!(c.entry, vec![1.0850]);
        assert_eq!(c.stop, Some(1.0800));
        assert_eq!(c.targets, vec![1.0900]);
        assert!((c.stage_confidence - 0.80).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_block_template_with_range_and_two_targets() {
        let text = "GBPUSD SELL ENTRY: 1.2700 - 1.2720 STOP LOSS: 1.2760 TAKE PROFIT 1: 1.2650 TAKE PROFIT 2: 1.2600";
        let c = extractor().extract(text).await.unwrap().unwrap();
        assert_eq!(c.symbol, "GBPUSD");
        assert_eq!(c.direction, Direction::Sell);
        assert_eq!(c.entry, vec![1.2700, 1.2720]);
        assert_eq!(c.targets, vec![1.2650, 1.2600]);
    }

    #[tokio::test]
    async fn test_lowercase_does_not_match() {
        // Loose phrasing is heuristic territory
        let text = "Gold sell at 2340, STOP LOSS 2345, TAKE PROFIT 2330";
        assert!(extractor().extract(text).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_signal_does_not_match() {
        let text = "BUY EURUSD @ 1.0850";
        assert!(extractor().extract(text).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_free_text_does_not_match() {
        let text = "Invalid text without proper signal format";
        assert!(extractor().extract(text).await.unwrap().is_none());
    }
}
