//! Model-assisted extraction stage
//!
//! Sends the normalized alert plus a fixed instruction template to an
//! external text-to-structure service and parses the structured JSON reply.
//! All failures (timeout, transport, malformed reply) stay inside this
//! stage - the pipeline just moves on to the structured templates.

use super::{completeness_score, Extractor};
use crate::config::ModelStageConfig;
use crate::error::ExtractError;
use crate::types::{Candidate, Direction, ExtractionMethod};
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed instruction sent with every request
const INSTRUCTION_TEMPLATE: &str = "Extract the trading signal from the text. \
Reply with JSON only: {\"symbol\": string, \"direction\": \"BUY\"|\"SELL\", \
\"entry\": number|number[], \"stop\": number|null, \
\"targets\": number[], \"confidence\": number|null}. \
If the text contains no trading signal, reply {\"signal\": null}.";

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    instruction: &'a str,
    text: &'a str,
}

/// One number or a list - services disagree on the entry shape
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NumOrList {
    One(f64),
    Many(Vec<f64>),
}

impl NumOrList {
    fn into_vec(self) -> Vec<f64> {
        match self {
            NumOrList::One(v) => vec![v],
            NumOrList::Many(vs) => vs,
        }
    }
}

/// Structured reply expected from the completion service
#[derive(Debug, Clone, Deserialize)]
struct ModelReply {
    symbol: Option<String>,
    direction: Option<String>,
    entry: Option<NumOrList>,
    stop: Option<f64>,
    #[serde(default)]
    targets: Vec<f64>,
    confidence: Option<f64>,
}

/// Boundary to the external text-completion service. Behind a trait so
/// pipeline tests can mock the service away.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Returns the raw reply body
    async fn complete(&self, instruction: &str, text: &str) -> Result<String, ExtractError>;
}

/// reqwest-backed completion service
pub struct HttpCompletionService {
    client: Client,
    endpoint: String,
    timeout_ms: u64,
}

impl HttpCompletionService {
    pub fn new(endpoint: &str, timeout_ms: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            endpoint: endpoint.to_string(),
            timeout_ms,
        }
    }
}

#[async_trait]
impl CompletionService for HttpCompletionService {
    async fn complete(&self, instruction: &str, text: &str) -> Result<String, ExtractError> {
        let request = CompletionRequest { instruction, text };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractError::Timeout(self.timeout_ms)
                } else {
                    ExtractError::Service(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ExtractError::Service(format!(
                "completion service returned {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| ExtractError::Service(e.to_string()))
    }
}

/// Model-assisted extractor with per-call timeout and bounded retries
pub struct ModelExtractor {
    service: Box<dyn CompletionService>,
    config: ModelStageConfig,
}

impl ModelExtractor {
    pub fn new(service: Box<dyn CompletionService>, config: ModelStageConfig) -> Self {
        Self { service, config }
    }

    /// From config, with the default HTTP service
    pub fn from_config(config: ModelStageConfig) -> Self {
        let service = HttpCompletionService::new(&config.endpoint, config.timeout_ms);
        Self::new(Box::new(service), config)
    }

    /// One service call bounded by the configured timeout
    async fn call_once(&self, text: &str) -> Result<String, ExtractError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout, self.service.complete(INSTRUCTION_TEMPLATE, text))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ExtractError::Timeout(self.config.timeout_ms)),
        }
    }

    /// Parse the service reply into a candidate. `Ok(None)` when the service
    /// says there is no signal in the text.
    fn parse_reply(&self, body: &str) -> Result<Option<Candidate>, ExtractError> {
        // Explicit "no signal" reply
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            if value.get("signal").map(|s| s.is_null()).unwrap_or(false) {
                return Ok(None);
            }
        }

        let reply: ModelReply = serde_json::from_str(body)
            .map_err(|e| ExtractError::Malformed(format!("bad reply JSON: {e}")))?;

        let symbol = reply
            .symbol
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_uppercase);
        let direction = reply.direction.as_deref().and_then(Direction::from_token);
        let entry = reply.entry.map(NumOrList::into_vec).unwrap_or_default();
        let targets = reply.targets.clone();

        let completeness = completeness_score(
            symbol.is_some(),
            direction.is_some(),
            !entry.is_empty(),
            !targets.is_empty(),
            reply.stop.is_some(),
            targets.len() > 1,
        );

        let (symbol, direction) = match (symbol, direction) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                // Not enough to act on; treat as no-find rather than error
                debug!("model reply incomplete (completeness={:.2})", completeness);
                return Ok(None);
            }
        };

        // Service confidence clamped, else derived from completeness
        let stage_confidence = reply
            .confidence
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(completeness);

        Ok(Some(Candidate {
            symbol,
            direction,
            entry,
            stop: reply.stop,
            targets,
            stage_confidence,
            method: ExtractionMethod::Model,
            derived_fields: Vec::new(),
        }))
    }
}

#[async_trait]
impl Extractor for ModelExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Model
    }

    fn min_confidence(&self) -> f64 {
        self.config.min_confidence
    }

    async fn extract(&self, text: &str) -> Result<Option<Candidate>, ExtractError> {
        if !self.config.enabled {
            return Ok(None);
        }

        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff with jitter
                let base = self.config.backoff_base_ms * (1 << (attempt - 1)) as u64;
                let jitter = rand::thread_rng().gen_range(0..=base / 2);
                tokio::time::sleep(Duration::from_millis(base + jitter)).await;
            }

            match self.call_once(text).await {
                Ok(body) => return self.parse_reply(&body),
                Err(e) => {
                    warn!(attempt, error = %e, "model extraction call failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ExtractError::Service("no attempts made".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ModelStageConfig {
        ModelStageConfig {
            enabled: true,
            endpoint: "http://localhost:0".to_string(),
            timeout_ms: 100,
            max_retries: 0,
            backoff_base_ms: 1,
            min_confidence: 0.7,
        }
    }

    fn extractor_with_reply(reply: &'static str) -> ModelExtractor {
        let mut mock = MockCompletionService::new();
        mock.expect_complete()
            .returning(move |_, _| Ok(reply.to_string()));
        ModelExtractor::new(Box::new(mock), config())
    }

    #[tokio::test]
    async fn test_well_formed_reply() {
        let ex = extractor_with_reply(
            r#"{"symbol":"eurusd","direction":"BUY","entry":1.0850,"stop":1.0800,"targets":[1.0900],"confidence":0.92}"#,
        );
        let c = ex.extract("BUY EURUSD @ 1.0850").await.unwrap().unwrap();
        assert_eq!(c.symbol, "EURUSD");
        assert_eq!(c.direction, Direction::Buy);
        assert_eq!(c.entry, vec![1.0850]);
        assert_eq!(c.stop, Some(1.0800));
        assert!((c.stage_confidence - 0.92).abs() < 1e-9);
        assert_eq!(c.method, ExtractionMethod::Model);
    }

    #[tokio::test]
    async fn test_confidence_clamped() {
        let ex = extractor_with_reply(
            r#"{"symbol":"EURUSD","direction":"BUY","entry":[1.0850],"stop":null,"targets":[1.09],"confidence":3.0}"#,
        );
        let c = ex.extract("x").await.unwrap().unwrap();
        assert!((c.stage_confidence - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_confidence_uses_completeness() {
        let ex = extractor_with_reply(
            r#"{"symbol":"EURUSD","direction":"BUY","entry":1.0850,"stop":null,"targets":[],"confidence":null}"#,
        );
        let c = ex.extract("x").await.unwrap().unwrap();
        // symbol + direction + entry present, no target: 3/4 = 0.75
        assert!((c.stage_confidence - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_signal_reply_is_not_found() {
        let ex = extractor_with_reply(r#"{"signal": null}"#);
        assert!(ex.extract("hello there").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_reply_is_error() {
        let ex = extractor_with_reply("I think you should buy gold maybe?");
        assert!(matches!(
            ex.extract("x").await,
            Err(ExtractError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_exhausts_retries() {
        let mut mock = MockCompletionService::new();
        mock.expect_complete()
            .times(3)
            .returning(|_, _| Err(ExtractError::Timeout(100)));
        let mut cfg = config();
        cfg.max_retries = 2;
        let ex = ModelExtractor::new(Box::new(mock), cfg);
        assert!(matches!(
            ex.extract("x").await,
            Err(ExtractError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_stage_finds_nothing() {
        let mut cfg = config();
        cfg.enabled = false;
        let ex = ModelExtractor::new(Box::new(MockCompletionService::new()), cfg);
        assert!(ex.extract("BUY EURUSD @ 1.0850").await.unwrap().is_none());
    }
}
