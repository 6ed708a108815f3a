//! Error taxonomy for the interpretation pipeline
//!
//! Extraction errors are recoverable (the orchestrator advances to the next
//! stage); validation errors reject the signal; `Rejected` is the terminal
//! result handed to the caller and always carries a readable reason.

use thiserror::Error;

/// Per-stage extraction failure, recovered locally by stage fallthrough
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extraction timed out after {0}ms")]
    Timeout(u64),

    #[error("malformed extraction output: {0}")]
    Malformed(String),

    #[error("extraction service error: {0}")]
    Service(String),
}

/// Hard validation failure - the signal is rejected, never patched up
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("directional inconsistency: {0}")]
    DirectionalInconsistency(String),

    #[error("non-positive price in {0}")]
    NonPositivePrice(&'static str),
}

/// Terminal pipeline rejection returned to the caller
#[derive(Debug, Error)]
pub enum Rejected {
    #[error("AllStagesFailed: no extraction stage produced an acceptable candidate")]
    AllStagesFailed,

    #[error("invalid signal: {0}")]
    Invalid(#[from] ValidateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_carries_readable_reason() {
        assert!(Rejected::AllStagesFailed.to_string().contains("AllStagesFailed"));
        let r = Rejected::Invalid(ValidateError::MissingField("stop"));
        assert!(r.to_string().contains("stop"));
    }
}
