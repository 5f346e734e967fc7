use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryHint;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("The tool name {0} is not valid")]
    InvalidToolName(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Rate limited by upstream (retry after: {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

const RATE_LIMIT_MARKERS: [&str; 3] = ["rate limit", "rate_limit", "too many requests"];

impl AgentError {
    /// Normalize a failed upstream call into a closed set of variants.
    ///
    /// Anything reporting HTTP 429, or whose message mentions a rate limit, becomes
    /// [`AgentError::RateLimited`] carrying the server's retry hint when one was sent.
    /// Every other failure becomes [`AgentError::Upstream`].
    pub fn from_upstream<S: Into<String>>(status: Option<u16>, message: S, hint: RetryHint) -> Self {
        let message = message.into();
        if status == Some(429) || mentions_rate_limit(&message) {
            AgentError::RateLimited {
                retry_after: hint.delay(),
            }
        } else {
            AgentError::Upstream(message)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AgentError::RateLimited { .. })
    }
}

fn mentions_rate_limit(message: &str) -> bool {
    let lowered = message.to_lowercase();
    RATE_LIMIT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|status| status.as_u16());
        AgentError::from_upstream(status, err.to_string(), RetryHint::default())
    }
}
