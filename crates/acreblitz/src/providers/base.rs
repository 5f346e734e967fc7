use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AgentResult;
use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Add another completion's usage to this one; unknown counts stay unknown only
    /// when both sides are unknown
    pub fn accumulate(&mut self, other: &Usage) {
        fn add(a: Option<i32>, b: Option<i32>) -> Option<i32> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a.saturating_add(b)),
                (a, b) => a.or(b),
            }
        }
        self.input_tokens = add(self.input_tokens, other.input_tokens);
        self.output_tokens = add(self.output_tokens, other.output_tokens);
        self.total_tokens = add(self.total_tokens, other.total_tokens);
    }
}

/// Base trait for LLM providers
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next assistant message for the conversation.
    ///
    /// Failures are already normalized: a rate limit surfaces as
    /// [`crate::errors::AgentError::RateLimited`].
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> AgentResult<(Message, Usage)>;
}
