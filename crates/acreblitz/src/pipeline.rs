//! The request path from incoming chat history to outgoing protocol chunks.
//!
//! History is sanitized, compacted and measured before the agent sees it; the
//! agent's first completion is retried on rate limits; every outgoing chunk has
//! its payload references resolved before it leaves.
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;

use crate::agent::Agent;
use crate::cache::ReferenceCache;
use crate::compact::HistoryCompactor;
use crate::errors::AgentResult;
use crate::models::message::Message;
use crate::resolver::ReferenceResolver;
use crate::retry::{retry_on_rate_limit, RetryConfig};
use crate::sanitize::remove_orphaned_tool_results;
use crate::token_counter::TokenAccountant;

pub struct ChatPipeline {
    agent: Agent,
    cache: Arc<ReferenceCache>,
    compactor: HistoryCompactor,
    retry: RetryConfig,
    accountant: Arc<TokenAccountant>,
    resolver: ReferenceResolver,
}

impl ChatPipeline {
    /// Build a pipeline sharing the agent's cache and token accountant
    pub fn new(agent: Agent) -> Self {
        let cache = Arc::clone(agent.cache());
        let accountant = Arc::clone(agent.accountant());
        Self {
            resolver: ReferenceResolver::new(Arc::clone(&cache)),
            agent,
            cache,
            compactor: HistoryCompactor::default(),
            retry: RetryConfig::default(),
            accountant,
        }
    }

    pub fn with_compactor(mut self, compactor: HistoryCompactor) -> Self {
        self.compactor = compactor;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn cache(&self) -> &Arc<ReferenceCache> {
        &self.cache
    }

    /// Sanitize then compact the incoming history, logging its size before and after
    pub fn prepare_history(&self, messages: &[Message]) -> Vec<Message> {
        let sanitized = remove_orphaned_tool_results(messages);
        let compacted = self.compactor.compact(&sanitized);

        let counter = self.accountant.counter();
        let before = counter.count_messages(messages);
        let after = counter.count_messages(&compacted);
        tracing::info!(
            messages = messages.len(),
            kept = compacted.len(),
            tokens_before = before,
            tokens_after = after,
            "prepared history"
        );

        compacted
    }

    /// Stream a reply to `messages` with payload references resolved.
    ///
    /// A rate limit on the first completion is retried with backoff; once
    /// retries run out the error is returned here rather than in the stream.
    pub async fn reply(
        &self,
        messages: &[Message],
    ) -> AgentResult<BoxStream<'_, AgentResult<Value>>> {
        let history = self.prepare_history(messages);
        let stream = retry_on_rate_limit(&self.retry, || self.agent.reply(&history)).await?;
        Ok(self.resolver.resolve_stream(stream))
    }

    /// Run a reply to completion and return only its text
    pub async fn ask(&self, messages: &[Message]) -> AgentResult<String> {
        let mut stream = self.reply(messages).await?;
        let mut response = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(text) = chunk.get("textDelta").and_then(Value::as_str) {
                response.push_str(text);
            }
        }
        Ok(response)
    }
}
