use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::errors::AgentResult;
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{Provider, Usage};

/// A mock provider that returns pre-configured responses for testing
#[derive(Debug, Default)]
pub struct MockProvider {
    responses: Mutex<VecDeque<AgentResult<Message>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    /// Like [`MockProvider::new`], but errors can be scripted too
    pub fn with_results(responses: Vec<AgentResult<Message>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The message histories each completion was asked for, in call order
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        _system_prompt: &str,
        messages: &[Message],
        _tools: &[Tool],
    ) -> AgentResult<(Message, Usage)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());

        let next = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(response) => response.map(|message| (message, Usage::new(Some(10), Some(5), Some(15)))),
            // Return empty response if no more pre-configured responses
            None => Ok((Message::assistant().with_text(""), Usage::default())),
        }
    }
}
