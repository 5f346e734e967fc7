//! Strips oversized payload fields from historical tool results.
//!
//! Clients re-send the full conversation every turn, including the visualization
//! payloads they received. Those payloads are for rendering only; replaying them
//! to the model would cost tens of thousands of tokens per turn. The compactor
//! removes the configured fields from every tool result and leaves everything
//! else, `agentSummary` in particular, untouched. It knows nothing about which
//! tool produced a result.
use serde_json::Value;

use crate::models::message::{ContentPart, Message};
use crate::models::role::Role;

pub const DEFAULT_LARGE_PAYLOAD_FIELDS: &[&str] = &["uiData"];

#[derive(Debug, Clone)]
pub struct HistoryCompactor {
    fields: Vec<String>,
}

impl Default for HistoryCompactor {
    fn default() -> Self {
        Self::new(DEFAULT_LARGE_PAYLOAD_FIELDS.iter().copied())
    }
}

impl HistoryCompactor {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Return a compacted copy of the history; the input is never modified
    pub fn compact(&self, messages: &[Message]) -> Vec<Message> {
        let mut stripped = 0;
        let compacted = messages
            .iter()
            .map(|message| {
                let mut message = message.clone();
                if message.role == Role::Tool {
                    stripped += self.strip_message(&mut message);
                }
                message
            })
            .collect();

        if stripped > 0 {
            tracing::debug!(stripped, "stripped large payload fields from history");
        }
        compacted
    }

    fn strip_message(&self, message: &mut Message) -> usize {
        let mut stripped = 0;
        for part in message.parts_mut() {
            if let ContentPart::ToolResult(result) = part {
                if let Value::Object(fields) = &mut result.result {
                    for field in &self.fields {
                        if fields.remove(field).is_some() {
                            stripped += 1;
                        }
                    }
                }
            }
        }
        stripped
    }
}
