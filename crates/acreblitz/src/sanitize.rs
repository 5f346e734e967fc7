//! Drops tool results whose originating tool call is missing from the history.
//!
//! Upstream model APIs reject a tool result that references a call id absent
//! from the context. That happens when the client truncates or edits history,
//! so orphans are expected and removed silently.
use std::collections::HashSet;

use crate::models::message::{ContentPart, Message, MessageContent};
use crate::models::role::Role;

/// Remove orphaned tool results, keeping every other message in its original order.
///
/// Tool messages keep only the tool-result parts whose `toolCallId` appears in a
/// tool-call part of some assistant message; a tool message left with nothing is
/// dropped entirely.
pub fn remove_orphaned_tool_results(messages: &[Message]) -> Vec<Message> {
    let known_calls: HashSet<&str> = messages
        .iter()
        .filter(|message| message.role == Role::Assistant)
        .flat_map(|message| message.tool_calls())
        .map(|call| call.tool_call_id.as_str())
        .collect();

    let mut dropped = 0;
    let sanitized: Vec<Message> = messages
        .iter()
        .filter_map(|message| {
            if message.role != Role::Tool {
                return Some(message.clone());
            }

            let total = message.parts().len().max(1);
            let kept: Vec<ContentPart> = message
                .parts()
                .iter()
                .filter(|part| {
                    part.as_tool_result()
                        .is_some_and(|result| known_calls.contains(result.tool_call_id.as_str()))
                })
                .cloned()
                .collect();
            dropped += total - kept.len();

            if kept.is_empty() {
                None
            } else {
                Some(Message::new(Role::Tool, MessageContent::Parts(kept)))
            }
        })
        .collect();

    if dropped > 0 {
        tracing::debug!(dropped, "removed orphaned tool results from history");
    }
    sanitized
}
