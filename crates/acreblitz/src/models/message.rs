use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::role::Role;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPart {
    pub tool_call_id: String,
    #[serde(default)]
    pub tool_name: String,
    pub result: Value,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
/// One typed part of a message's content
pub enum ContentPart {
    Text(TextPart),
    ToolCall(ToolCallPart),
    ToolResult(ToolResultPart),
}

impl ContentPart {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ContentPart::Text(TextPart { text: text.into() })
    }

    pub fn tool_call<S: Into<String>, N: Into<String>>(id: S, name: N, args: Value) -> Self {
        ContentPart::ToolCall(ToolCallPart {
            tool_call_id: id.into(),
            tool_name: name.into(),
            args,
        })
    }

    pub fn tool_result<S: Into<String>, N: Into<String>>(id: S, name: N, result: Value) -> Self {
        ContentPart::ToolResult(ToolResultPart {
            tool_call_id: id.into(),
            tool_name: name.into(),
            result,
            is_error: false,
        })
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallPart> {
        if let ContentPart::ToolCall(ref call) = self {
            Some(call)
        } else {
            None
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultPart> {
        if let ContentPart::ToolResult(ref result) = self {
            Some(result)
        } else {
            None
        }
    }

    /// Get the text content if this is a Text variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text(text) => Some(&text.text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
/// Message content is either a bare string or an ordered list of typed parts
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Parts(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
}

impl Message {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Message { role, content }
    }

    /// Create a new empty user message
    pub fn user() -> Self {
        Message::new(Role::User, MessageContent::default())
    }

    /// Create a new empty assistant message
    pub fn assistant() -> Self {
        Message::new(Role::Assistant, MessageContent::default())
    }

    /// Create a new empty tool message
    pub fn tool() -> Self {
        Message::new(Role::Tool, MessageContent::default())
    }

    /// Create a new empty system message
    pub fn system() -> Self {
        Message::new(Role::System, MessageContent::default())
    }

    /// Add a part to the message, converting bare text content into a text part first
    pub fn with_part(mut self, part: ContentPart) -> Self {
        if let MessageContent::Text(text) = &self.content {
            self.content = MessageContent::Parts(vec![ContentPart::text(text.clone())]);
        }
        if let MessageContent::Parts(parts) = &mut self.content {
            parts.push(part);
        }
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_part(ContentPart::text(text))
    }

    /// Add a tool call to the message
    pub fn with_tool_call<S: Into<String>, N: Into<String>>(
        self,
        id: S,
        name: N,
        args: Value,
    ) -> Self {
        self.with_part(ContentPart::tool_call(id, name, args))
    }

    /// Add a tool result to the message
    pub fn with_tool_result<S: Into<String>, N: Into<String>>(
        self,
        id: S,
        name: N,
        result: Value,
    ) -> Self {
        self.with_part(ContentPart::tool_result(id, name, result))
    }

    /// The typed parts of this message; bare text content has none
    pub fn parts(&self) -> &[ContentPart] {
        match &self.content {
            MessageContent::Parts(parts) => parts,
            MessageContent::Text(_) => &[],
        }
    }

    pub fn parts_mut(&mut self) -> &mut [ContentPart] {
        match &mut self.content {
            MessageContent::Parts(parts) => parts,
            MessageContent::Text(_) => &mut [],
        }
    }

    /// All text in the message, in order, joined by newlines
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(ContentPart::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.parts().iter().filter_map(ContentPart::as_tool_call)
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResultPart> {
        self.parts().iter().filter_map(ContentPart::as_tool_result)
    }
}
