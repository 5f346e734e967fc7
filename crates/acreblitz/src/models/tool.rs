use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::ReferenceCache;

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON schema for the parameters the tool accepts
    pub input_schema: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A tool call request that a system can execute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// The name of the tool to execute
    pub name: String,
    /// The parameters for the execution
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new ToolCall with the given name and arguments
    pub fn new<S: Into<String>>(name: S, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// The large visualization payload attached to a tool result, if any
#[derive(Debug, Clone, PartialEq)]
pub enum Visualization {
    /// The full payload, only held before it crosses the streaming boundary
    Inline(Value),
    /// A reference into the [`ReferenceCache`] standing in for the payload
    Reference(String),
}

/// The value a tool execution returns.
///
/// `agentSummary` is always sent to the model. The visualization travels as
/// `uiData` (inline) or `uiDataRef` (cached), never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ToolResultWire", into = "ToolResultWire")]
pub struct ToolResult {
    pub success: bool,
    pub agent_summary: Value,
    pub visualization: Option<Visualization>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolResultWire {
    success: bool,
    #[serde(default)]
    agent_summary: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ui_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ui_data_ref: Option<String>,
}

impl TryFrom<ToolResultWire> for ToolResult {
    type Error = String;

    fn try_from(wire: ToolResultWire) -> Result<Self, Self::Error> {
        let visualization = match (wire.ui_data, wire.ui_data_ref) {
            (Some(_), Some(_)) => {
                return Err("a tool result carries either uiData or uiDataRef, not both".to_string())
            }
            (Some(payload), None) => Some(Visualization::Inline(payload)),
            (None, Some(reference)) => Some(Visualization::Reference(reference)),
            (None, None) => None,
        };
        Ok(ToolResult {
            success: wire.success,
            agent_summary: wire.agent_summary,
            visualization,
        })
    }
}

impl From<ToolResult> for ToolResultWire {
    fn from(result: ToolResult) -> Self {
        let (ui_data, ui_data_ref) = match result.visualization {
            Some(Visualization::Inline(payload)) => (Some(payload), None),
            Some(Visualization::Reference(reference)) => (None, Some(reference)),
            None => (None, None),
        };
        ToolResultWire {
            success: result.success,
            agent_summary: result.agent_summary,
            ui_data,
            ui_data_ref,
        }
    }
}

impl ToolResult {
    pub fn success<S: Into<Value>>(agent_summary: S) -> Self {
        ToolResult {
            success: true,
            agent_summary: agent_summary.into(),
            visualization: None,
        }
    }

    pub fn failure<S: Into<String>>(message: S) -> Self {
        ToolResult {
            success: false,
            agent_summary: Value::String(message.into()),
            visualization: None,
        }
    }

    /// Attach the full visualization payload
    pub fn with_ui_data(mut self, payload: Value) -> Self {
        self.visualization = Some(Visualization::Inline(payload));
        self
    }

    pub fn ui_data(&self) -> Option<&Value> {
        match &self.visualization {
            Some(Visualization::Inline(payload)) => Some(payload),
            _ => None,
        }
    }

    pub fn ui_data_ref(&self) -> Option<&str> {
        match &self.visualization {
            Some(Visualization::Reference(reference)) => Some(reference),
            _ => None,
        }
    }

    /// Move an inline payload into the cache, leaving a reference in its place.
    ///
    /// Results without an inline payload are returned unchanged.
    pub fn into_streamable(mut self, cache: &ReferenceCache) -> Self {
        if let Some(Visualization::Inline(payload)) = self.visualization.take() {
            let reference = cache.store(payload);
            tracing::debug!(reference = %reference, "cached tool visualization payload");
            self.visualization = Some(Visualization::Reference(reference));
        }
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
