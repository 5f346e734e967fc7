use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::ToolCallPart;
use crate::providers::base::Usage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishUsage {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}

impl From<&Usage> for FinishUsage {
    fn from(usage: &Usage) -> Self {
        FinishUsage {
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
/// One chunk of agent output on its way to the client
pub enum StreamPart {
    #[serde(rename_all = "camelCase")]
    TextDelta { text_delta: String },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: Value,
    },
    #[serde(rename_all = "camelCase")]
    Finish {
        finish_reason: String,
        usage: FinishUsage,
    },
    Error { error: String },
}

impl StreamPart {
    pub fn text<S: Into<String>>(text: S) -> Self {
        StreamPart::TextDelta {
            text_delta: text.into(),
        }
    }

    pub fn tool_call(call: &ToolCallPart) -> Self {
        StreamPart::ToolCall {
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            args: call.args.clone(),
        }
    }

    pub fn tool_result(call: &ToolCallPart, result: Value) -> Self {
        StreamPart::ToolResult {
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            result,
        }
    }

    pub fn finish<S: Into<String>>(reason: S, usage: &Usage) -> Self {
        StreamPart::Finish {
            finish_reason: reason.into(),
            usage: usage.into(),
        }
    }

    pub fn error<S: Into<String>>(error: S) -> Self {
        StreamPart::Error {
            error: error.into(),
        }
    }

    /// The chunk as a generic JSON value, the form the reference resolver walks
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_part_wire_shape() {
        let call = ToolCallPart {
            tool_call_id: "call_1".to_string(),
            tool_name: "weather__get_forecast".to_string(),
            args: json!({"latitude": 42.0}),
        };

        assert_eq!(
            StreamPart::text("Hello").to_value(),
            json!({"type": "text-delta", "textDelta": "Hello"})
        );
        assert_eq!(
            StreamPart::tool_result(&call, json!({"uiDataRef": "abc"})).to_value(),
            json!({
                "type": "tool-result",
                "toolCallId": "call_1",
                "toolName": "weather__get_forecast",
                "result": {"uiDataRef": "abc"}
            })
        );
        assert_eq!(
            StreamPart::finish("stop", &Usage::new(Some(12), Some(4), Some(16))).to_value(),
            json!({
                "type": "finish",
                "finishReason": "stop",
                "usage": {"promptTokens": 12, "completionTokens": 4}
            })
        );
    }
}
