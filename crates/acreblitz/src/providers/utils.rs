use serde_json::{json, Map, Value};
use std::collections::HashSet;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::{ContentPart, Message};
use crate::models::role::Role;
use crate::models::tool::Tool;

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        match message.role {
            Role::Tool => {
                for result in message.tool_results() {
                    messages_spec.push(json!({
                        "role": "tool",
                        "tool_call_id": result.tool_call_id,
                        "content": tool_content(&result.result),
                    }));
                }
            }
            role => {
                let mut converted = Map::new();
                converted.insert("role".to_string(), json!(role));

                let text = message.text();
                if !text.is_empty() {
                    converted.insert("content".to_string(), json!(text));
                }

                let tool_calls: Vec<Value> = message
                    .tool_calls()
                    .map(|call| {
                        json!({
                            "id": call.tool_call_id,
                            "type": "function",
                            "function": {
                                "name": sanitize_function_name(&call.tool_name),
                                "arguments": call.args.to_string(),
                            }
                        })
                    })
                    .collect();
                if role == Role::Assistant && !tool_calls.is_empty() {
                    converted.insert("tool_calls".to_string(), json!(tool_calls));
                }

                if converted.contains_key("content") || converted.contains_key("tool_calls") {
                    messages_spec.push(Value::Object(converted));
                }
            }
        }
    }

    messages_spec
}

/// Tool messages carry plain string content
fn tool_content(result: &Value) -> String {
    match result {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> AgentResult<Vec<Value>> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(AgentError::InvalidToolName(format!(
                "{} is declared more than once",
                tool.name
            )));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Convert OpenAI's API response to internal Message format
pub fn openai_response_to_message(response: &Value) -> AgentResult<Message> {
    let original = response
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| AgentError::Upstream("completion response has no choices".to_string()))?;

    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            message = message.with_text(text);
        }
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default();
            let function_name = tool_call["function"]["name"].as_str().unwrap_or_default();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default();

            // Unparseable arguments are passed through so the tool can reject them
            let args = if arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str::<Value>(arguments)
                    .unwrap_or_else(|_| Value::String(arguments.to_string()))
            };

            message = message.with_part(ContentPart::tool_call(id, function_name, args));
        }
    }

    Ok(message)
}

pub fn sanitize_function_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
