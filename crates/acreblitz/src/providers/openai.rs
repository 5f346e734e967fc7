use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Provider, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{messages_to_openai_spec, openai_response_to_message, tools_to_openai_spec};
use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::retry::RetryHint;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Usage {
        let Some(usage) = data.get("usage") else {
            return Usage::default();
        };

        let read = |key: &str| {
            usage
                .get(key)
                .and_then(Value::as_i64)
                .and_then(|v| i32::try_from(v).ok())
        };
        let input_tokens = read("prompt_tokens");
        let output_tokens = read("completion_tokens");
        let total_tokens = read("total_tokens").or_else(|| match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => input.checked_add(output),
            _ => None,
        });

        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    async fn post(&self, payload: Value) -> AgentResult<Value> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let hint = RetryHint::from_headers(response.headers());
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), body = %body, "completion request failed");
        Err(AgentError::from_upstream(
            Some(status.as_u16()),
            format!("Request failed: {} {}", status, body),
            hint,
        ))
    }
}

const RATE_LIMIT_TYPES: [&str; 2] = ["rate_limit_exceeded", "RESOURCE_EXHAUSTED"];

/// HTTP status reported inside an error body.
///
/// Looks at `code`, `status` and `response.status`, numeric or numeric strings,
/// and maps rate-limit type names to 429.
fn error_body_status(error: &Value) -> Option<u16> {
    let as_status = |value: &Value| match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };

    let numeric = ["code", "status"]
        .iter()
        .filter_map(|key| error.get(*key))
        .chain(error.pointer("/response/status"))
        .find_map(as_status);
    if numeric.is_some() {
        return numeric;
    }

    ["type", "code", "status"]
        .iter()
        .filter_map(|key| error.get(*key).and_then(Value::as_str))
        .any(|name| RATE_LIMIT_TYPES.contains(&name))
        .then_some(429)
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> AgentResult<(Message, Usage)> {
        let mut messages_array = vec![json!({
            "role": "system",
            "content": system
        })];
        messages_array.extend(messages_to_openai_spec(messages));

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_array
        });

        if let Some(object) = payload.as_object_mut() {
            if !tools.is_empty() {
                object.insert("tools".to_string(), json!(tools_to_openai_spec(tools)?));
            }
            if let Some(temp) = self.config.temperature {
                object.insert("temperature".to_string(), json!(temp));
            }
            if let Some(tokens) = self.config.max_tokens {
                object.insert("max_tokens".to_string(), json!(tokens));
            }
        }

        let response = self.post(payload).await?;

        // Some compatible endpoints report errors in a 200 body
        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| error.to_string());
            return Err(AgentError::from_upstream(
                error_body_status(error),
                message,
                RetryHint::default(),
            ));
        }

        let message = openai_response_to_message(&response)?;
        let usage = Self::get_usage(&response);

        Ok((message, usage))
    }
}
