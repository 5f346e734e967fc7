use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::ReferenceCache;
use crate::errors::{AgentError, AgentResult};
use crate::models::message::{ContentPart, Message, ToolCallPart, ToolResultPart};
use crate::models::stream::StreamPart;
use crate::models::tool::{Tool, ToolCall, ToolResult};
use crate::prompt_template::{load_prompt, SYSTEM_PROMPT_TEMPLATE};
use crate::providers::base::Provider;
use crate::providers::utils::is_valid_function_name;
use crate::systems::System;
use crate::token_counter::TokenAccountant;

#[derive(Clone, Debug, Serialize)]
struct SystemInfo {
    name: String,
    description: String,
    instructions: String,
}

impl SystemInfo {
    fn new(name: &str, description: &str, instructions: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            instructions: instructions.to_string(),
        }
    }
}

/// Agent integrates a foundational LLM with the systems it needs to pilot
pub struct Agent {
    systems: Vec<Box<dyn System>>,
    provider: Arc<dyn Provider>,
    cache: Arc<ReferenceCache>,
    accountant: Arc<TokenAccountant>,
}

impl Agent {
    /// Create a new Agent; tool visualization payloads are parked in `cache`
    pub fn new(provider: Arc<dyn Provider>, cache: Arc<ReferenceCache>) -> Self {
        Self {
            systems: Vec::new(),
            provider,
            cache,
            accountant: Arc::new(TokenAccountant::default()),
        }
    }

    pub fn with_accountant(mut self, accountant: Arc<TokenAccountant>) -> Self {
        self.accountant = accountant;
        self
    }

    /// Add a system to the agent
    pub fn add_system(&mut self, system: Box<dyn System>) {
        self.systems.push(system);
    }

    pub fn cache(&self) -> &Arc<ReferenceCache> {
        &self.cache
    }

    pub fn accountant(&self) -> &Arc<TokenAccountant> {
        &self.accountant
    }

    /// Get all tools from all systems with proper system prefixing
    fn get_prefixed_tools(&self) -> Vec<Tool> {
        let mut tools = Vec::new();
        for system in &self.systems {
            for tool in system.tools() {
                tools.push(Tool::new(
                    format!("{}__{}", system.name(), tool.name),
                    &tool.description,
                    tool.input_schema.clone(),
                ));
            }
        }
        tools
    }

    /// Find the appropriate system for a tool call based on the prefixed name
    fn get_system_for_tool(&self, system_name: &str) -> Option<&dyn System> {
        self.systems
            .iter()
            .find(|sys| sys.name() == system_name)
            .map(|v| &**v)
    }

    /// Dispatch a single tool call to the appropriate system
    async fn dispatch_tool_call(&self, call: &ToolCallPart) -> AgentResult<ToolResult> {
        if !is_valid_function_name(&call.tool_name) {
            return Err(AgentError::InvalidToolName(call.tool_name.clone()));
        }
        let (system_name, tool_name) = call
            .tool_name
            .split_once("__")
            .ok_or_else(|| AgentError::InvalidToolName(call.tool_name.clone()))?;
        let system = self
            .get_system_for_tool(system_name)
            .ok_or_else(|| AgentError::ToolNotFound(call.tool_name.clone()))?;

        system
            .call(ToolCall::new(tool_name, call.args.clone()))
            .await
    }

    fn get_system_prompt(&self) -> AgentResult<String> {
        let mut context = HashMap::new();
        let systems_info: Vec<SystemInfo> = self
            .systems
            .iter()
            .map(|system| {
                SystemInfo::new(system.name(), system.description(), system.instructions())
            })
            .collect();

        context.insert("systems", systems_info);
        load_prompt(SYSTEM_PROMPT_TEMPLATE, &context)
            .map_err(|e| AgentError::Internal(e.to_string()))
    }

    /// Stream the agent's reply as protocol chunks.
    ///
    /// The first completion runs before the stream is returned, so its failures
    /// (a rate limit in particular) come back as the `Err` of this call. Later
    /// rounds, after tool calls, fail inside the stream. Tool results carry a
    /// `uiDataRef` in place of any visualization payload.
    pub async fn reply(
        &self,
        messages: &[Message],
    ) -> AgentResult<BoxStream<'_, AgentResult<Value>>> {
        let mut messages = messages.to_vec();
        let tools = self.get_prefixed_tools();
        let system_prompt = self.get_system_prompt()?;

        let (first, first_usage) = self
            .provider
            .complete(&system_prompt, &messages, &tools)
            .await?;

        Ok(Box::pin(async_stream::try_stream! {
            let mut response = first;
            let mut usage = first_usage;

            loop {
                let text = response.text();
                if !text.is_empty() {
                    yield StreamPart::text(text).to_value();
                }

                let calls: Vec<ToolCallPart> = response.tool_calls().cloned().collect();
                for call in &calls {
                    yield StreamPart::tool_call(call).to_value();
                }

                if calls.is_empty() {
                    yield StreamPart::finish("stop", &usage).to_value();
                    break;
                }

                // Let the tool-call chunks go out before the tools start running
                tokio::task::yield_now().await;

                let futures: Vec<_> = calls
                    .iter()
                    .map(|call| self.dispatch_tool_call(call))
                    .collect();
                let outputs = futures::future::join_all(futures).await;

                let mut tool_message = Message::tool();
                for (call, output) in calls.iter().zip(outputs) {
                    let result = output.unwrap_or_else(|e| {
                        tracing::warn!(tool = %call.tool_name, error = %e, "tool call failed");
                        ToolResult::failure(e.to_string())
                    });
                    let is_error = !result.success;
                    let value = result.into_streamable(&self.cache).to_value();

                    self.accountant.log_tool_tokens(&call.tool_name, &call.args, &value);
                    yield StreamPart::tool_result(call, value.clone()).to_value();

                    tool_message = tool_message.with_part(ContentPart::ToolResult(ToolResultPart {
                        tool_call_id: call.tool_call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        result: value,
                        is_error,
                    }));
                }

                messages.push(response);
                messages.push(tool_message);

                let (next, next_usage) = self
                    .provider
                    .complete(&system_prompt, &messages, &tools)
                    .await?;
                usage.accumulate(&next_usage);
                response = next;
            }
        }))
    }
}
