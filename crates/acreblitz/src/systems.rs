use async_trait::async_trait;

use crate::errors::AgentResult;
use crate::models::tool::{Tool, ToolCall, ToolResult};

pub mod weather;

/// Core trait that defines a system that can be operated by an AI agent
#[async_trait]
pub trait System: Send + Sync {
    /// Get the name of the system
    fn name(&self) -> &str;

    /// Get the system description
    fn description(&self) -> &str;

    /// Get system instructions
    fn instructions(&self) -> &str;

    /// Get available tools
    fn tools(&self) -> &[Tool];

    /// Call a tool with the given parameters.
    ///
    /// A returned error is reported to the model as a failed tool result.
    async fn call(&self, tool_call: ToolCall) -> AgentResult<ToolResult>;
}
