//! Core tool trait and result types

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::agent::types::{FunctionDefinition, ToolDefinition};
use crate::error::{ErrorKind, Result};

/// Default per-tool execution timeout
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default TTL for cacheable tool results
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// A tool that can be called by the LLM
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Get the JSON Schema for tool parameters
    fn parameters_schema(&self) -> Value;

    /// Alternate names resolving to this tool
    fn aliases(&self) -> &[&str] {
        &[]
    }

    /// Whether results may be cached. Tools with observable side effects
    /// must leave this false.
    fn cacheable(&self) -> bool {
        false
    }

    /// TTL for cached results
    fn cache_ttl(&self) -> Duration {
        DEFAULT_CACHE_TTL
    }

    /// Execution timeout
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }

    /// Per-call timeout override. Installer-class tools inspect the
    /// arguments here and look the package up in
    /// [`package_install_timeout`] (large browser packages get minutes,
    /// not seconds).
    ///
    /// [`package_install_timeout`]: super::package_install_timeout
    fn timeout_for(&self, _args: &Value) -> Duration {
        self.timeout()
    }

    /// Whether the tool holds state that `cleanup` must release on agent reset
    fn stateful(&self) -> bool {
        false
    }

    /// Whether arguments pass through the shell deny-list before execution
    fn shell_guarded(&self) -> bool {
        false
    }

    /// Execute the tool with given arguments.
    ///
    /// The token is cancelled when the caller gives up; tools that cannot
    /// observe it within ~100ms are abandoned.
    async fn run(&self, args: Value, cancel: CancellationToken) -> Result<ToolResult>;

    /// Release held resources. Idempotent.
    async fn cleanup(&self) {}

    /// Reset internal state between conversations. Idempotent.
    async fn reset(&self) {}

    /// Convert to a function-calling tool definition
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: self.parameters_schema(),
            },
        }
    }
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool").field("name", &self.name()).finish()
    }
}

/// Outcome status of a tool execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Executed and produced a result
    Success,
    /// Failed; `error_kind` says how
    Error,
    /// Ran out of time (or was cancelled mid-flight)
    Timeout,
    /// Signals the agent loop to stop after appending this result
    Terminate,
}

/// Normalized result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Outcome status
    pub status: ToolStatus,
    /// Result content, or a failure description
    pub content: String,
    /// Failure classification, set when status is not success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Execution metadata (tool name, elapsed time, cache hits)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(content: impl Into<String>) -> Self {
        ToolResult {
            status: ToolStatus::Success,
            content: content.into(),
            error_kind: None,
            metadata: None,
        }
    }

    /// Create a failed result
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ToolResult {
            status: ToolStatus::Error,
            content: message.into(),
            error_kind: Some(kind),
            metadata: None,
        }
    }

    /// Create a timeout result
    pub fn timeout(message: impl Into<String>) -> Self {
        ToolResult {
            status: ToolStatus::Timeout,
            content: message.into(),
            error_kind: Some(ErrorKind::Timeout),
            metadata: None,
        }
    }

    /// Create a terminate result carrying the final message
    pub fn terminate(message: impl Into<String>) -> Self {
        ToolResult {
            status: ToolStatus::Terminate,
            content: message.into(),
            error_kind: None,
            metadata: None,
        }
    }

    /// Attach or merge metadata fields
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        match (&mut self.metadata, metadata) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                existing.extend(incoming);
            }
            (slot, incoming) => *slot = Some(incoming),
        }
        self
    }

    /// Whether the execution succeeded
    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// Render for the LLM as tool-role message content
    pub fn to_prompt_string(&self) -> String {
        match self.status {
            ToolStatus::Success | ToolStatus::Terminate => self.content.clone(),
            ToolStatus::Error => {
                let kind = self
                    .error_kind
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "error".to_string());
                format!("Error ({}): {}", kind, self.content)
            }
            ToolStatus::Timeout => format!("Timeout: {}", self.content),
        }
    }
}

impl From<String> for ToolResult {
    fn from(content: String) -> Self {
        ToolResult::success(content)
    }
}

/// A tool call request from the LLM, normalized from the wire shapes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool call ID
    pub id: String,
    /// Tool name
    pub name: String,
    /// Tool arguments: a JSON object, or a JSON-encoded (or bare) string
    pub arguments: Value,
}

impl ToolCall {
    /// Parse arguments into a specific type
    pub fn parse_arguments<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.arguments.clone()).map_err(|e| {
            crate::Error::ArgumentParse(format!("invalid tool arguments: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_constructors() {
        let ok = ToolResult::success("Done!");
        assert!(ok.is_success());
        assert_eq!(ok.to_prompt_string(), "Done!");

        let err = ToolResult::error(ErrorKind::Execution, "boom");
        assert_eq!(err.status, ToolStatus::Error);
        assert_eq!(err.to_prompt_string(), "Error (execution): boom");

        let stop = ToolResult::terminate("bye");
        assert_eq!(stop.status, ToolStatus::Terminate);
    }

    #[test]
    fn metadata_merges() {
        let r = ToolResult::success("x")
            .with_metadata(serde_json::json!({"tool": "bash"}))
            .with_metadata(serde_json::json!({"execution_time_ms": 12}));
        let meta = r.metadata.unwrap();
        assert_eq!(meta["tool"], "bash");
        assert_eq!(meta["execution_time_ms"], 12);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ToolStatus::Terminate).unwrap(),
            "\"terminate\""
        );
    }
}
