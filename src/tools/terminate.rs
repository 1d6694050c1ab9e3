//! Termination tool for ending agent execution

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::tools::traits::{Tool, ToolResult};

/// Signals the agent to stop processing and return a final answer.
pub struct TerminateTool;

#[async_trait]
impl Tool for TerminateTool {
    fn name(&self) -> &str {
        "terminate"
    }

    fn description(&self) -> &str {
        "Terminate the current agent execution. Signals the agent to stop \
         processing and return a final answer. Use this when you have \
         completed the task or have a final answer to provide."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Final message or result to return to the user"
                },
                "reason": {
                    "type": "string",
                    "description": "Reason for termination (for logging purposes)"
                }
            },
            "required": ["message"]
        })
    }

    async fn run(&self, args: Value, _cancel: CancellationToken) -> Result<ToolResult> {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("Task completed.");
        let reason = args
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("task completed");

        info!(reason, "agent termination requested");

        Ok(ToolResult::terminate(message).with_metadata(json!({"reason": reason})))
    }
}
