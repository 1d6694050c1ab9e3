//! Tools module - the runtime's capability layer
//!
//! Each tool is a self-contained type implementing the `Tool` trait. Tools
//! are registered into a `ToolRegistry` and dispatched through the
//! `ToolInvoker`, which owns argument parsing, schema validation, timeouts,
//! result caching, and the shell safety gate.
//!
//! ## Built-in Tools
//!
//! - **planning**: create, persist, and execute step-indexed plans
//! - **terminate**: gracefully end the agent loop with a final message
//!
//! ## Adding a New Tool
//!
//! 1. Create a new file in `src/tools/` (e.g., `my_tool.rs`)
//! 2. Implement the `Tool` trait
//! 3. Add `mod my_tool;` and `pub use` in this file
//! 4. Register it wherever the registry is assembled

mod cache;
mod install_timeouts;
mod invoke;
mod planning;
mod registry;
mod safety;
mod terminate;
mod traits;

// Core trait and types
pub use traits::{Tool, ToolCall, ToolResult, ToolStatus, DEFAULT_CACHE_TTL, DEFAULT_TOOL_TIMEOUT};

// Registry
pub use registry::{global_registry, ToolRegistry};

// Invocation layer
pub use cache::CacheStats;
pub use install_timeouts::package_install_timeout;
pub use invoke::ToolInvoker;

// Built-in tools
pub use planning::{Plan, PlanGenerator, PlanningTool, SleepStepExecutor, StepExecutor, StepStatus};
pub use terminate::TerminateTool;

/// Serialize a JSON value with object keys sorted at every level.
///
/// Used for cache keys and loop-detection keys so that argument field
/// ordering never changes identity.
pub fn canonical_json(value: &serde_json::Value) -> String {
    use serde_json::Value;

    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String((*key).clone()).to_string());
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}
