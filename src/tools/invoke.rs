//! Tool invocation layer
//!
//! Transforms a `ToolCall` from the LLM into an executed side-effect and a
//! normalized `ToolResult`. This is the only path by which tools run:
//! argument parsing, schema validation, the shell safety gate, timeouts,
//! result caching, and panic containment all live here, so the agent loop
//! only ever sees a `ToolResult`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, ErrorKind, Result};

use super::cache::{CacheStats, ToolCache};
use super::registry::ToolRegistry;
use super::safety;
use super::traits::{Tool, ToolCall, ToolResult};

/// Grace period between cooperative cancel and abandonment
const CANCEL_GRACE: Duration = Duration::from_millis(100);

/// Dispatches tool calls against a registry
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    cache: ToolCache,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        ToolInvoker {
            registry,
            cache: ToolCache::new(),
        }
    }

    /// Cache hit/miss statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Execute one tool call and normalize whatever happens into a
    /// `ToolResult`. Never returns an error: failures become results so the
    /// LLM can observe and react.
    pub async fn dispatch(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolResult {
        let started = Instant::now();

        let tool = match self.registry.get(&call.name) {
            Ok(tool) => tool,
            Err(e) => {
                warn!(tool = %call.name, "tool not found");
                return ToolResult::error(ErrorKind::NotFound, e.to_string())
                    .with_metadata(json!({"tool": call.name}));
            }
        };

        let schema = tool.parameters_schema();
        let args = match parse_arguments(&schema, &call.arguments) {
            Ok(args) => args,
            Err(e) => return failure(&call.name, e, started),
        };
        if let Err(e) = validate_arguments(&schema, &args) {
            return failure(&call.name, e, started);
        }

        if tool.shell_guarded() {
            if let Err(e) = gate_shell_arguments(&args) {
                info!(tool = %call.name, "safety gate blocked command");
                return failure(&call.name, e, started);
            }
        }

        let args = Value::Object(args);

        let cache_key = if tool.cacheable() {
            let key = ToolCache::key(tool.name(), &args);
            if let Some(hit) = self.cache.get(&key).await {
                debug!(tool = %call.name, "cache hit");
                return hit.with_metadata(json!({"cache_hit": true}));
            }
            Some(key)
        } else {
            None
        };

        let timeout = tool.timeout_for(&args);
        let result = execute_with_timeout(tool.clone(), args, timeout, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = result.with_metadata(json!({
            "tool": tool.name(),
            "execution_time_ms": elapsed_ms,
        }));

        if result.is_success() {
            if let Some(key) = cache_key {
                self.cache.put(key, result.clone(), tool.cache_ttl()).await;
            }
        }

        result
    }
}

fn failure(tool_name: &str, error: Error, started: Instant) -> ToolResult {
    ToolResult::error(error.kind(), error.to_string()).with_metadata(json!({
        "tool": tool_name,
        "execution_time_ms": started.elapsed().as_millis() as u64,
    }))
}

/// Run the tool on its own task so a timeout can attempt graceful
/// cancellation before abandoning it.
async fn execute_with_timeout(
    tool: Arc<dyn Tool>,
    args: Value,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ToolResult {
    let child = cancel.child_token();
    let mut handle = tokio::spawn({
        let tool = tool.clone();
        let child = child.clone();
        async move { tool.run(args, child).await }
    });

    tokio::select! {
        joined = &mut handle => normalize_join(joined),
        _ = tokio::time::sleep(timeout) => {
            child.cancel();
            // Grace window: a cooperative tool may still hand back partial output
            match tokio::time::timeout(CANCEL_GRACE, &mut handle).await {
                Ok(joined) => {
                    let partial = match normalize_join(joined) {
                        r if r.content.is_empty() => String::new(),
                        r => format!("; partial output: {}", r.content),
                    };
                    ToolResult::timeout(format!(
                        "tool '{}' exceeded {}s{}",
                        tool.name(),
                        timeout.as_secs(),
                        partial
                    ))
                }
                Err(_) => {
                    handle.abort();
                    ToolResult::timeout(format!(
                        "tool '{}' exceeded {}s and was force-terminated",
                        tool.name(),
                        timeout.as_secs()
                    ))
                }
            }
        }
        _ = cancel.cancelled() => {
            child.cancel();
            let _ = tokio::time::timeout(CANCEL_GRACE, &mut handle).await;
            handle.abort();
            ToolResult::timeout(format!("tool '{}' cancelled", tool.name()))
        }
    }
}

fn normalize_join(
    joined: std::result::Result<Result<ToolResult>, tokio::task::JoinError>,
) -> ToolResult {
    match joined {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => ToolResult::error(e.kind(), e.to_string()),
        Err(join_err) if join_err.is_panic() => {
            ToolResult::error(ErrorKind::Execution, "tool panicked during execution")
        }
        Err(_) => ToolResult::error(ErrorKind::Execution, "tool task aborted"),
    }
}

/// Parse raw tool-call arguments into a JSON object.
///
/// Accepts, in order: a mapping as-is; a strict-JSON string encoding a
/// mapping; a bare string when the schema declares exactly one required
/// string property (the `bash.command` case).
pub fn parse_arguments(schema: &Value, raw: &Value) -> Result<Map<String, Value>> {
    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        Value::String(s) => {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(s) {
                return Ok(map);
            }
            if let Some(property) = sole_required_string_property(schema) {
                let mut map = Map::new();
                map.insert(property, Value::String(s.clone()));
                return Ok(map);
            }
            Err(Error::ArgumentParse(format!(
                "arguments are not a JSON object: {}",
                truncate(s, 120)
            )))
        }
        other => Err(Error::ArgumentParse(format!(
            "arguments must be an object or string, got {}",
            json_type_name(other)
        ))),
    }
}

/// The property name if the schema requires exactly one string property.
fn sole_required_string_property(schema: &Value) -> Option<String> {
    let required = schema.get("required")?.as_array()?;
    if required.len() != 1 {
        return None;
    }
    let name = required[0].as_str()?;
    let declared = schema.pointer(&format!("/properties/{}/type", name))?;
    if declared.as_str() == Some("string") {
        Some(name.to_string())
    } else {
        None
    }
}

/// Validate parsed arguments against the declared schema: required
/// properties, primitive types, and enum membership.
pub fn validate_arguments(schema: &Value, args: &Map<String, Value>) -> Result<()> {
    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for name in required.iter().filter_map(|v| v.as_str()) {
            if !args.contains_key(name) {
                return Err(Error::InvalidArgument {
                    argument: name.to_string(),
                    reason: "required property missing".to_string(),
                });
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) else {
        return Ok(());
    };

    for (name, value) in args {
        // Underscore-prefixed keys are runtime-injected context, not
        // LLM-supplied arguments.
        if name.starts_with('_') {
            continue;
        }
        let Some(declared) = properties.get(name) else {
            continue;
        };

        if let Some(expected) = declared.get("type").and_then(|v| v.as_str()) {
            if !type_matches(expected, value) {
                return Err(Error::InvalidArgument {
                    argument: name.clone(),
                    reason: format!(
                        "expected {}, got {}",
                        expected,
                        json_type_name(value)
                    ),
                });
            }
        }

        if let Some(allowed) = declared.get("enum").and_then(|v| v.as_array()) {
            if !allowed.contains(value) {
                return Err(Error::InvalidArgument {
                    argument: name.clone(),
                    reason: format!("value {} is not one of the allowed values", value),
                });
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Run every string argument through the shell deny-list. The `command`
/// property is the usual carrier but wrapped single-property tools may
/// name it differently.
fn gate_shell_arguments(args: &Map<String, Value>) -> Result<()> {
    for value in args.values() {
        if let Some(s) = value.as_str() {
            safety::check_command(s)?;
        }
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
