//! Planning tool - durable, step-indexed plans
//!
//! A plan is an ordered list of steps with per-step status and notes,
//! persisted as one JSON document per plan and replaced atomically on every
//! mutation, so a plan survives the process and `load` + `execute_step`
//! resumes exactly where a previous run stopped.
//!
//! Step generation goes through the narrow [`PlanGenerator`] trait rather
//! than an agent back-reference; step execution goes through
//! [`StepExecutor`], which defaults to a stub so the tool is testable in
//! isolation.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};
use crate::tools::traits::{Tool, ToolResult};

/// Findings thresholds for `validate`
const MIN_RECOMMENDED_STEPS: usize = 3;
const MAX_RECOMMENDED_STEPS: usize = 20;

/// Status of one plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotStarted,
    InProgress,
    Completed,
    Blocked,
}

/// A persistent, step-indexed plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan identifier
    pub id: String,
    /// Creation timestamp (ISO 8601 on disk)
    pub created_at: DateTime<Utc>,
    /// Optional human-readable title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Ordered step descriptions
    pub steps: Vec<String>,
    /// Index of the next step to execute
    pub current_step: usize,
    /// Per-step status, same length as `steps`
    pub step_statuses: Vec<StepStatus>,
    /// Per-step free-text notes, same length as `steps`
    pub step_notes: Vec<String>,
    /// Index of the step that failed, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,
}

impl Plan {
    /// Create a fresh plan over the given steps.
    pub fn new(title: Option<String>, steps: Vec<String>) -> Self {
        let n = steps.len();
        Plan {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            title,
            steps,
            current_step: 0,
            step_statuses: vec![StepStatus::NotStarted; n],
            step_notes: vec![String::new(); n],
            failed_step: None,
        }
    }

    /// Check the parallel-array invariant.
    pub fn is_consistent(&self) -> bool {
        self.steps.len() == self.step_statuses.len() && self.steps.len() == self.step_notes.len()
    }

    /// True once every step has executed.
    pub fn is_complete(&self) -> bool {
        self.current_step >= self.steps.len()
    }
}

/// Narrow handle for LLM-backed step generation.
///
/// The planning tool never sees the agent; callers that want LLM-generated
/// steps hand in something that can turn a prompt into text.
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Hook executing one plan step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute_step(&self, step: &str, cancel: &CancellationToken) -> Result<String>;
}

/// Default step executor: pauses briefly and reports success. Concrete
/// deployments delegate to an agent or a task runner.
pub struct SleepStepExecutor;

#[async_trait]
impl StepExecutor for SleepStepExecutor {
    async fn execute_step(&self, step: &str, _cancel: &CancellationToken) -> Result<String> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(format!("completed: {}", step))
    }
}

struct ActiveState {
    plan: Option<Plan>,
    last_result: Option<String>,
}

/// The planning tool
pub struct PlanningTool {
    plans_dir: PathBuf,
    generator: Option<Arc<dyn PlanGenerator>>,
    executor: Arc<dyn StepExecutor>,
    state: tokio::sync::Mutex<ActiveState>,
}

impl PlanningTool {
    /// Create a planning tool persisting under `plans_dir`.
    pub fn new(plans_dir: impl Into<PathBuf>) -> Self {
        PlanningTool {
            plans_dir: plans_dir.into(),
            generator: None,
            executor: Arc::new(SleepStepExecutor),
            state: tokio::sync::Mutex::new(ActiveState {
                plan: None,
                last_result: None,
            }),
        }
    }

    /// Attach an LLM-backed step generator.
    pub fn with_generator(mut self, generator: Arc<dyn PlanGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Replace the step-execution hook.
    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executor = executor;
        self
    }

    fn plan_path(&self, id: &str) -> PathBuf {
        self.plans_dir.join(format!("{}.json", id))
    }

    /// Atomically replace the persisted document: write to a temp file in
    /// the same directory, then rename over the target.
    async fn save_plan(&self, plan: &Plan) -> Result<()> {
        tokio::fs::create_dir_all(&self.plans_dir).await?;
        let path = self.plan_path(&plan.id);
        let tmp = self.plans_dir.join(format!("{}.json.tmp", plan.id));
        let body = serde_json::to_vec_pretty(plan)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(plan_id = %plan.id, "plan persisted");
        Ok(())
    }

    async fn load_plan(&self, id: &str) -> Result<Plan> {
        let path = self.plan_path(id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("plan '{}'", id)));
            }
            Err(e) => return Err(e.into()),
        };
        let plan: Plan = serde_json::from_str(&raw)
            .map_err(|e| Error::Execution(format!("plan '{}' is corrupt: {}", id, e)))?;
        if !plan.is_consistent() {
            return Err(Error::Execution(format!(
                "plan '{}' is corrupt: step arrays have mismatched lengths",
                id
            )));
        }
        Ok(plan)
    }

    async fn delete_plan(&self, id: &str) -> Result<()> {
        let path = self.plan_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("plan '{}'", id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_plans(&self) -> Result<Vec<Plan>> {
        let mut plans = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.plans_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(plans),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) => match serde_json::from_str::<Plan>(&raw) {
                    Ok(plan) => plans.push(plan),
                    Err(e) => warn!(path = %path.display(), "skipping unreadable plan: {}", e),
                },
                Err(e) => warn!(path = %path.display(), "skipping unreadable plan: {}", e),
            }
        }
        plans.sort_by_key(|p| p.created_at);
        Ok(plans)
    }

    /// Produce steps for a task: LLM generation when a generator is
    /// attached, a synthesized generic plan otherwise or on total failure.
    async fn generate_steps(&self, task: &str) -> Vec<String> {
        if let Some(ref generator) = self.generator {
            let prompt = format!(
                "Create a step-by-step plan for the following task. Respond with \
                 ONLY a JSON array of step strings, nothing else.\n\nTask: {}",
                task
            );
            match generator.generate(&prompt).await {
                Ok(text) => {
                    if let Some(steps) = parse_generated_steps(&text) {
                        return steps;
                    }
                    warn!("could not extract steps from generated text, using generic plan");
                }
                Err(e) => warn!("step generation failed: {}, using generic plan", e),
            }
        }
        fallback_steps(task)
    }

    // -- command handlers ----------------------------------------------

    async fn cmd_create(&self, args: &Value) -> Result<ToolResult> {
        let steps = match args.get("steps").and_then(|v| v.as_array()) {
            Some(raw) if !raw.is_empty() => raw
                .iter()
                .filter_map(step_description)
                .collect::<Vec<String>>(),
            _ => {
                let task = args
                    .get("task")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::Validation("create requires 'task' or 'steps'".into()))?;
                self.generate_steps(task).await
            }
        };
        if steps.is_empty() {
            return Err(Error::Validation("plan has no usable steps".into()));
        }

        let title = args
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| args.get("task").and_then(|v| v.as_str()).map(str::to_string));

        let plan = Plan::new(title, steps);
        self.save_plan(&plan).await?;
        info!(plan_id = %plan.id, steps = plan.steps.len(), "plan created");

        let summary = format!(
            "Created plan {} with {} steps:\n{}",
            plan.id,
            plan.steps.len(),
            numbered(&plan.steps)
        );
        let metadata = json!({"plan_id": plan.id, "total_steps": plan.steps.len()});

        let mut state = self.state.lock().await;
        state.plan = Some(plan);
        state.last_result = None;

        Ok(ToolResult::success(summary).with_metadata(metadata))
    }

    async fn cmd_load(&self, args: &Value) -> Result<ToolResult> {
        let id = required_str(args, "plan_id")?;
        let plan = self.load_plan(id).await?;
        let summary = format!(
            "Loaded plan {} ({} steps, next step {})",
            plan.id,
            plan.steps.len(),
            plan.current_step
        );
        let metadata = json!({"plan_id": plan.id, "current_step": plan.current_step});
        self.state.lock().await.plan = Some(plan);
        Ok(ToolResult::success(summary).with_metadata(metadata))
    }

    async fn cmd_save(&self) -> Result<ToolResult> {
        let state = self.state.lock().await;
        let plan = state
            .plan
            .as_ref()
            .ok_or_else(|| Error::Validation("no active plan to save".into()))?;
        self.save_plan(plan).await?;
        Ok(ToolResult::success(format!("Saved plan {}", plan.id)))
    }

    async fn cmd_list(&self) -> Result<ToolResult> {
        let plans = self.list_plans().await?;
        if plans.is_empty() {
            return Ok(ToolResult::success("No plans found."));
        }
        let mut out = format!("Found {} plan(s):\n", plans.len());
        for plan in &plans {
            out.push_str(&format!(
                "- {} [{} steps, at step {}]{} created {}\n",
                plan.id,
                plan.steps.len(),
                plan.current_step,
                plan.title
                    .as_deref()
                    .map(|t| format!(" \"{}\"", t))
                    .unwrap_or_default(),
                plan.created_at.to_rfc3339(),
            ));
        }
        Ok(ToolResult::success(out))
    }

    async fn cmd_delete(&self, args: &Value) -> Result<ToolResult> {
        let id = required_str(args, "plan_id")?;
        self.delete_plan(id).await?;
        let mut state = self.state.lock().await;
        if state.plan.as_ref().is_some_and(|p| p.id == id) {
            state.plan = None;
        }
        Ok(ToolResult::success(format!("Deleted plan {}", id)))
    }

    async fn cmd_validate(&self, args: &Value) -> Result<ToolResult> {
        let plan = match args.get("plan_id").and_then(|v| v.as_str()) {
            Some(id) => self.load_plan(id).await?,
            None => self
                .state
                .lock()
                .await
                .plan
                .clone()
                .ok_or_else(|| Error::Validation("no active plan to validate".into()))?,
        };

        let mut findings = Vec::new();
        if plan.steps.is_empty() {
            findings.push("error: plan has no steps".to_string());
        }
        for (i, step) in plan.steps.iter().enumerate() {
            if step.trim().is_empty() {
                findings.push(format!("error: step {} is empty", i));
            }
        }
        if !plan.steps.is_empty() && plan.steps.len() < MIN_RECOMMENDED_STEPS {
            findings.push(format!(
                "warning: only {} steps; consider breaking the task down further",
                plan.steps.len()
            ));
        }
        if plan.steps.len() > MAX_RECOMMENDED_STEPS {
            findings.push(format!(
                "warning: {} steps; consider consolidating",
                plan.steps.len()
            ));
        }

        let content = if findings.is_empty() {
            format!("Plan {} is valid ({} steps).", plan.id, plan.steps.len())
        } else {
            format!("Plan {} findings:\n{}", plan.id, findings.join("\n"))
        };
        Ok(ToolResult::success(content).with_metadata(json!({"findings": findings})))
    }

    async fn cmd_execute(&self, args: &Value, cancel: &CancellationToken) -> Result<ToolResult> {
        let mut state = self.state.lock().await;
        if let Some(id) = args.get("plan_id").and_then(|v| v.as_str()) {
            state.plan = Some(self.load_plan(id).await?);
        }
        let mut plan = state
            .plan
            .take()
            .ok_or_else(|| Error::Validation("no active plan to execute".into()))?;

        let total = plan.steps.len();
        let mut outcome = None;

        while plan.current_step < total {
            if cancel.is_cancelled() {
                outcome = Some(ToolResult::timeout(format!(
                    "plan execution cancelled at step {} of {}",
                    plan.current_step, total
                )));
                break;
            }

            let index = plan.current_step;
            plan.step_statuses[index] = StepStatus::InProgress;
            match self.executor.execute_step(&plan.steps[index], cancel).await {
                Ok(output) => {
                    plan.step_statuses[index] = StepStatus::Completed;
                    plan.step_notes[index] = output.clone();
                    plan.current_step = index + 1;
                    state.last_result = Some(output);
                    self.save_plan(&plan).await?;
                }
                Err(e) => {
                    plan.step_statuses[index] = StepStatus::Blocked;
                    plan.step_notes[index] = e.to_string();
                    plan.failed_step = Some(index);
                    state.last_result = Some(e.to_string());
                    self.save_plan(&plan).await?;
                    outcome = Some(
                        ToolResult::error(
                            ErrorKind::Execution,
                            format!(
                                "plan execution failed at step {} of {}: {}",
                                index, total, e
                            ),
                        )
                        .with_metadata(json!({
                            "completed_steps": index,
                            "total_steps": total,
                            "failed_step": index,
                        })),
                    );
                    break;
                }
            }
        }

        let outcome = outcome.unwrap_or_else(|| {
            ToolResult::success(format!(
                "Plan {} executed: {} of {} steps completed.",
                plan.id, plan.current_step, total
            ))
            .with_metadata(json!({
                "completed_steps": plan.current_step,
                "total_steps": total,
            }))
        });
        state.plan = Some(plan);
        Ok(outcome)
    }

    async fn cmd_execute_step(&self, cancel: &CancellationToken) -> Result<ToolResult> {
        let mut state = self.state.lock().await;
        let mut plan = state
            .plan
            .take()
            .ok_or_else(|| Error::Validation("no active plan".into()))?;

        if plan.is_complete() {
            let content = format!(
                "Plan {} is already complete ({} steps).",
                plan.id,
                plan.steps.len()
            );
            state.plan = Some(plan);
            return Ok(ToolResult::success(content));
        }

        let index = plan.current_step;
        let total = plan.steps.len();
        plan.step_statuses[index] = StepStatus::InProgress;

        let outcome = match self.executor.execute_step(&plan.steps[index], cancel).await {
            Ok(output) => {
                plan.step_statuses[index] = StepStatus::Completed;
                plan.step_notes[index] = output.clone();
                plan.current_step = index + 1;
                state.last_result = Some(output);
                self.save_plan(&plan).await?;
                let mut content = format!("Executed step {} of {}.", index + 1, total);
                if let Some(next) = plan.steps.get(index + 1) {
                    content.push_str(&format!(" Next: {}", next));
                }
                ToolResult::success(content).with_metadata(json!({
                    "step_index": index,
                    "next_step_index": if index + 1 < total { json!(index + 1) } else { Value::Null },
                }))
            }
            Err(e) => {
                plan.step_statuses[index] = StepStatus::Blocked;
                plan.step_notes[index] = e.to_string();
                plan.failed_step = Some(index);
                state.last_result = Some(e.to_string());
                self.save_plan(&plan).await?;
                ToolResult::error(
                    ErrorKind::Execution,
                    format!("step {} of {} failed: {}", index + 1, total, e),
                )
                .with_metadata(json!({"failed_step": index, "total_steps": total}))
            }
        };
        state.plan = Some(plan);
        Ok(outcome)
    }

    async fn cmd_get_status(&self) -> Result<ToolResult> {
        let state = self.state.lock().await;
        let plan = state
            .plan
            .as_ref()
            .ok_or_else(|| Error::Validation("no active plan".into()))?;
        let content = format!(
            "Plan {}: step {} of {}{}{}",
            plan.id,
            plan.current_step,
            plan.steps.len(),
            plan.failed_step
                .map(|i| format!(", failed at step {}", i))
                .unwrap_or_default(),
            state
                .last_result
                .as_deref()
                .map(|r| format!(", last result: {}", r))
                .unwrap_or_default(),
        );
        Ok(ToolResult::success(content).with_metadata(json!({
            "plan_id": plan.id,
            "current_step_index": plan.current_step,
            "total_steps": plan.steps.len(),
            "failed_step": plan.failed_step,
        })))
    }

    async fn cmd_reset(&self) -> Result<ToolResult> {
        let mut state = self.state.lock().await;
        let plan = state
            .plan
            .as_mut()
            .ok_or_else(|| Error::Validation("no active plan".into()))?;
        plan.current_step = 0;
        plan.failed_step = None;
        plan.step_statuses = vec![StepStatus::NotStarted; plan.steps.len()];
        plan.step_notes = vec![String::new(); plan.steps.len()];
        let snapshot = plan.clone();
        state.last_result = None;
        self.save_plan(&snapshot).await?;
        Ok(ToolResult::success(format!(
            "Plan {} reset to step 0.",
            snapshot.id
        )))
    }
}

#[async_trait]
impl Tool for PlanningTool {
    fn name(&self) -> &str {
        "planning"
    }

    fn description(&self) -> &str {
        "Create and manage durable plans for complex tasks: create steps, \
         execute them one at a time or all at once, track progress, and \
         resume a saved plan after a restart."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "enum": ["create", "load", "save", "list", "delete", "validate",
                             "execute", "execute_step", "get_status", "reset"],
                    "description": "The command to execute. Omit when passing 'task' to create a plan."
                },
                "task": {
                    "type": "string",
                    "description": "Task to plan for; steps are generated when none are given"
                },
                "title": {
                    "type": "string",
                    "description": "Title for the plan"
                },
                "steps": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Explicit plan steps (create command)"
                },
                "plan_id": {
                    "type": "string",
                    "description": "Plan identifier for load, delete, validate, and execute"
                }
            },
            "required": []
        })
    }

    fn aliases(&self) -> &[&str] {
        &["plan"]
    }

    fn stateful(&self) -> bool {
        true
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(120)
    }

    async fn run(&self, args: Value, cancel: CancellationToken) -> Result<ToolResult> {
        // `command` may be omitted when a bare task is given
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .or_else(|| args.get("task").map(|_| "create"))
            .ok_or_else(|| Error::Validation("missing 'command' argument".into()))?;

        let outcome = match command {
            "create" => self.cmd_create(&args).await,
            "load" => self.cmd_load(&args).await,
            "save" => self.cmd_save().await,
            "list" => self.cmd_list().await,
            "delete" => self.cmd_delete(&args).await,
            "validate" => self.cmd_validate(&args).await,
            "execute" => self.cmd_execute(&args, &cancel).await,
            "execute_step" => self.cmd_execute_step(&cancel).await,
            "get_status" => self.cmd_get_status().await,
            "reset" => self.cmd_reset().await,
            other => Err(Error::Validation(format!("unknown command '{}'", other))),
        };

        // Failures surface as tool results so the LLM can react
        match outcome {
            Ok(result) => Ok(result),
            Err(e) => Ok(ToolResult::error(e.kind(), e.to_string())),
        }
    }

    async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.plan = None;
        state.last_result = None;
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Validation(format!("missing '{}' argument", key)))
}

/// Extract a step description from either a plain string or a structured
/// `{description, tools}` object.
fn step_description(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => map
            .get("description")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string()),
        _ => None,
    }
}

static STEP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:Step\s+\d+\s*[:.]|\d+\s*[.)])\s*(.+?)\s*$").expect("invalid step regex")
});

/// Pull steps out of generated text: a JSON array first, then lines shaped
/// like "Step N: ..." or numbered lists.
fn parse_generated_steps(text: &str) -> Option<Vec<String>> {
    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if start < end {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&text[start..=end]) {
                let steps: Vec<String> = items.iter().filter_map(step_description).collect();
                if !steps.is_empty() {
                    return Some(steps);
                }
            }
        }
    }

    let steps: Vec<String> = STEP_LINE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect();
    if steps.is_empty() {
        None
    } else {
        Some(steps)
    }
}

/// Generic plan used when generation fails entirely; always executable.
fn fallback_steps(task: &str) -> Vec<String> {
    vec![
        format!("Analyze the task and gather context: {}", task),
        "Break the work into concrete actions and pick the tools to use".to_string(),
        "Carry out the actions, checking each result".to_string(),
        "Verify the outcome against the original task".to_string(),
        "Summarize what was done and report the result".to_string(),
    ]
}

fn numbered(steps: &[String]) -> String {
    steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::traits::ToolStatus;

    fn tool_in(dir: &tempfile::TempDir) -> PlanningTool {
        PlanningTool::new(dir.path())
    }

    async fn run(tool: &PlanningTool, args: Value) -> ToolResult {
        tool.run(args, CancellationToken::new()).await.unwrap()
    }

    fn plan_id(result: &ToolResult) -> String {
        result.metadata.as_ref().unwrap()["plan_id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn parses_json_array_steps() {
        let steps =
            parse_generated_steps(r#"Here is the plan: ["find sources", "read them"]"#).unwrap();
        assert_eq!(steps, vec!["find sources", "read them"]);
    }

    #[test]
    fn parses_numbered_lines() {
        let text = "Plan:\nStep 1: analyze the repo\nStep 2: write the fix\n3) run tests";
        let steps = parse_generated_steps(text).unwrap();
        assert_eq!(
            steps,
            vec!["analyze the repo", "write the fix", "run tests"]
        );
    }

    #[test]
    fn unparseable_text_yields_none() {
        assert!(parse_generated_steps("no structure here at all").is_none());
    }

    #[test]
    fn fallback_plan_is_executable() {
        let steps = fallback_steps("do a thing");
        assert!(steps.len() >= 3 && steps.len() <= 8);
        assert!(steps.iter().all(|s| !s.is_empty()));
    }

    #[tokio::test]
    async fn create_with_explicit_steps_persists() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(&dir);
        let result = run(
            &tool,
            json!({"command": "create", "steps": ["a", "b", "c"], "title": "t"}),
        )
        .await;
        assert!(result.is_success());
        let id = plan_id(&result);
        assert!(dir.path().join(format!("{}.json", id)).exists());
    }

    #[tokio::test]
    async fn bare_task_infers_create() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(&dir);
        // No generator attached: the synthesized generic plan is used
        let result = run(&tool, json!({"task": "ship the release"})).await;
        assert!(result.is_success());
        let status = run(&tool, json!({"command": "get_status"})).await;
        assert_eq!(status.metadata.unwrap()["current_step_index"], 0);
    }

    #[tokio::test]
    async fn save_load_roundtrip_preserves_plan() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(&dir);
        let created = run(&tool, json!({"command": "create", "steps": ["x", "y"]})).await;
        let id = plan_id(&created);

        let original = tool.load_plan(&id).await.unwrap();
        tool.save_plan(&original).await.unwrap();
        let reloaded = tool.load_plan(&id).await.unwrap();
        assert_eq!(original, reloaded);
        assert!(reloaded.is_consistent());
    }

    #[tokio::test]
    async fn execute_step_advances_and_resumes_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(&dir);
        let created = run(
            &tool,
            json!({"command": "create", "steps": ["s1", "s2", "s3", "s4", "s5"]}),
        )
        .await;
        let id = plan_id(&created);

        run(&tool, json!({"command": "execute_step"})).await;
        run(&tool, json!({"command": "execute_step"})).await;

        // Fresh tool instance simulates a new process
        let resumed = tool_in(&dir);
        run(&resumed, json!({"command": "load", "plan_id": id})).await;
        let status = run(&resumed, json!({"command": "get_status"})).await;
        let meta = status.metadata.unwrap();
        assert_eq!(meta["current_step_index"], 2);
        assert_eq!(meta["total_steps"], 5);
    }

    struct FailingExecutor {
        fail_at: usize,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl StepExecutor for FailingExecutor {
        async fn execute_step(&self, step: &str, _cancel: &CancellationToken) -> Result<String> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == self.fail_at {
                Err(Error::Execution(format!("cannot do '{}'", step)))
            } else {
                Ok(format!("did '{}'", step))
            }
        }
    }

    #[tokio::test]
    async fn execute_stops_at_first_failure_and_preserves_plan() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(&dir).with_executor(Arc::new(FailingExecutor {
            fail_at: 1,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }));
        let created = run(&tool, json!({"command": "create", "steps": ["a", "b", "c"]})).await;
        let id = plan_id(&created);

        let result = run(&tool, json!({"command": "execute"})).await;
        assert_eq!(result.status, ToolStatus::Error);
        let meta = result.metadata.unwrap();
        assert_eq!(meta["completed_steps"], 1);
        assert_eq!(meta["failed_step"], 1);

        // The persisted document reflects the failure without advancing
        let persisted = tool.load_plan(&id).await.unwrap();
        assert_eq!(persisted.current_step, 1);
        assert_eq!(persisted.failed_step, Some(1));
        assert_eq!(persisted.step_statuses[1], StepStatus::Blocked);
    }

    #[tokio::test]
    async fn reset_then_execute_reruns_from_step_zero() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(&dir);
        run(&tool, json!({"command": "create", "steps": ["a", "b"]})).await;
        run(&tool, json!({"command": "execute"})).await;
        run(&tool, json!({"command": "reset"})).await;

        let status = run(&tool, json!({"command": "get_status"})).await;
        assert_eq!(status.metadata.unwrap()["current_step_index"], 0);

        let result = run(&tool, json!({"command": "execute"})).await;
        assert!(result.is_success());
        assert_eq!(result.metadata.unwrap()["completed_steps"], 2);
    }

    #[tokio::test]
    async fn load_missing_plan_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(&dir);
        let result = run(&tool, json!({"command": "load", "plan_id": "nope"})).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn corrupt_plan_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let tool = tool_in(&dir);
        let result = run(&tool, json!({"command": "load", "plan_id": "bad"})).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.content.contains("corrupt"));
    }

    #[tokio::test]
    async fn validate_reports_findings() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(&dir);
        run(&tool, json!({"command": "create", "steps": ["only", "two"]})).await;
        let result = run(&tool, json!({"command": "validate"})).await;
        assert!(result.is_success());
        let findings = result.metadata.unwrap()["findings"].clone();
        assert!(findings.as_array().unwrap().iter().any(|f| f
            .as_str()
            .unwrap()
            .starts_with("warning")));
    }

    #[tokio::test]
    async fn delete_removes_document() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(&dir);
        let created = run(&tool, json!({"command": "create", "steps": ["a"]})).await;
        let id = plan_id(&created);
        run(&tool, json!({"command": "delete", "plan_id": id.clone()})).await;
        assert!(!dir.path().join(format!("{}.json", id)).exists());

        let again = run(&tool, json!({"command": "delete", "plan_id": id})).await;
        assert_eq!(again.error_kind, Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn list_enumerates_persisted_plans() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(&dir);
        run(&tool, json!({"command": "create", "steps": ["a"]})).await;
        run(&tool, json!({"command": "create", "steps": ["b"]})).await;
        let plans = tool.list_plans().await.unwrap();
        assert_eq!(plans.len(), 2);
        assert!(plans.iter().all(|p| p.is_consistent()));
    }
}
