//! Plan persistence and resume behavior across tool instances.

use std::sync::Arc;

use async_trait::async_trait;
use kestrel::{Plan, PlanGenerator, PlanningTool, Result, Tool, ToolStatus};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

async fn run(tool: &PlanningTool, args: Value) -> kestrel::ToolResult {
    tool.run(args, CancellationToken::new()).await.unwrap()
}

fn plan_id(result: &kestrel::ToolResult) -> String {
    result.metadata.as_ref().unwrap()["plan_id"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn execute_twice_then_resume_in_new_instance() {
    let dir = tempfile::tempdir().unwrap();
    let tool = PlanningTool::new(dir.path());

    let created = run(
        &tool,
        json!({"command": "create", "steps": ["s1", "s2", "s3", "s4", "s5"]}),
    )
    .await;
    assert!(created.is_success());
    let id = plan_id(&created);

    run(&tool, json!({"command": "execute_step"})).await;
    run(&tool, json!({"command": "execute_step"})).await;
    drop(tool);

    // A fresh instance stands in for a new process
    let resumed = PlanningTool::new(dir.path());
    let loaded = run(&resumed, json!({"command": "load", "plan_id": id})).await;
    assert!(loaded.is_success());

    let status = run(&resumed, json!({"command": "get_status"})).await;
    let meta = status.metadata.unwrap();
    assert_eq!(meta["current_step_index"], 2);
    assert_eq!(meta["total_steps"], 5);
    assert_eq!(meta["failed_step"], Value::Null);
}

#[tokio::test]
async fn persisted_document_roundtrips_byte_for_byte() {
    let dir = tempfile::tempdir().unwrap();
    let tool = PlanningTool::new(dir.path());

    let created = run(
        &tool,
        json!({"command": "create", "steps": ["alpha", "beta"], "title": "roundtrip"}),
    )
    .await;
    let id = plan_id(&created);
    let path = dir.path().join(format!("{}.json", id));

    let first = std::fs::read_to_string(&path).unwrap();
    let parsed: Plan = serde_json::from_str(&first).unwrap();

    // save the loaded plan again and compare serializations
    run(&tool, json!({"command": "save"})).await;
    let second = std::fs::read_to_string(&path).unwrap();
    assert_eq!(first, second);

    let reparsed: Plan = serde_json::from_str(&second).unwrap();
    assert_eq!(parsed, reparsed);
}

#[tokio::test]
async fn no_temp_files_left_behind_after_saves() {
    let dir = tempfile::tempdir().unwrap();
    let tool = PlanningTool::new(dir.path());

    run(&tool, json!({"command": "create", "steps": ["a", "b", "c"]})).await;
    run(&tool, json!({"command": "execute"})).await;

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

struct StubGenerator {
    text: &'static str,
}

#[async_trait]
impl PlanGenerator for StubGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok(self.text.to_string())
    }
}

#[tokio::test]
async fn generated_steps_are_parsed_from_json_array() {
    let dir = tempfile::tempdir().unwrap();
    let tool = PlanningTool::new(dir.path()).with_generator(Arc::new(StubGenerator {
        text: r#"Sure! ["inspect the logs", "find the regression", "write a fix"]"#,
    }));

    let created = run(&tool, json!({"task": "fix the bug"})).await;
    assert!(created.is_success());
    assert_eq!(created.metadata.unwrap()["total_steps"], 3);
}

#[tokio::test]
async fn unparseable_generation_falls_back_to_generic_plan() {
    let dir = tempfile::tempdir().unwrap();
    let tool = PlanningTool::new(dir.path()).with_generator(Arc::new(StubGenerator {
        text: "I cannot produce a plan right now.",
    }));

    let created = run(&tool, json!({"task": "do something"})).await;
    // The caller always receives something executable
    assert!(created.is_success());
    let total = created.metadata.unwrap()["total_steps"].as_u64().unwrap();
    assert!((3..=8).contains(&total));
}

#[tokio::test]
async fn plan_arrays_stay_parallel_through_mutations() {
    let dir = tempfile::tempdir().unwrap();
    let tool = PlanningTool::new(dir.path());
    let created = run(&tool, json!({"command": "create", "steps": ["a", "b", "c"]})).await;
    let id = plan_id(&created);

    run(&tool, json!({"command": "execute_step"})).await;
    run(&tool, json!({"command": "reset"})).await;
    run(&tool, json!({"command": "execute"})).await;

    let raw = std::fs::read_to_string(dir.path().join(format!("{}.json", id))).unwrap();
    let plan: Plan = serde_json::from_str(&raw).unwrap();
    assert!(plan.is_consistent());
    assert_eq!(plan.current_step, 3);
}

#[tokio::test]
async fn unknown_command_is_reported_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let tool = PlanningTool::new(dir.path());
    let result = run(&tool, json!({"command": "explode"})).await;
    assert_eq!(result.status, ToolStatus::Error);
    assert!(result.content.contains("unknown command"));
}
