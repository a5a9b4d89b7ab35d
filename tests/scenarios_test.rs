//! 端到端场景：直接作答、模型回退、参数缺失、迭代上限、整链失败

mod common;

use std::sync::Arc;

use serde_json::json;
use swebee::core::{Outcome, StopKind, TaskOrchestrator, TaskStatus};
use swebee::llm::{FallbackCoordinator, FnLlmClient, LlmError, ModelError, ScriptedLlmClient};
use swebee::memory::{EntryRole, Message};

use common::{observations, runtime, task};

#[tokio::test]
async fn test_direct_answer_completes_in_one_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlmClient::new().with_responses("m1", [Ok("hello".to_string())]);
    let rt = runtime(Arc::new(llm), dir.path());
    let mut orch = TaskOrchestrator::new(task("echo hello", dir.path(), &["m1"], 10), rt).unwrap();

    assert_eq!(orch.run().await, Outcome::Completed);
    assert_eq!(orch.task().status, TaskStatus::Completed);
    assert_eq!(orch.task().iteration, 1);
    assert_eq!(orch.task().final_answer.as_deref(), Some("hello"));
    let roles: Vec<EntryRole> = orch.transcript().iter().map(|e| e.role).collect();
    assert_eq!(roles, vec![EntryRole::Task, EntryRole::Model]);
}

#[tokio::test]
async fn test_fatal_primary_falls_back_to_second_model() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .with_default("m1", Err(LlmError::auth("invalid api key")))
            .with_responses("m2", [Ok("finished".to_string())]),
    );
    let rt = runtime(llm.clone(), dir.path());
    let mut orch = TaskOrchestrator::new(task("do it", dir.path(), &["m1", "m2"], 5), rt).unwrap();

    assert_eq!(orch.run().await, Outcome::Completed);
    assert_eq!(orch.task().model_used.as_deref(), Some("m2"));
    // 鉴权错误不重试
    assert_eq!(llm.call_count("m1"), 1);
    assert_eq!(llm.call_count("m2"), 1);
}

#[tokio::test]
async fn test_missing_required_argument_is_shown_to_model() {
    let dir = tempfile::tempdir().unwrap();
    let llm = FnLlmClient::new(|_model: &str, messages: &[Message]| {
        let saw_error = messages
            .iter()
            .any(|m| m.content.contains("(error)") && m.content.contains("invalid arguments"));
        if saw_error {
            Ok("The read_file call needs a path.".to_string())
        } else {
            Ok(json!({"tool": "read_file", "args": {}}).to_string())
        }
    });
    let rt = runtime(Arc::new(llm), dir.path());
    let mut orch = TaskOrchestrator::new(task("read something", dir.path(), &["m1"], 5), rt).unwrap();

    assert_eq!(orch.advance().await, Outcome::Continue);
    assert_eq!(orch.task().status, TaskStatus::Running);
    let last = orch.transcript().last().unwrap();
    assert_eq!(last.role, EntryRole::ToolResult);
    let meta = last.tool_result.as_ref().unwrap();
    assert!(!meta.success);
    assert_eq!(meta.error_kind.as_deref(), Some("invalid_arguments"));
    assert!(last.content.contains("invalid arguments"));

    assert_eq!(orch.advance().await, Outcome::Completed);
    assert_eq!(orch.task().iteration, 2);
    assert_eq!(orch.progress().len(), 1);
    assert!(!orch.progress()[0].result.success);
}

#[tokio::test]
async fn test_iteration_ceiling_stops_after_second_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new().with_default(
        "m1",
        Ok(r#"{"tool": "list_directory", "args": {"path": "."}}"#.to_string()),
    ));
    let rt = runtime(llm.clone(), dir.path());
    let mut orch = TaskOrchestrator::new(task("loop forever", dir.path(), &["m1"], 2), rt).unwrap();

    assert_eq!(orch.advance().await, Outcome::Continue);
    assert_eq!(orch.advance().await, Outcome::Continue);
    assert_eq!(orch.advance().await, Outcome::Failed);

    assert_eq!(orch.task().iteration, 2);
    assert_eq!(llm.call_count("m1"), 2);
    let reason = orch.task().reason.as_ref().unwrap();
    assert_eq!(reason.kind, StopKind::IterationLimit);
    // 终态后再推进不会再请求模型
    assert_eq!(orch.advance().await, Outcome::Failed);
    assert_eq!(llm.call_count("m1"), 2);
}

#[tokio::test]
async fn test_all_models_fatal_reports_each_failure() {
    let dir = tempfile::tempdir().unwrap();
    let models = ["a", "b", "c"];
    let mut scripted = ScriptedLlmClient::new();
    for m in models {
        scripted = scripted.with_default(m, Err(LlmError::auth(format!("{m} rejected"))));
    }
    let llm = Arc::new(scripted);

    let coordinator = FallbackCoordinator::new(llm.clone(), common::no_delay_retry());
    let chain = task("x", dir.path(), &models, 1).model_chain;
    let err = coordinator
        .complete(&[Message::user("hi")], &chain)
        .await
        .unwrap_err();
    let ModelError::ChainExhausted(failures) = &err;
    assert_eq!(failures.len(), 3);
    let failed: Vec<&str> = failures.iter().map(|f| f.model.as_str()).collect();
    assert_eq!(failed, models);

    let rt = runtime(llm, dir.path());
    let mut orch = TaskOrchestrator::new(task("x", dir.path(), &models, 3), rt).unwrap();
    assert_eq!(orch.run().await, Outcome::Failed);
    let reason = orch.task().reason.as_ref().unwrap();
    assert_eq!(reason.kind, StopKind::ModelChainExhausted);
    assert_eq!(reason.details.len(), 3);
    assert!(reason.details[1].contains("b rejected"));
    // 模型没有应答，迭代不计数
    assert_eq!(orch.task().iteration, 0);
}

#[tokio::test]
async fn test_parallel_reads_append_in_request_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
    std::fs::write(dir.path().join("b.txt"), "beta").unwrap();
    let llm = FnLlmClient::new(|_model: &str, messages: &[Message]| {
        if observations(messages) == 0 {
            Ok(json!({"tool_calls": [
                {"tool": "read_file", "args": {"path": "a.txt"}},
                {"tool": "read_file", "args": {"path": "b.txt"}},
                {"tool": "glob_search", "args": {"pattern": "*.txt"}}
            ]})
            .to_string())
        } else {
            Ok("read both".to_string())
        }
    });
    let rt = runtime(Arc::new(llm), dir.path());
    let mut orch = TaskOrchestrator::new(task("read files", dir.path(), &["m1"], 5), rt).unwrap();
    assert_eq!(orch.run().await, Outcome::Completed);

    let results: Vec<_> = orch
        .transcript()
        .iter()
        .filter_map(|e| e.tool_result.as_ref())
        .collect();
    let ids: Vec<&str> = results.iter().map(|m| m.call_id.as_str()).collect();
    assert_eq!(ids, vec!["call_1_0", "call_1_1", "call_1_2"]);
    assert!(results.iter().all(|m| m.success));
    assert_eq!(orch.progress().len(), 3);
}
