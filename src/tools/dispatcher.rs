//! 工具分发器
//!
//! 对每个调用请求依次检查：工具是否存在、能力是否允许、参数是否合法；通过后在超时内执行。
//! 任何失败都归一成 InvocationResult 信封交还编排循环，每次调用输出一条结构化审计日志（JSON）。
//! 工具在独立 task 中运行，panic 只会变成一次 ExecutionFailed。超时取默认值与工具自报预算中较大者；
//! 超时后 task 被 abort 并等到它真正结束，工具持有的子进程随之被杀掉，结果写回之后不会再有副作用。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::{ToolResultMeta, TranscriptEntry};
use crate::tools::{CapabilitySet, ToolDescriptor, ToolError, ToolRegistry};

/// 模型请求的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// 一次调用的归一化结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub success: bool,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<ToolError>,
    pub duration_ms: u64,
}

impl InvocationResult {
    pub fn succeeded(request: &ToolCallRequest, output: String, duration_ms: u64) -> Self {
        Self {
            call_id: request.id.clone(),
            tool_name: request.name.clone(),
            arguments: request.arguments.clone(),
            success: true,
            output: Some(output),
            error: None,
            duration_ms,
        }
    }

    pub fn failed(request: &ToolCallRequest, error: ToolError, duration_ms: u64) -> Self {
        Self {
            call_id: request.id.clone(),
            tool_name: request.name.clone(),
            arguments: request.arguments.clone(),
            success: false,
            output: None,
            error: Some(error),
            duration_ms,
        }
    }

    /// 写入 Transcript 的正文
    pub fn content(&self) -> String {
        match (&self.output, &self.error) {
            (Some(out), _) if self.success => out.clone(),
            (_, Some(err)) => format!("Error: {err}"),
            _ => String::new(),
        }
    }

    pub fn to_entry(&self, iteration: u32) -> TranscriptEntry {
        TranscriptEntry::tool_result(
            self.content(),
            ToolResultMeta {
                call_id: self.call_id.clone(),
                tool: self.tool_name.clone(),
                arguments: self.arguments.clone(),
                success: self.success,
                error_kind: self.error.as_ref().map(|e| e.kind().to_string()),
            },
            iteration,
        )
    }
}

/// 工具分发器：持有只读注册表与统一超时
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 能力与参数检查；通过时返回补全默认值后的参数
    pub fn admit(
        descriptor: &ToolDescriptor,
        arguments: &Value,
        capabilities: &CapabilitySet,
    ) -> Result<Value, ToolError> {
        let missing = capabilities.missing(&descriptor.capability_tags);
        if !missing.is_empty() {
            return Err(ToolError::CapabilityDenied {
                tool: descriptor.name.clone(),
                missing,
            });
        }
        descriptor
            .parameters
            .validate(arguments)
            .map_err(|detail| ToolError::InvalidArguments { detail })
    }

    pub async fn dispatch(
        &self,
        request: &ToolCallRequest,
        capabilities: &CapabilitySet,
    ) -> InvocationResult {
        let start = Instant::now();
        let outcome = self.run(request, capabilities).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(output) => InvocationResult::succeeded(request, output, duration_ms),
            Err(err) => InvocationResult::failed(request, err, duration_ms),
        };
        audit(&result);
        result
    }

    async fn run(
        &self,
        request: &ToolCallRequest,
        capabilities: &CapabilitySet,
    ) -> Result<String, ToolError> {
        let (descriptor, tool) =
            self.registry
                .get(&request.name)
                .ok_or_else(|| ToolError::UnknownTool {
                    name: request.name.clone(),
                })?;
        let args = Self::admit(descriptor, &request.arguments, capabilities)?;

        let budget = tool
            .budget(&args)
            .map_or(self.timeout, |declared| declared.max(self.timeout));
        let mut handle = tokio::spawn(async move { tool.execute(args).await });
        match tokio::time::timeout(budget, &mut handle).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(message))) => Err(ToolError::ExecutionFailed { message }),
            Ok(Err(join_err)) if join_err.is_panic() => Err(ToolError::execution(format!(
                "tool {} panicked",
                request.name
            ))),
            Ok(Err(join_err)) => Err(ToolError::execution(join_err.to_string())),
            Err(_) => {
                handle.abort();
                // abort 之后 await 到 task 被丢弃为止
                let _ = handle.await;
                tracing::warn!(tool = %request.name, budget_ms = budget.as_millis() as u64, "tool call aborted after timeout");
                Err(ToolError::Timeout {
                    millis: budget.as_millis() as u64,
                })
            }
        }
    }
}

/// 结构化审计日志：每次调用一行 JSON
pub fn audit(result: &InvocationResult) {
    let outcome = result.error.as_ref().map(|e| e.kind()).unwrap_or("ok");
    let audit = serde_json::json!({
        "event": "tool_audit",
        "call_id": result.call_id,
        "tool": result.tool_name,
        "ok": result.success,
        "outcome": outcome,
        "duration_ms": result.duration_ms,
        "args_preview": args_preview(&result.arguments),
    });
    tracing::info!(audit = %audit, "tool");
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{capability, BashTool, FieldType, ParameterSchema, Tool};
    use async_trait::async_trait;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "uppercase text"
        }
        fn parameters(&self) -> ParameterSchema {
            ParameterSchema::new().required("text", FieldType::String, "text")
        }
        fn capability_tags(&self) -> &'static [&'static str] {
            &[capability::READ]
        }
        async fn execute(&self, args: Value) -> Result<String, String> {
            let text = args["text"].as_str().unwrap_or_default();
            if text == "boom" {
                panic!("boom");
            }
            if text == "fail" {
                return Err("refused".into());
            }
            if text == "slow" {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(text.to_uppercase())
        }
    }

    fn dispatcher() -> ToolDispatcher {
        let mut registry = ToolRegistry::new();
        registry.register(Upper).unwrap();
        ToolDispatcher::new(Arc::new(registry), Duration::from_millis(100))
    }

    fn call(name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1_0".into(),
            name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let result = dispatcher()
            .dispatch(&call("upper", json!({"text": "hi"})), &CapabilitySet::All)
            .await;
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("HI"));
        assert_eq!(result.call_id, "call_1_0");
    }

    #[tokio::test]
    async fn test_dispatch_failure_kinds() {
        let d = dispatcher();
        let all = CapabilitySet::All;

        let unknown = d.dispatch(&call("nope", json!({})), &all).await;
        assert!(matches!(unknown.error, Some(ToolError::UnknownTool { .. })));

        let denied = d
            .dispatch(&call("upper", json!({"text": "x"})), &CapabilitySet::only([capability::WRITE]))
            .await;
        assert!(matches!(denied.error, Some(ToolError::CapabilityDenied { .. })));

        let invalid = d.dispatch(&call("upper", json!({})), &all).await;
        match invalid.error {
            Some(ToolError::InvalidArguments { detail }) => assert!(detail.contains("text")),
            other => panic!("Expected InvalidArguments, got {other:?}"),
        }

        let failed = d.dispatch(&call("upper", json!({"text": "fail"})), &all).await;
        assert_eq!(
            failed.error,
            Some(ToolError::ExecutionFailed { message: "refused".into() })
        );

        let panicked = d.dispatch(&call("upper", json!({"text": "boom"})), &all).await;
        assert!(matches!(panicked.error, Some(ToolError::ExecutionFailed { .. })));

        let slow = d.dispatch(&call("upper", json!({"text": "slow"})), &all).await;
        assert_eq!(slow.error, Some(ToolError::Timeout { millis: 100 }));
        assert!(!slow.success);
    }

    /// 不声明预算的工具：子进程在 sleep 之后才写文件
    #[cfg(unix)]
    struct LateWriter {
        dir: std::path::PathBuf,
    }

    #[cfg(unix)]
    #[async_trait]
    impl Tool for LateWriter {
        fn name(&self) -> &str {
            "late_writer"
        }
        fn description(&self) -> &str {
            "writes late.txt after a second"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::process::Command::new("sh")
                .args(["-c", "sleep 1; touch late.txt"])
                .current_dir(&self.dir)
                .kill_on_drop(true)
                .output()
                .await
                .map(|_| "written".to_string())
                .map_err(|e| e.to_string())
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_call_leaves_no_late_side_effect() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ToolRegistry::new();
        registry
            .register(LateWriter {
                dir: dir.path().to_path_buf(),
            })
            .unwrap();
        let d = ToolDispatcher::new(Arc::new(registry), Duration::from_millis(200));

        let result = d.dispatch(&call("late_writer", json!({})), &CapabilitySet::All).await;
        assert_eq!(result.error, Some(ToolError::Timeout { millis: 200 }));
        assert!(result.content().contains("aborted"));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("late.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bash_budget_extends_dispatcher_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(BashTool::new(dir.path(), 30)).unwrap();
        let d = ToolDispatcher::new(Arc::new(registry), Duration::from_millis(200));

        let done = d
            .dispatch(
                &call("bash", json!({"command": "sleep 1; touch done.txt", "timeout": 5})),
                &CapabilitySet::All,
            )
            .await;
        assert!(done.success, "{:?}", done.error);
        assert!(dir.path().join("done.txt").exists());

        // bash 自己的超时先到：进程被杀，之后不会再写文件
        let cut = d
            .dispatch(
                &call("bash", json!({"command": "sleep 2; touch late.txt", "timeout": 1})),
                &CapabilitySet::All,
            )
            .await;
        assert!(!cut.success);
        assert!(cut.content().contains("timed out after 1s"));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!dir.path().join("late.txt").exists());
    }

    #[test]
    fn test_result_entry_carries_call_metadata() {
        let req = call("upper", json!({"text": "x"}));
        let entry = InvocationResult::failed(&req, ToolError::Timeout { millis: 5 }, 5).to_entry(3);
        let meta = entry.tool_result.as_ref().unwrap();
        assert_eq!(meta.call_id, "call_1_0");
        assert_eq!(meta.error_kind.as_deref(), Some("timeout"));
        assert_eq!(entry.content, "Error: timeout after 5ms (call aborted)");
        assert_eq!(entry.iteration, 3);
    }
}
