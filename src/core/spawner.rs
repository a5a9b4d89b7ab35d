//! 子 Agent 派生
//!
//! `task_agent` 不在工具注册表里：由编排循环识别后交给这里。子任务拥有独立 id、Transcript 与 checkpoint，
//! 只从父任务拷贝工作目录与模型链；能力集合取父集合与请求集合的交集。父任务等待子任务结束，
//! 把结果当作一条工具结果写回自己的 Transcript。子任务不持有父任务的任何引用。

use std::time::Instant;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::core::{AgentError, AgentRuntime, StopReason, Task, TaskOrchestrator, TaskStatus};
use crate::react::{send_event, AgentEvent};
use crate::tools::dispatcher::audit;
use crate::tools::{
    capability, CapabilitySet, FieldType, InvocationResult, ParameterSchema, ToolCallRequest,
    ToolDescriptor, ToolDispatcher, ToolError,
};

pub const TASK_AGENT_TOOL: &str = "task_agent";

/// 子任务请求
#[derive(Debug, Clone, PartialEq)]
pub struct SubTaskSpec {
    pub description: String,
    pub prompt: String,
    /// None 表示继承父任务能力
    pub capabilities: Option<CapabilitySet>,
    pub max_iterations: Option<u32>,
}

impl SubTaskSpec {
    /// 从已校验的 task_agent 参数中解析
    pub fn from_args(args: &Value) -> Result<Self, ToolError> {
        let text = |key: &str| {
            args.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        let capabilities = match args.get("capabilities") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => {
                let mut tags = Vec::with_capacity(items.len());
                for item in items {
                    let tag = item.as_str().ok_or_else(|| ToolError::InvalidArguments {
                        detail: "field 'capabilities' must contain strings".to_string(),
                    })?;
                    tags.push(tag.to_string());
                }
                Some(CapabilitySet::only(tags))
            }
            Some(_) => {
                return Err(ToolError::InvalidArguments {
                    detail: "field 'capabilities' expected array".to_string(),
                })
            }
        };
        let max_iterations = args
            .get("max_iterations")
            .and_then(Value::as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32);
        Ok(Self {
            description: text("description"),
            prompt: text("prompt"),
            capabilities,
            max_iterations,
        })
    }

    fn task_text(&self) -> String {
        match (self.description.is_empty(), self.prompt.is_empty()) {
            (false, false) => format!("{}\n\n{}", self.description, self.prompt),
            (true, _) => self.prompt.clone(),
            (false, true) => self.description.clone(),
        }
    }
}

/// 子任务的终态
#[derive(Debug, Clone)]
pub struct SubAgentResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub iterations: u32,
    pub final_answer: Option<String>,
    pub reason: Option<StopReason>,
    pub model_used: Option<String>,
}

impl SubAgentResult {
    fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            iterations: task.iteration,
            final_answer: task.final_answer.clone(),
            reason: task.reason.clone(),
            model_used: task.model_used.clone(),
        }
    }

    /// 完成时为工具输出，否则为携带子任务失败原因的执行错误
    pub fn into_output(self) -> Result<String, ToolError> {
        if self.status == TaskStatus::Completed {
            return Ok(format!(
                "Sub-agent {} completed in {} iterations:\n{}",
                self.task_id,
                self.iterations,
                self.final_answer.unwrap_or_default()
            ));
        }
        let reason = self
            .reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "no reason recorded".to_string());
        Err(ToolError::execution(format!(
            "Sub-agent {} ended {} after {} iterations: {}",
            self.task_id, self.status, self.iterations, reason
        )))
    }
}

pub struct SubAgentSpawner {
    runtime: AgentRuntime,
}

impl SubAgentSpawner {
    pub fn new(runtime: AgentRuntime) -> Self {
        Self { runtime }
    }

    /// 提供给模型的 task_agent 描述
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: TASK_AGENT_TOOL.to_string(),
            description: "Delegate a self-contained subtask to a sub-agent with its own iteration budget. \
                          It works in the same directory and returns its final answer."
                .to_string(),
            parameters: ParameterSchema::new()
                .required("description", FieldType::String, "Short name of the subtask")
                .required("prompt", FieldType::String, "Full instructions for the sub-agent")
                .optional(
                    "capabilities",
                    FieldType::Array,
                    "Capability tags the sub-agent may use (read, write, process, network, delegate); default inherits yours",
                )
                .optional("max_iterations", FieldType::Integer, "Iteration budget for the sub-agent"),
            capability_tags: [capability::DELEGATE.to_string()].into_iter().collect(),
            read_only: false,
        }
    }

    /// 该任务是否还能再派生子任务
    pub fn available_for(&self, parent: &Task) -> bool {
        parent.depth < self.runtime.settings.max_depth
            && parent.capabilities.contains(capability::DELEGATE)
    }

    /// 启动一个子任务并等待其终态
    pub fn spawn(
        &self,
        parent: &Task,
        spec: SubTaskSpec,
    ) -> BoxFuture<'static, Result<SubAgentResult, AgentError>> {
        let runtime = self.runtime.child();
        let capabilities = parent.capabilities.narrow(spec.capabilities.as_ref());
        let budget = spec
            .max_iterations
            .unwrap_or(self.runtime.settings.sub_agent_iterations)
            .clamp(1, parent.max_iterations.max(1));
        let child = parent.child(spec.task_text(), capabilities, budget);

        async move {
            let parent_id = child.parent_id.clone().unwrap_or_default();
            let events = runtime.events.clone();
            let mut orchestrator = TaskOrchestrator::new(child, runtime)?;
            let child_id = orchestrator.task().id.clone();
            tracing::info!(
                parent_id = %parent_id,
                child_id = %child_id,
                depth = orchestrator.task().depth,
                budget,
                "sub-agent spawned"
            );
            send_event(
                events.as_ref(),
                AgentEvent::SubAgentSpawned {
                    parent_id: parent_id.clone(),
                    child_id: child_id.clone(),
                    depth: orchestrator.task().depth,
                },
            );

            orchestrator.run().await;
            let result = SubAgentResult::from_task(orchestrator.task());
            tracing::info!(
                parent_id = %parent_id,
                child_id = %child_id,
                status = %result.status,
                iterations = result.iterations,
                "sub-agent finished"
            );
            send_event(
                events.as_ref(),
                AgentEvent::SubAgentFinished {
                    parent_id,
                    child_id,
                    status: result.status,
                },
            );
            Ok(result)
        }
        .boxed()
    }

    /// 处理一次 task_agent 调用，结果归一成 InvocationResult
    pub async fn dispatch(&self, parent: &Task, request: &ToolCallRequest) -> InvocationResult {
        let start = Instant::now();
        let outcome = self.run(parent, request).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(output) => InvocationResult::succeeded(request, output, duration_ms),
            Err(err) => InvocationResult::failed(request, err, duration_ms),
        };
        audit(&result);
        result
    }

    async fn run(&self, parent: &Task, request: &ToolCallRequest) -> Result<String, ToolError> {
        let args = ToolDispatcher::admit(&Self::descriptor(), &request.arguments, &parent.capabilities)?;
        let max_depth = self.runtime.settings.max_depth;
        if parent.depth >= max_depth {
            return Err(ToolError::execution(format!(
                "sub-agent depth limit of {max_depth} reached"
            )));
        }
        let spec = SubTaskSpec::from_args(&args)?;
        self.spawn(parent, spec)
            .await
            .map_err(|e| ToolError::execution(format!("sub-agent could not start: {e}")))?
            .into_output()
    }
}
