//! 任务编排器：单个 Task 的状态机
//!
//! 每次 advance 最多推进一轮：检查终态、取消与迭代上限，必要时压缩上下文，请求一次补全，
//! 把回复解释为最终答案或工具调用，分发全部调用并等结果齐后按请求顺序写回，最后提交迭代并写 checkpoint。
//! advance 不返回 Err；失败经 RecoveryEngine 变成 Outcome 与 Task 上的停止原因。

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::core::spawner::{SubAgentSpawner, TASK_AGENT_TOOL};
use crate::core::{
    AgentError, ConfigError, Outcome, RecoveryAction, RecoveryEngine, StateError, StopKind,
    StopReason, Task, TaskScheduler, TaskStatus,
};
use crate::llm::FallbackCoordinator;
use crate::memory::{Checkpoint, CheckpointStore, ToolCallDescriptor, TranscriptEntry};
use crate::react::{
    build_system_prompt, correction_message, interpret, send_event, AgentEvent, CompactionPolicy,
    ContextManager, EventSender, LocalSummarizer, ModelSummarizer, ModelTurn, Planner,
    ProgressRecord, Summarizer, SummarizerKind,
};
use crate::tools::{InvocationResult, ToolCallRequest, ToolDescriptor, ToolDispatcher, ToolError};

/// 运行参数（来自配置）
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub compaction: CompactionPolicy,
    pub summarizer: SummarizerKind,
    /// 子 Agent 最大嵌套深度（根任务深度为 0）
    pub max_depth: u32,
    /// 子 Agent 未指定预算时的迭代上限
    pub sub_agent_iterations: u32,
    /// 同一轮内只读工具的并行上限
    pub max_parallel_tools: usize,
    /// 同一轮内子 Agent 的并行上限
    pub max_sub_agents: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            compaction: CompactionPolicy::default(),
            summarizer: SummarizerKind::Model,
            max_depth: 2,
            sub_agent_iterations: 8,
            max_parallel_tools: 3,
            max_sub_agents: 3,
        }
    }
}

/// 编排器共享的运行时句柄；子 Agent 拿到的是带子取消令牌的副本
#[derive(Clone)]
pub struct AgentRuntime {
    pub planner: Arc<Planner>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub scheduler: TaskScheduler,
    pub recovery: RecoveryEngine,
    pub settings: RuntimeSettings,
    pub events: Option<EventSender>,
    pub cancel: CancellationToken,
}

impl AgentRuntime {
    pub fn new(
        coordinator: Arc<FallbackCoordinator>,
        dispatcher: Arc<ToolDispatcher>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let settings = RuntimeSettings::default();
        Self {
            planner: Arc::new(Planner::new(coordinator)),
            dispatcher,
            checkpoints,
            scheduler: TaskScheduler::new(settings.max_parallel_tools),
            recovery: RecoveryEngine::new(),
            settings,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.scheduler = TaskScheduler::new(settings.max_parallel_tools);
        self.settings = settings;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 子任务运行时：父取消会传到子任务
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }
}

pub struct TaskOrchestrator {
    task: Task,
    context: ContextManager,
    progress: Vec<ProgressRecord>,
    runtime: AgentRuntime,
}

impl TaskOrchestrator {
    /// 新任务；在任何迭代开始前校验任务
    pub fn new(task: Task, runtime: AgentRuntime) -> Result<Self, ConfigError> {
        validate_task(&task)?;
        let context = ContextManager::new(runtime.settings.compaction);
        Ok(Self {
            task,
            context,
            progress: Vec::new(),
            runtime,
        })
    }

    /// 从 checkpoint 续跑：回到 INIT，在下一个迭代边界继续；已完成的任务保持完成
    pub fn resume(task_id: &str, runtime: AgentRuntime) -> Result<Self, AgentError> {
        let checkpoint = runtime.checkpoints.load(task_id)?;
        let mut task = checkpoint.task;
        validate_task(&task)?;
        if task.status != TaskStatus::Completed {
            task.reason = None;
            task.set_status(TaskStatus::Init);
        }
        tracing::info!(
            task_id = %task.id,
            iteration = task.iteration,
            entries = checkpoint.transcript.len(),
            "resuming task from checkpoint"
        );
        let context = ContextManager::from_entries(checkpoint.transcript, runtime.settings.compaction);
        Ok(Self {
            task,
            context,
            progress: checkpoint.progress,
            runtime,
        })
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        self.context.entries()
    }

    pub fn progress(&self) -> &[ProgressRecord] {
        &self.progress
    }

    /// 续跑前调整迭代上限（例如上限耗尽后放宽）
    pub fn set_max_iterations(&mut self, max_iterations: u32) -> Result<(), ConfigError> {
        if max_iterations == 0 {
            return Err(ConfigError::ZeroIterationCeiling);
        }
        self.task.max_iterations = max_iterations;
        Ok(())
    }

    /// 推进到终态
    pub async fn run(&mut self) -> Outcome {
        loop {
            let outcome = self.advance().await;
            if outcome.is_terminal() {
                return outcome;
            }
        }
    }

    /// 推进一轮
    pub async fn advance(&mut self) -> Outcome {
        match self.task.status {
            TaskStatus::Completed => return Outcome::Completed,
            TaskStatus::Failed => return Outcome::Failed,
            TaskStatus::Paused => return Outcome::Paused,
            _ => {}
        }

        if self.task.status == TaskStatus::Init {
            self.task.set_status(TaskStatus::Running);
            if self.context.is_empty() {
                self.context
                    .append(TranscriptEntry::task(self.task.description.clone(), 0));
            }
            if let Err(e) = self.save() {
                return self.stop(AgentError::State(e));
            }
        }

        if self.runtime.cancel.is_cancelled() {
            return self.stop(AgentError::Cancelled);
        }
        if self.task.iteration >= self.task.max_iterations {
            tracing::warn!(
                task_id = %self.task.id,
                ceiling = self.task.max_iterations,
                "iteration ceiling reached"
            );
            let reason = StopReason::iteration_limit(self.task.max_iterations);
            return self.terminate(TaskStatus::Failed, Some(reason));
        }

        let iteration = self.task.iteration + 1;
        tracing::info!(
            task_id = %self.task.id,
            iteration,
            max = self.task.max_iterations,
            depth = self.task.depth,
            "iteration started"
        );
        send_event(
            self.runtime.events.as_ref(),
            AgentEvent::IterationStarted {
                task_id: self.task.id.clone(),
                iteration,
                max_iterations: self.task.max_iterations,
            },
        );

        if self.context.needs_compaction() {
            self.compact().await;
        }

        let system = build_system_prompt(&self.task, &self.visible_tools());
        let messages = self.context.messages();
        let cancel = self.runtime.cancel.clone();
        let planned = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.runtime.planner.plan(&system, &messages, &self.task.model_chain) => Some(result),
        };
        let completion = match planned {
            None => return self.stop(AgentError::Cancelled),
            Some(Err(e)) => return self.stop(AgentError::Model(e)),
            Some(Ok(c)) => c,
        };
        self.task.model_used = Some(completion.model.clone());

        match interpret(&completion.content, iteration) {
            ModelTurn::FinalAnswer(answer) => {
                self.model_answered(&completion.model, 0);
                self.context
                    .append(TranscriptEntry::model(completion.content, Vec::new(), iteration));
                self.task.iteration = iteration;
                self.task.final_answer = Some(answer);
                tracing::info!(task_id = %self.task.id, iteration, model = %completion.model, "final answer");
                return self.terminate(TaskStatus::Completed, None);
            }
            ModelTurn::Malformed(detail) => {
                tracing::warn!(task_id = %self.task.id, iteration, detail = %detail, "malformed tool call");
                self.model_answered(&completion.model, 0);
                self.context
                    .append(TranscriptEntry::model(completion.content, Vec::new(), iteration));
                self.context
                    .append(TranscriptEntry::task(correction_message(&detail), iteration));
            }
            ModelTurn::ToolRequests(requests) => {
                self.model_answered(&completion.model, requests.len());
                let descriptors = requests
                    .iter()
                    .map(|r| ToolCallDescriptor {
                        call_id: r.id.clone(),
                        tool: r.name.clone(),
                        arguments: r.arguments.clone(),
                    })
                    .collect();
                self.context
                    .append(TranscriptEntry::model(completion.content, descriptors, iteration));

                self.task.set_status(TaskStatus::AwaitingToolResults);
                let results = self.dispatch_all(&requests).await;
                for dispatched in results {
                    let result = match dispatched {
                        Dispatched::Ran(result) => result,
                        Dispatched::Skipped(result) => {
                            // 未启动的调用只补结果条目与请求配对，不计入进度
                            self.context.append(result.to_entry(iteration));
                            continue;
                        }
                    };
                    self.context.append(result.to_entry(iteration));
                    let record = ProgressRecord::from_result(iteration, &result);
                    send_event(
                        self.runtime.events.as_ref(),
                        AgentEvent::Progress {
                            task_id: self.task.id.clone(),
                            record: record.clone(),
                        },
                    );
                    self.progress.push(record);
                }
                self.task.set_status(TaskStatus::Running);
            }
        }

        self.task.iteration = iteration;
        self.task.set_status(TaskStatus::Running);
        if let Err(e) = self.save() {
            return self.stop(AgentError::State(e));
        }
        Outcome::Continue
    }

    fn model_answered(&self, model: &str, tool_calls: usize) {
        send_event(
            self.runtime.events.as_ref(),
            AgentEvent::ModelAnswered {
                task_id: self.task.id.clone(),
                model: model.to_string(),
                tool_calls,
            },
        );
    }

    async fn compact(&mut self) {
        self.task.set_status(TaskStatus::Summarizing);
        let tokens_before = self.context.estimated_tokens();
        let summarizer: Box<dyn Summarizer> = match self.runtime.settings.summarizer {
            SummarizerKind::Local => Box::new(LocalSummarizer),
            SummarizerKind::Model => Box::new(ModelSummarizer::new(
                Arc::clone(self.runtime.planner.coordinator()),
                self.task.model_chain.clone(),
            )),
        };
        if let Some(summary) = self.context.maybe_compact(summarizer.as_ref()).await {
            send_event(
                self.runtime.events.as_ref(),
                AgentEvent::Compacted {
                    task_id: self.task.id.clone(),
                    entries_covered: summary.summary.map(|s| s.entries_covered).unwrap_or(0),
                    tokens_before,
                    tokens_after: self.context.estimated_tokens(),
                },
            );
        }
        self.task.set_status(TaskStatus::Running);
    }

    /// 本任务可见的工具（含 task_agent）
    fn visible_tools(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = self
            .runtime
            .dispatcher
            .registry()
            .visible_to(&self.task.capabilities)
            .cloned()
            .collect();
        if SubAgentSpawner::new(self.runtime.clone()).available_for(&self.task) {
            tools.push(SubAgentSpawner::descriptor());
        }
        tools
    }

    fn parallel_safe(&self, request: &ToolCallRequest) -> bool {
        request.name == TASK_AGENT_TOOL
            || self
                .runtime
                .dispatcher
                .registry()
                .descriptor(&request.name)
                .is_some_and(|d| d.read_only)
    }

    /// 分发一轮的全部调用，结果按请求顺序返回
    async fn dispatch_all(&self, requests: &[ToolCallRequest]) -> Vec<Dispatched> {
        let parallel = requests.len() > 1 && requests.iter().all(|r| self.parallel_safe(r));
        if !parallel {
            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                results.push(self.dispatch_one(request).await);
            }
            return results;
        }

        let width = if requests.iter().any(|r| r.name == TASK_AGENT_TOOL) {
            self.runtime.settings.max_sub_agents
        } else {
            self.runtime.settings.max_parallel_tools
        }
        .max(1);
        tracing::debug!(task_id = %self.task.id, calls = requests.len(), width, "parallel dispatch");
        // 先收集成 Vec：await 期间不能持有借用闭包（Send）
        let calls: Vec<_> = requests.iter().map(|r| self.dispatch_one(r)).collect();
        stream::iter(calls).buffered(width).collect().await
    }

    async fn dispatch_one(&self, request: &ToolCallRequest) -> Dispatched {
        // 取消后不再启动新的调用；已在执行的调用照常结束
        if self.runtime.cancel.is_cancelled() {
            tracing::debug!(task_id = %self.task.id, call_id = %request.id, "call skipped after cancel");
            return Dispatched::Skipped(InvocationResult::failed(
                request,
                ToolError::execution("not dispatched: task cancelled"),
                0,
            ));
        }
        send_event(
            self.runtime.events.as_ref(),
            AgentEvent::ToolCall {
                task_id: self.task.id.clone(),
                call_id: request.id.clone(),
                tool: request.name.clone(),
                args: request.arguments.clone(),
            },
        );
        if request.name == TASK_AGENT_TOOL {
            return Dispatched::Ran(
                SubAgentSpawner::new(self.runtime.clone())
                    .dispatch(&self.task, request)
                    .await,
            );
        }
        let _permit = self.runtime.scheduler.acquire_tool().await;
        Dispatched::Ran(
            self.runtime
                .dispatcher
                .dispatch(request, &self.task.capabilities)
                .await,
        )
    }

    fn save(&self) -> Result<(), StateError> {
        let checkpoint = Checkpoint::capture(&self.task, self.context.entries(), &self.progress);
        self.runtime.checkpoints.save(&checkpoint)?;
        send_event(
            self.runtime.events.as_ref(),
            AgentEvent::CheckpointSaved {
                task_id: self.task.id.clone(),
                iteration: self.task.iteration,
                status: self.task.status,
            },
        );
        Ok(())
    }

    /// 循环内错误 → 终止决定
    fn stop(&mut self, err: AgentError) -> Outcome {
        match self.runtime.recovery.handle(&err) {
            RecoveryAction::Fail(reason) => self.terminate(TaskStatus::Failed, Some(reason)),
            RecoveryAction::Pause(reason) => self.terminate(TaskStatus::Paused, Some(reason)),
        }
    }

    /// 进入终态并写最后一个 checkpoint
    fn terminate(&mut self, status: TaskStatus, reason: Option<StopReason>) -> Outcome {
        let outcome = match status {
            TaskStatus::Completed => Outcome::Completed,
            TaskStatus::Paused => Outcome::Paused,
            _ => Outcome::Failed,
        };
        let skip_save = reason
            .as_ref()
            .is_some_and(|r| r.kind == StopKind::CheckpointWrite);
        if let Some(reason) = &reason {
            tracing::warn!(task_id = %self.task.id, status = %status, reason = %reason, "task stopped");
        }
        self.task.reason = reason;
        self.task.set_status(status);
        if !skip_save {
            if let Err(e) = self.save() {
                tracing::error!(task_id = %self.task.id, error = %e, "final checkpoint write failed");
            }
        }
        tracing::info!(
            task_id = %self.task.id,
            status = %status,
            iterations = self.task.iteration,
            "task finished"
        );
        send_event(
            self.runtime.events.as_ref(),
            AgentEvent::finished(&self.task.id, status, self.task.iteration),
        );
        outcome
    }
}

/// 单个调用的分发结果
enum Dispatched {
    Ran(InvocationResult),
    /// 取消后未启动
    Skipped(InvocationResult),
}

fn validate_task(task: &Task) -> Result<(), ConfigError> {
    if task.description.trim().is_empty() {
        return Err(ConfigError::EmptyTask);
    }
    if task.max_iterations == 0 {
        return Err(ConfigError::ZeroIterationCeiling);
    }
    if !task.working_dir.is_dir() {
        return Err(ConfigError::MissingWorkingDir(task.working_dir.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ModelChain;
    use crate::llm::{FnLlmClient, LlmError, RetryPolicy, ScriptedLlmClient};
    use crate::memory::{EntryRole, InMemoryCheckpointStore};
    use crate::tools::{ReadFileTool, ToolRegistry};
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        task: Task,
        store: Arc<InMemoryCheckpointStore>,
    }

    fn fixture(max_iterations: u32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "alpha\nbeta\n").unwrap();
        let chain = ModelChain::new(vec!["m1".into()]).unwrap();
        let task = Task::new("inspect notes", dir.path().to_path_buf(), chain, max_iterations);
        Fixture {
            _dir: dir,
            task,
            store: Arc::new(InMemoryCheckpointStore::new()),
        }
    }

    fn runtime(fx: &Fixture, client: Arc<dyn crate::llm::LlmClient>) -> AgentRuntime {
        let mut registry = ToolRegistry::new();
        registry.register(ReadFileTool::new(&fx.task.working_dir)).unwrap();
        let dispatcher = Arc::new(ToolDispatcher::new(Arc::new(registry), Duration::from_secs(5)));
        let coordinator = Arc::new(FallbackCoordinator::new(client, RetryPolicy::immediate(0)));
        AgentRuntime::new(coordinator, dispatcher, fx.store.clone())
    }

    #[tokio::test]
    async fn test_tool_call_then_answer() {
        let fx = fixture(5);
        let client = Arc::new(ScriptedLlmClient::new().with_responses(
            "m1",
            vec![
                Ok(r#"{"tool": "read_file", "args": {"path": "notes.txt"}}"#.to_string()),
                Ok("notes contain alpha and beta".to_string()),
            ],
        ));
        let mut orch = TaskOrchestrator::new(fx.task.clone(), runtime(&fx, client)).unwrap();
        assert_eq!(orch.advance().await, Outcome::Continue);
        assert_eq!(orch.task().iteration, 1);
        assert_eq!(orch.transcript().len(), 3);
        assert_eq!(orch.transcript()[2].role, EntryRole::ToolResult);
        assert_eq!(orch.progress().len(), 1);

        assert_eq!(orch.advance().await, Outcome::Completed);
        assert_eq!(orch.task().final_answer.as_deref(), Some("notes contain alpha and beta"));
        // 终态后再 advance 不再请求模型
        assert_eq!(orch.advance().await, Outcome::Completed);

        let saved = fx.store.load(&orch.task().id).unwrap();
        assert_eq!(saved.task.status, TaskStatus::Completed);
        assert_eq!(saved.transcript.len(), 4);
        assert_eq!(saved.progress.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_corrected_not_fatal() {
        let fx = fixture(3);
        let client = Arc::new(ScriptedLlmClient::new().with_responses(
            "m1",
            vec![Ok("```json\n{oops\n```".to_string()), Ok("done".to_string())],
        ));
        let mut orch = TaskOrchestrator::new(fx.task.clone(), runtime(&fx, client)).unwrap();
        assert_eq!(orch.advance().await, Outcome::Continue);
        let last = orch.transcript().last().unwrap();
        assert_eq!(last.role, EntryRole::Task);
        assert!(last.content.contains("could not be used as a tool call"));
        assert_eq!(orch.run().await, Outcome::Completed);
        assert_eq!(orch.task().iteration, 2);
    }

    #[tokio::test]
    async fn test_chain_exhaustion_fails_task() {
        let fx = fixture(3);
        let client = Arc::new(FnLlmClient::new(|_, _| Err(LlmError::auth("bad key"))));
        let mut orch = TaskOrchestrator::new(fx.task.clone(), runtime(&fx, client)).unwrap();
        assert_eq!(orch.run().await, Outcome::Failed);
        let reason = orch.task().reason.clone().unwrap();
        assert_eq!(reason.kind, StopKind::ModelChainExhausted);
        assert_eq!(reason.details.len(), 1);
        assert_eq!(orch.task().iteration, 0);
    }

    #[tokio::test]
    async fn test_cancel_pauses_before_model_call() {
        let fx = fixture(3);
        let client = Arc::new(ScriptedLlmClient::new().with_default("m1", Ok("done".into())));
        let rt = runtime(&fx, client.clone());
        rt.cancel.cancel();
        let mut orch = TaskOrchestrator::new(fx.task.clone(), rt).unwrap();
        assert_eq!(orch.advance().await, Outcome::Paused);
        assert_eq!(orch.task().reason.as_ref().unwrap().kind, StopKind::Cancelled);
        assert!(client.calls().is_empty());
        assert_eq!(fx.store.load(&orch.task().id).unwrap().task.status, TaskStatus::Paused);
    }

    /// 执行时触发取消，模拟批次中途收到中断
    struct CancelNow(CancellationToken);

    #[async_trait::async_trait]
    impl crate::tools::Tool for CancelNow {
        fn name(&self) -> &str {
            "cancel_now"
        }
        fn description(&self) -> &str {
            "cancels the running task"
        }
        async fn execute(&self, _args: serde_json::Value) -> Result<String, String> {
            self.0.cancel();
            Ok("cancelled".to_string())
        }
    }

    #[tokio::test]
    async fn test_calls_skipped_after_cancel_leave_no_progress() {
        let fx = fixture(3);
        let cancel = CancellationToken::new();
        let mut registry = ToolRegistry::new();
        registry.register(ReadFileTool::new(&fx.task.working_dir)).unwrap();
        registry.register(CancelNow(cancel.clone())).unwrap();
        let dispatcher = Arc::new(ToolDispatcher::new(Arc::new(registry), Duration::from_secs(5)));
        let client = Arc::new(ScriptedLlmClient::new().with_responses(
            "m1",
            vec![Ok(r#"{"tool_calls": [
                {"id": "c1", "tool": "cancel_now", "args": {}},
                {"id": "c2", "tool": "read_file", "args": {"path": "notes.txt"}}
            ]}"#
            .to_string())],
        ));
        let coordinator = Arc::new(FallbackCoordinator::new(client, RetryPolicy::immediate(0)));
        let rt = AgentRuntime::new(coordinator, dispatcher, fx.store.clone())
            .with_cancel_token(cancel);
        let mut orch = TaskOrchestrator::new(fx.task.clone(), rt).unwrap();

        assert_eq!(orch.advance().await, Outcome::Continue);
        // 两个调用都有结果条目，但只有真正执行的那个进入进度
        let results: Vec<_> = orch
            .transcript()
            .iter()
            .filter(|e| e.role == EntryRole::ToolResult)
            .collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].content.contains("not dispatched"));
        assert_eq!(orch.progress().len(), 1);
        assert_eq!(orch.progress()[0].tool_name, "cancel_now");
        assert_eq!(fx.store.load(&orch.task().id).unwrap().progress.len(), 1);

        assert_eq!(orch.advance().await, Outcome::Paused);
    }

    #[tokio::test]
    async fn test_invalid_task_rejected_before_iterating() {
        let fx = fixture(0);
        let client = Arc::new(ScriptedLlmClient::new());
        assert!(matches!(
            TaskOrchestrator::new(fx.task.clone(), runtime(&fx, client)),
            Err(ConfigError::ZeroIterationCeiling)
        ));
    }
}
