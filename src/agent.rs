//! 无界面 Agent 门面
//!
//! 由 AgentBuilder 组装；run_task 按配置新建或续跑任务，推进到终态后返回 TaskReport，
//! 并在开启进度跟踪时写出 Markdown 进度报告。checkpoint 只有 cleanup_task 会删除。

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{AgentConfig, AppConfig};
use crate::core::{
    AgentError, AgentRuntime, StateError, Task, TaskOrchestrator, TaskStatus, TASK_AGENT_TOOL,
};
use crate::memory::CheckpointStore;
use crate::observability::render_markdown;

/// 一次运行结束后的汇总
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub status: TaskStatus,
    pub iterations: u32,
    pub final_answer: Option<String>,
    /// FAILED / PAUSED 时的原因（含逐模型失败明细）
    pub failure: Option<String>,
    pub model_used: Option<String>,
    /// 按名称去重
    pub tools_used: Vec<String>,
    pub files_touched: Vec<String>,
    pub sub_agents_spawned: usize,
    pub resume_possible: bool,
    /// 本进程内 LLM 客户端累计的 token 用量
    pub tokens: TokenCounts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenCounts {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl From<(u64, u64, u64)> for TokenCounts {
    fn from((prompt, completion, total): (u64, u64, u64)) -> Self {
        Self {
            prompt,
            completion,
            total,
        }
    }
}

impl TaskReport {
    pub fn from_orchestrator(orchestrator: &TaskOrchestrator) -> Self {
        let task = orchestrator.task();
        let records = orchestrator.progress();
        let tools_used: BTreeSet<&str> = records.iter().map(|r| r.tool_name.as_str()).collect();
        let files_touched: BTreeSet<&str> = records
            .iter()
            .flat_map(|r| r.files.iter().map(String::as_str))
            .collect();
        Self {
            task_id: task.id.clone(),
            status: task.status,
            iterations: task.iteration,
            final_answer: task.final_answer.clone(),
            failure: task.reason.as_ref().map(ToString::to_string),
            model_used: task.model_used.clone(),
            tools_used: tools_used.into_iter().map(str::to_string).collect(),
            files_touched: files_touched.into_iter().map(str::to_string).collect(),
            sub_agents_spawned: records
                .iter()
                .filter(|r| r.tool_name == TASK_AGENT_TOOL)
                .count(),
            resume_possible: matches!(task.status, TaskStatus::Failed | TaskStatus::Paused),
            tokens: TokenCounts::default(),
        }
    }
}

/// 已保存任务的概览（`--list`）
#[derive(Debug, Clone, Serialize)]
pub struct TaskListing {
    pub task_id: String,
    pub status: Option<TaskStatus>,
    pub iterations: u32,
    pub max_iterations: u32,
    pub description: String,
    pub updated_at: Option<DateTime<Utc>>,
    /// checkpoint 无法读取时的原因
    pub problem: Option<String>,
}

impl TaskListing {
    fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            status: Some(task.status),
            iterations: task.iteration,
            max_iterations: task.max_iterations,
            description: task.description.clone(),
            updated_at: Some(task.updated_at),
            problem: None,
        }
    }

    fn unreadable(task_id: String, err: &StateError) -> Self {
        Self {
            task_id,
            status: None,
            iterations: 0,
            max_iterations: 0,
            description: String::new(),
            updated_at: None,
            problem: Some(err.to_string()),
        }
    }
}

pub struct Agent {
    app: AppConfig,
    config: AgentConfig,
    runtime: AgentRuntime,
}

impl Agent {
    pub(crate) fn new(app: AppConfig, config: AgentConfig, runtime: AgentRuntime) -> Self {
        Self {
            app,
            config,
            runtime,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    /// 按配置新建或续跑，但不推进
    pub fn start(&self) -> Result<TaskOrchestrator, AgentError> {
        match &self.config.resume_id {
            Some(task_id) => self.resume(task_id),
            None => {
                let task = Task::new(
                    self.config.task.clone(),
                    self.config.working_dir.clone(),
                    self.config.model_chain(&self.app)?,
                    self.config.iteration_ceiling(&self.app),
                );
                tracing::info!(
                    task_id = %task.id,
                    working_dir = %task.working_dir.display(),
                    models = ?task.model_chain.models(),
                    max_iterations = task.max_iterations,
                    "task created"
                );
                Ok(TaskOrchestrator::new(task, self.runtime.clone())?)
            }
        }
    }

    /// 从 checkpoint 续跑；配置中显式给出的迭代上限覆盖 checkpoint 里的值
    pub fn resume(&self, task_id: &str) -> Result<TaskOrchestrator, AgentError> {
        let mut orchestrator = TaskOrchestrator::resume(task_id, self.runtime.clone())?;
        if let Some(max_iterations) = self.config.max_iterations {
            orchestrator.set_max_iterations(max_iterations)?;
        }
        Ok(orchestrator)
    }

    pub async fn run_task(&self) -> Result<TaskReport, AgentError> {
        let mut orchestrator = self.start()?;
        self.drive(&mut orchestrator).await
    }

    pub async fn resume_task(&self, task_id: &str) -> Result<TaskReport, AgentError> {
        let mut orchestrator = self.resume(task_id)?;
        self.drive(&mut orchestrator).await
    }

    /// 推进到终态并写进度报告
    pub async fn drive(&self, orchestrator: &mut TaskOrchestrator) -> Result<TaskReport, AgentError> {
        let outcome = orchestrator.run().await;
        let mut report = TaskReport::from_orchestrator(orchestrator);
        report.tokens = self.runtime.planner.token_usage().into();
        tracing::info!(
            task_id = %report.task_id,
            ?outcome,
            iterations = report.iterations,
            total_tokens = report.tokens.total,
            "task stopped"
        );
        self.write_progress(orchestrator).await;
        Ok(report)
    }

    pub fn progress_path(&self) -> Option<PathBuf> {
        if !(self.app.progress.enabled && self.config.enable_progress) {
            return None;
        }
        Some(self.config.working_dir.join(&self.app.progress.file))
    }

    async fn write_progress(&self, orchestrator: &TaskOrchestrator) {
        let Some(path) = self.progress_path() else {
            return;
        };
        let markdown = render_markdown(orchestrator.task(), orchestrator.progress());
        if let Err(e) = tokio::fs::write(&path, markdown).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to write progress report");
        }
    }

    pub fn list_tasks(&self) -> Result<Vec<TaskListing>, AgentError> {
        Ok(list_tasks(self.runtime.checkpoints.as_ref())?)
    }

    pub fn cleanup_task(&self, task_id: &str) -> Result<(), AgentError> {
        Ok(cleanup_task(self.runtime.checkpoints.as_ref(), task_id)?)
    }
}

/// 已保存的任务；读不出来的 checkpoint 也列出，并附原因
pub fn list_tasks(store: &dyn CheckpointStore) -> Result<Vec<TaskListing>, StateError> {
    let ids = store.list()?;
    Ok(ids
        .into_iter()
        .map(|id| match store.load(&id) {
            Ok(checkpoint) => TaskListing::from_task(&checkpoint.task),
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "unreadable checkpoint");
                TaskListing::unreadable(id, &e)
            }
        })
        .collect())
}

/// 删除任务的 checkpoint；这是任务状态唯一的删除入口
pub fn cleanup_task(store: &dyn CheckpointStore, task_id: &str) -> Result<(), StateError> {
    store.remove(task_id)?;
    tracing::info!(task_id, "checkpoint removed");
    Ok(())
}
