//! 任务状态：Task 记录、状态机、模型链与单步结果
//!
//! Task 是编排循环唯一的可变状态载体；它和 Transcript 一起被写入 checkpoint，
//! 因此所有字段都必须可序列化且不含运行时句柄。

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::ConfigError;
use crate::tools::CapabilitySet;

/// 任务状态机
///
/// INIT → RUNNING ⇄ AWAITING_TOOL_RESULTS，RUNNING → SUMMARIZING → RUNNING；
/// COMPLETED / FAILED 为终态，PAUSED 可经 resume 回到 INIT。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Init,
    Running,
    AwaitingToolResults,
    Summarizing,
    Completed,
    Failed,
    Paused,
}

impl TaskStatus {
    /// 本次运行是否已停止推进
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::AwaitingToolResults => "awaiting_tool_results",
            Self::Summarizing => "summarizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// advance 一次的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Completed,
    Failed,
    Paused,
}

impl Outcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// 停止原因分类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    IterationLimit,
    ModelChainExhausted,
    Cancelled,
    CheckpointWrite,
    Configuration,
    /// 循环内出现、无法判断能否继续的其它错误
    Internal,
}

/// 附着在 Task 上的结构化停止原因（FAILED / PAUSED 时存在）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReason {
    pub kind: StopKind,
    pub message: String,
    /// 逐模型失败原因等补充信息
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl StopReason {
    pub fn new(kind: StopKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    pub fn iteration_limit(ceiling: u32) -> Self {
        Self::new(
            StopKind::IterationLimit,
            format!("iteration ceiling of {ceiling} reached without a final answer"),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(StopKind::Cancelled, "task cancelled by request")
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for detail in &self.details {
            write!(f, "\n  - {detail}")?;
        }
        Ok(())
    }
}

/// 有序、非空、无重复的模型链；第一个为首选模型
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ModelChain(Vec<String>);

impl ModelChain {
    pub fn new(models: Vec<String>) -> Result<Self, ConfigError> {
        let models: Vec<String> = models
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if models.is_empty() {
            return Err(ConfigError::EmptyModelChain);
        }
        let mut seen = HashSet::new();
        for model in &models {
            if !seen.insert(model.as_str()) {
                return Err(ConfigError::DuplicateModel(model.clone()));
            }
        }
        Ok(Self(models))
    }

    pub fn primary(&self) -> &str {
        &self.0[0]
    }

    pub fn models(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<String>> for ModelChain {
    type Error = ConfigError;

    fn try_from(models: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(models)
    }
}

impl From<ModelChain> for Vec<String> {
    fn from(chain: ModelChain) -> Self {
        chain.0
    }
}

/// 一次任务（或子任务）的完整记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "task_id")]
    pub id: String,
    pub description: String,
    pub working_dir: PathBuf,
    pub model_chain: ModelChain,
    pub iteration: u32,
    #[serde(rename = "iteration_ceiling")]
    pub max_iterations: u32,
    pub status: TaskStatus,
    /// 最近一次成功应答的模型
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub final_answer: Option<String>,
    #[serde(default)]
    pub reason: Option<StopReason>,
    /// 0 为根任务，子任务逐层 +1
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        description: impl Into<String>,
        working_dir: PathBuf,
        model_chain: ModelChain,
        max_iterations: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_task_id(),
            description: description.into(),
            working_dir,
            model_chain,
            iteration: 0,
            max_iterations,
            status: TaskStatus::Init,
            model_used: None,
            final_answer: None,
            reason: None,
            depth: 0,
            parent_id: None,
            capabilities: CapabilitySet::All,
            created_at: now,
            updated_at: now,
        }
    }

    /// 派生子任务：新 id、深度 +1、继承工作目录与模型链，仅保存父任务 id 作标注
    pub fn child(
        &self,
        description: impl Into<String>,
        capabilities: CapabilitySet,
        max_iterations: u32,
    ) -> Self {
        let mut child = Self::new(
            description,
            self.working_dir.clone(),
            self.model_chain.clone(),
            max_iterations,
        );
        child.depth = self.depth + 1;
        child.parent_id = Some(self.id.clone());
        child.capabilities = capabilities;
        child
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        if self.status != status {
            tracing::debug!(task_id = %self.id, from = %self.status, to = %status, "task status");
        }
        self.status = status;
        self.updated_at = Utc::now();
    }
}

fn new_task_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}
