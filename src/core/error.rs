//! 分层错误类型
//!
//! 每一层有自己的错误枚举（配置、状态持久化、模型、工具），AgentError 通过 `#[from]` 汇总；
//! 编排循环内部的错误一律经 RecoveryEngine 转成任务的终止原因，不会以 Err 形式冒出 advance。

use std::path::PathBuf;

use thiserror::Error;

pub use crate::llm::ModelError;
pub use crate::tools::ToolError;

/// 配置与任务校验错误；任务进入循环前即被拒绝
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("model chain is empty")]
    EmptyModelChain,

    #[error("duplicate model in chain: {0}")]
    DuplicateModel(String),

    #[error("working directory does not exist or is not a directory: {}", .0.display())]
    MissingWorkingDir(PathBuf),

    #[error("iteration ceiling must be at least 1")]
    ZeroIterationCeiling,

    #[error("task description is empty")]
    EmptyTask,

    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

/// Checkpoint 读写错误
#[derive(Error, Debug)]
pub enum StateError {
    #[error("no checkpoint for task {0}")]
    NotFound(String),

    #[error("invalid task id {0:?}: expected lowercase hex digits")]
    InvalidId(String),

    #[error("corrupt checkpoint for task {task_id}: {reason}")]
    Corrupt { task_id: String, reason: String },

    #[error("incompatible checkpoint for task {task_id}: {reason}")]
    Incompatible { task_id: String, reason: String },

    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Agent 顶层错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("task cancelled")]
    Cancelled,
}
