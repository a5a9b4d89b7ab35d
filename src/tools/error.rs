use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 工具调用失败的分类；分发器把它装进 InvocationResult，而不是向上抛出
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolError {
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("capability denied for {tool}: missing {}", .missing.join(", "))]
    CapabilityDenied { tool: String, missing: Vec<String> },

    #[error("invalid arguments: {detail}")]
    InvalidArguments { detail: String },

    #[error("execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("timeout after {millis}ms (call aborted)")]
    Timeout { millis: u64 },
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool { .. } => "unknown_tool",
            Self::CapabilityDenied { .. } => "capability_denied",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::Timeout { .. } => "timeout",
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }
}
