//! 错误恢复引擎
//!
//! 编排循环内的错误不会以 Err 形式离开 advance；这里把它们映射成终止决定：
//! 模型链耗尽与配置错误为 FAILED，取消、checkpoint 写入失败及其它无法判断的错误为 PAUSED（可续跑）。

use crate::core::{AgentError, StopKind, StopReason};

/// 恢复动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    Fail(StopReason),
    Pause(StopReason),
}

impl RecoveryAction {
    pub fn reason(&self) -> &StopReason {
        match self {
            Self::Fail(r) | Self::Pause(r) => r,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Model(model_err) => {
                let failures = model_err.failures();
                RecoveryAction::Fail(
                    StopReason::new(
                        StopKind::ModelChainExhausted,
                        format!("all {} model(s) in the chain failed", failures.len()),
                    )
                    .with_details(failures.iter().map(|f| f.to_string()).collect()),
                )
            }
            AgentError::Cancelled => RecoveryAction::Pause(StopReason::cancelled()),
            AgentError::State(e) => RecoveryAction::Pause(StopReason::new(
                StopKind::CheckpointWrite,
                format!("checkpoint write failed: {e}"),
            )),
            AgentError::Config(e) => {
                RecoveryAction::Fail(StopReason::new(StopKind::Configuration, e.to_string()))
            }
            AgentError::Tool(e) => {
                RecoveryAction::Pause(StopReason::new(StopKind::Internal, e.to_string()))
            }
        }
    }
}
