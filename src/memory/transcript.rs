//! Transcript：任务的只追加交互记录
//!
//! 四类条目：任务发起方（Task）、模型回复（Model）、工具结果（ToolResult）、压缩摘要（Summary）。
//! 发给模型前再投影成 System / User / Assistant 三种 wire 消息。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 发给模型的单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Transcript 条目角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRole {
    Task,
    Model,
    ToolResult,
    Summary,
}

/// 模型请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDescriptor {
    pub call_id: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

/// 工具结果条目的来源调用与成败
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultMeta {
    pub call_id: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    pub success: bool,
    /// 失败分类（unknown_tool / capability_denied / invalid_arguments / execution_failed / timeout）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

/// 摘要覆盖的范围
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryMeta {
    /// 被替换的原始条目数（嵌套摘要按其覆盖数累计）
    pub entries_covered: usize,
    pub first_iteration: u32,
    pub last_iteration: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: EntryRole,
    pub content: String,
    /// 产生该条目的迭代序号（0 为任务描述）
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResultMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryMeta>,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    fn base(role: EntryRole, content: String, iteration: u32) -> Self {
        Self {
            role,
            content,
            iteration,
            tool_calls: Vec::new(),
            tool_result: None,
            summary: None,
            timestamp: Utc::now(),
        }
    }

    pub fn task(content: impl Into<String>, iteration: u32) -> Self {
        Self::base(EntryRole::Task, content.into(), iteration)
    }

    pub fn model(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallDescriptor>,
        iteration: u32,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::base(EntryRole::Model, content.into(), iteration)
        }
    }

    pub fn tool_result(content: impl Into<String>, meta: ToolResultMeta, iteration: u32) -> Self {
        Self {
            tool_result: Some(meta),
            ..Self::base(EntryRole::ToolResult, content.into(), iteration)
        }
    }

    pub fn summary(content: impl Into<String>, meta: SummaryMeta, iteration: u32) -> Self {
        Self {
            summary: Some(meta),
            ..Self::base(EntryRole::Summary, content.into(), iteration)
        }
    }

    pub fn is_failed_tool_result(&self) -> bool {
        self.tool_result.as_ref().is_some_and(|m| !m.success)
    }

    /// 与时间戳无关的内容比较（续跑确定性校验用）
    pub fn same_content(&self, other: &Self) -> bool {
        self.role == other.role
            && self.content == other.content
            && self.iteration == other.iteration
            && self.tool_calls == other.tool_calls
            && self.tool_result == other.tool_result
            && self.summary == other.summary
    }

    /// 投影为发给模型的消息
    pub fn to_message(&self) -> Message {
        match self.role {
            EntryRole::Task => Message::user(self.content.clone()),
            EntryRole::Model => Message::assistant(self.content.clone()),
            EntryRole::ToolResult => {
                let (tool, call_id, status) = match &self.tool_result {
                    Some(m) => (
                        m.tool.as_str(),
                        m.call_id.as_str(),
                        if m.success { "ok" } else { "error" },
                    ),
                    None => ("unknown", "-", "ok"),
                };
                Message::user(format!(
                    "Observation from {tool} [{call_id}] ({status}):\n{}",
                    self.content
                ))
            }
            EntryRole::Summary => Message::user(format!(
                "Summary of earlier progress (older history was compacted):\n{}",
                self.content
            )),
        }
    }
}
