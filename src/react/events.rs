//! 编排过程事件：迭代、模型应答、工具调用、压缩、checkpoint、子 Agent
//!
//! 通过可选的无界通道推送给调用方（CLI 进度输出、测试断言）；通道关闭不影响循环。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::{Outcome, TaskStatus};
use crate::tools::InvocationResult;

/// 每个已分发动作一条进度记录（随 checkpoint 保存）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub iteration: u32,
    /// 人类可读的动作概述
    pub action: String,
    pub tool_name: String,
    pub parameters: Value,
    pub result: InvocationResult,
    /// 本动作涉及的文件（工作区相对路径）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ProgressRecord {
    pub fn from_result(iteration: u32, result: &InvocationResult) -> Self {
        Self {
            iteration,
            action: describe_action(&result.tool_name, &result.arguments),
            tool_name: result.tool_name.clone(),
            parameters: result.arguments.clone(),
            result: result.clone(),
            files: touched_files(&result.tool_name, &result.arguments),
            timestamp: Utc::now(),
            duration_ms: result.duration_ms,
        }
    }
}

/// 单步过程事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    IterationStarted {
        task_id: String,
        iteration: u32,
        max_iterations: u32,
    },
    ModelAnswered {
        task_id: String,
        model: String,
        tool_calls: usize,
    },
    ToolCall {
        task_id: String,
        call_id: String,
        tool: String,
        args: Value,
    },
    Progress {
        task_id: String,
        record: ProgressRecord,
    },
    Compacted {
        task_id: String,
        entries_covered: usize,
        tokens_before: usize,
        tokens_after: usize,
    },
    CheckpointSaved {
        task_id: String,
        iteration: u32,
        status: TaskStatus,
    },
    SubAgentSpawned {
        parent_id: String,
        child_id: String,
        depth: u32,
    },
    SubAgentFinished {
        parent_id: String,
        child_id: String,
        status: TaskStatus,
    },
    Finished {
        task_id: String,
        status: TaskStatus,
        iterations: u32,
    },
}

pub type EventSender = mpsc::UnboundedSender<AgentEvent>;

pub fn send_event(tx: Option<&EventSender>, event: AgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(event);
    }
}

impl AgentEvent {
    pub fn finished(task_id: &str, status: TaskStatus, iterations: u32) -> Self {
        Self::Finished {
            task_id: task_id.to_string(),
            status,
            iterations,
        }
    }
}

/// Outcome 对应的任务状态（终态事件用）
pub fn outcome_status(outcome: Outcome) -> TaskStatus {
    match outcome {
        Outcome::Continue => TaskStatus::Running,
        Outcome::Completed => TaskStatus::Completed,
        Outcome::Failed => TaskStatus::Failed,
        Outcome::Paused => TaskStatus::Paused,
    }
}

/// 动作概述：工具名 + 最有代表性的参数
pub fn describe_action(tool: &str, args: &Value) -> String {
    let s = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or("");
    match tool {
        "read_file" => format!("Read {}", s("path")),
        "list_directory" => format!("List {}", s("path")),
        "str_replace_editor" => format!("{} {}", capitalize(s("command")), s("path")),
        "glob_search" => format!("Find files matching {}", s("pattern")),
        "grep_search" => format!("Search for '{}' in {}", s("pattern"), s("path")),
        "bash" => format!("Run `{}`", short(s("command"), 80)),
        "web_fetch" => format!("Fetch {}", s("url")),
        "notebook_edit" => format!("Notebook {} {}", s("command"), s("path")),
        "todo_write" => "Update todo list".to_string(),
        "task_agent" => format!("Delegate: {}", short(s("description"), 80)),
        other => format!("Call {other}"),
    }
}

/// 工具参数里指向的文件（仅文件类工具）
pub fn touched_files(tool: &str, args: &Value) -> Vec<String> {
    match tool {
        "read_file" | "str_replace_editor" | "notebook_edit" => args
            .get("path")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(|p| vec![p.to_string()])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Edit".to_string(),
    }
}

fn short(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max).collect::<String>())
    }
}
