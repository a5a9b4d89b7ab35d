//! todo_write：模型维护的待办清单
//!
//! 每次调用整体替换清单并回显统计；清单内容随工具结果进入 Transcript，因此续跑时无需单独持久化。

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{FieldType, ParameterSchema, Tool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoPriority {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: TodoPriority,
}

#[derive(Default)]
pub struct TodoWriteTool {
    items: Mutex<Vec<TodoItem>>,
}

impl TodoWriteTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<TodoItem> {
        self.items.lock().map(|i| i.clone()).unwrap_or_default()
    }

    fn render(items: &[TodoItem]) -> String {
        let mut out = String::from("Todos:\n");
        let (mut pending, mut active, mut done) = (0, 0, 0);
        for item in items {
            let mark = match item.status {
                TodoStatus::Pending => {
                    pending += 1;
                    "[ ]"
                }
                TodoStatus::InProgress => {
                    active += 1;
                    "[~]"
                }
                TodoStatus::Completed => {
                    done += 1;
                    "[x]"
                }
            };
            let priority = match item.priority {
                TodoPriority::High => " (high)",
                TodoPriority::Medium => "",
                TodoPriority::Low => " (low)",
            };
            out.push_str(&format!("  {mark} {}{priority}\n", item.content));
        }
        out.push_str(&format!(
            "Summary: {done} completed, {active} in progress, {pending} pending"
        ));
        out
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Replace the task todo list. Each item: {id, content, status: pending|in_progress|completed, priority: high|medium|low}."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new().required("todos", FieldType::Array, "The full todo list")
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let items: Vec<TodoItem> = serde_json::from_value(args["todos"].clone())
            .map_err(|e| format!("Invalid todos: {e}"))?;
        let rendered = Self::render(&items);
        let mut current = self
            .items
            .lock()
            .map_err(|_| "todo list lock poisoned".to_string())?;
        *current = items;
        Ok(rendered)
    }
}
