//! Planner：system prompt 组装、调用模型链、把回复解释为最终答案或工具调用
//!
//! 文本协议：纯文本为最终答案；`{"tool": .., "args": {..}}` 或 `{"tool_calls": [..]}`（可放在 ```json 块里）为工具调用。
//! 只有 ```json 块或整段回复本身是 JSON 对象时才按调用解析；解析不出的调用算格式错误，交回模型更正。

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::core::{ModelChain, Task};
use crate::llm::{Completion, FallbackCoordinator, ModelError};
use crate::memory::Message;
use crate::tools::{tool_call_schema_json, ToolCallRequest, ToolDescriptor};

/// 一次模型回复的解释结果
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    FinalAnswer(String),
    ToolRequests(Vec<ToolCallRequest>),
    /// 看起来想调用工具但格式不对；附带给模型的更正说明
    Malformed(String),
}

/// 解析模型回复；iteration 用于给缺少 id 的调用编号
pub fn interpret(content: &str, iteration: u32) -> ModelTurn {
    let trimmed = content.trim();
    let candidate = match extract_json_block(trimmed) {
        Some(block) => block,
        None if trimmed.starts_with('{') && trimmed.ends_with('}') => trimmed,
        None => return ModelTurn::FinalAnswer(trimmed.to_string()),
    };

    let value: Value = match serde_json::from_str(candidate) {
        Ok(v) => v,
        Err(e) => return ModelTurn::Malformed(format!("invalid JSON: {e}")),
    };
    let Value::Object(obj) = value else {
        return ModelTurn::Malformed("a tool call must be a JSON object".to_string());
    };

    let raw_calls: Vec<Map<String, Value>> = if let Some(calls) = obj.get("tool_calls") {
        let Some(items) = calls.as_array() else {
            return ModelTurn::Malformed("'tool_calls' must be an array".to_string());
        };
        if items.is_empty() {
            return ModelTurn::Malformed("'tool_calls' is empty".to_string());
        }
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match item.as_object() {
                Some(o) => out.push(o.clone()),
                None => return ModelTurn::Malformed(format!("tool_calls[{i}] is not an object")),
            }
        }
        out
    } else if obj.contains_key("tool") || obj.contains_key("name") {
        vec![obj]
    } else {
        // 不带工具字段的 JSON 对象当作最终答案
        return ModelTurn::FinalAnswer(trimmed.to_string());
    };

    let mut requests = Vec::with_capacity(raw_calls.len());
    for (n, call) in raw_calls.iter().enumerate() {
        match parse_call(call, iteration, n) {
            Ok(req) => requests.push(req),
            Err(detail) => return ModelTurn::Malformed(detail),
        }
    }
    ModelTurn::ToolRequests(requests)
}

fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find("```json")?;
    let rest = &text[start + 7..];
    Some(rest.find("```").map(|end| &rest[..end]).unwrap_or(rest).trim())
}

fn parse_call(call: &Map<String, Value>, iteration: u32, n: usize) -> Result<ToolCallRequest, String> {
    let name = call
        .get("tool")
        .or_else(|| call.get("name"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("call #{n} has no tool name"))?;
    let arguments = match call.get("args").or_else(|| call.get("arguments")) {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::Object(o)) => Value::Object(o.clone()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(v @ Value::Object(_)) => v,
            _ => return Err(format!("arguments of '{name}' are not a JSON object")),
        },
        Some(_) => return Err(format!("arguments of '{name}' must be an object")),
    };
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{iteration}_{n}"));
    Ok(ToolCallRequest {
        id,
        name: name.to_string(),
        arguments,
    })
}

/// 格式错误时追加给模型的更正说明
pub fn correction_message(detail: &str) -> String {
    format!(
        "Your previous reply could not be used as a tool call ({detail}). \
         Reply with plain text if the task is done, or with a JSON object \
         {{\"tool\": \"<name>\", \"args\": {{...}}}} to call a tool."
    )
}

/// 拼装 system prompt：角色、工作目录与预算、工具清单、调用格式
pub fn build_system_prompt(task: &Task, tools: &[ToolDescriptor]) -> String {
    let tool_list: Vec<Value> = tools.iter().map(ToolDescriptor::to_prompt_json).collect();
    let tool_json = serde_json::to_string_pretty(&tool_list).unwrap_or_else(|_| "[]".to_string());
    let role = if task.depth == 0 {
        "You are an autonomous software engineering agent."
    } else {
        "You are a sub-agent working on one delegated part of a larger software engineering task."
    };
    format!(
        "{role}\n\
         Working directory: {wd}\n\
         Iteration budget: {max} model turns (this task has used {used}).\n\n\
         Work step by step. Inspect before you edit, verify after you change something, \
         and react to tool errors instead of repeating the same call.\n\n\
         To call tools, reply with only a JSON object (optionally inside a ```json block).\n\
         {schema}\n\n\
         When the task is finished, reply with plain text describing the result. Do not include a tool call in that reply.\n\n\
         Available tools:\n{tool_json}",
        wd = task.working_dir.display(),
        max = task.max_iterations,
        used = task.iteration,
        schema = tool_call_schema_json(),
    )
}

/// Planner：持有模型回退协调器，拼上 system 后请求一次补全
pub struct Planner {
    coordinator: Arc<FallbackCoordinator>,
}

impl Planner {
    pub fn new(coordinator: Arc<FallbackCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<FallbackCoordinator> {
        &self.coordinator
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.coordinator.client().token_usage()
    }

    pub async fn plan(
        &self,
        system: &str,
        messages: &[Message],
        chain: &ModelChain,
    ) -> Result<Completion, ModelError> {
        let mut full = Vec::with_capacity(messages.len() + 1);
        full.push(Message::system(system));
        full.extend_from_slice(messages);
        self.coordinator.complete(&full, chain).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn requests(turn: ModelTurn) -> Vec<ToolCallRequest> {
        match turn {
            ModelTurn::ToolRequests(r) => r,
            other => panic!("Expected tool requests, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_text_is_final_answer() {
        assert_eq!(
            interpret("  hello world \n", 1),
            ModelTurn::FinalAnswer("hello world".into())
        );
        // 文中出现花括号但不是整段 JSON
        assert!(matches!(
            interpret("Use a map like {a: 1} here", 1),
            ModelTurn::FinalAnswer(_)
        ));
    }

    #[test]
    fn test_single_call_gets_generated_id() {
        let reqs = requests(interpret(r#"{"tool": "read_file", "args": {"path": "a.rs"}}"#, 3));
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].id, "call_3_0");
        assert_eq!(reqs[0].name, "read_file");
        assert_eq!(reqs[0].arguments, json!({"path": "a.rs"}));
    }

    #[test]
    fn test_batch_in_json_block() {
        let text = "Let me look.\n```json\n{\"tool_calls\": [\
            {\"id\": \"x1\", \"tool\": \"glob_search\", \"args\": {\"pattern\": \"*.rs\"}},\
            {\"name\": \"read_file\", \"arguments\": \"{\\\"path\\\": \\\"b.rs\\\"}\"}]}\n```";
        let reqs = requests(interpret(text, 2));
        assert_eq!(reqs[0].id, "x1");
        assert_eq!(reqs[1].id, "call_2_1");
        assert_eq!(reqs[1].arguments, json!({"path": "b.rs"}));
    }

    #[test]
    fn test_missing_args_become_empty_object() {
        let reqs = requests(interpret(r#"{"tool": "todo_write"}"#, 1));
        assert_eq!(reqs[0].arguments, json!({}));
    }

    #[test]
    fn test_object_without_tool_is_final_answer() {
        assert!(matches!(
            interpret(r#"{"result": "done"}"#, 1),
            ModelTurn::FinalAnswer(_)
        ));
    }

    #[test]
    fn test_malformed_calls() {
        assert!(matches!(interpret("```json\n{not json\n```", 1), ModelTurn::Malformed(_)));
        assert!(matches!(interpret(r#"{"tool_calls": []}"#, 1), ModelTurn::Malformed(_)));
        assert!(matches!(interpret(r#"{"tool": "", "args": {}}"#, 1), ModelTurn::Malformed(_)));
        assert!(matches!(
            interpret(r#"{"tool": "bash", "args": [1, 2]}"#, 1),
            ModelTurn::Malformed(_)
        ));
        assert!(correction_message("bad").contains("bad"));
    }
}
