//! 离线 LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：把最后一条 User 消息回显为最终答案，一轮即完成
//! - ScriptedLlmClient：按模型 id 预置应答队列，记录调用顺序
//! - FnLlmClient：由闭包根据消息历史确定性地生成应答

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("[{model} offline] {last_user}"))
    }
}

#[derive(Default)]
struct Script {
    queue: VecDeque<Result<String, LlmError>>,
    /// 队列耗尽后重复返回
    fallback: Option<Result<String, LlmError>>,
}

/// 脚本化客户端：每个模型一条应答队列
#[derive(Default)]
pub struct ScriptedLlmClient {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为模型追加一组按序返回的应答
    pub fn with_responses<I>(self, model: &str, responses: I) -> Self
    where
        I: IntoIterator<Item = Result<String, LlmError>>,
    {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(model.to_string())
                .or_default()
                .queue
                .extend(responses);
        }
        self
    }

    /// 队列耗尽后该模型始终返回的结果
    pub fn with_default(self, model: &str, response: Result<String, LlmError>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(model.to_string()).or_default().fallback = Some(response);
        }
        self
    }

    /// 已发生的调用（模型 id，按时间顺序）
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, model: &str) -> usize {
        self.calls().iter().filter(|m| m.as_str() == model).count()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, model: &str, _messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(model.to_string());
        }
        let mut scripts = self
            .scripts
            .lock()
            .map_err(|_| LlmError::new(crate::llm::LlmErrorKind::Other, "script lock poisoned"))?;
        let Some(script) = scripts.get_mut(model) else {
            return Err(LlmError::model_not_found(format!("no script for model {model}")));
        };
        if let Some(next) = script.queue.pop_front() {
            return next;
        }
        script.fallback.clone().unwrap_or_else(|| {
            Err(LlmError::new(
                crate::llm::LlmErrorKind::Other,
                format!("script for {model} exhausted"),
            ))
        })
    }
}

type ResponderFn = dyn Fn(&str, &[Message]) -> Result<String, LlmError> + Send + Sync;

/// 闭包客户端：应答只取决于模型 id 与消息历史
pub struct FnLlmClient {
    responder: Box<ResponderFn>,
}

impl FnLlmClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &[Message]) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
        }
    }
}

#[async_trait]
impl LlmClient for FnLlmClient {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String, LlmError> {
        (self.responder)(model, messages)
    }
}
