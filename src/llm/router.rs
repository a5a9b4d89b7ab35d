//! 按模型 id 选择后端
//!
//! 模型链里可以混用不同供应商的模型（如 deepseek-chat 与 gpt-4o）；ProviderRouter 按前缀把请求
//! 交给对应客户端，未命中任何前缀时走默认客户端。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

struct Route {
    prefix: String,
    client: Arc<dyn LlmClient>,
}

/// 前缀路由客户端
pub struct ProviderRouter {
    routes: Vec<Route>,
    default: Arc<dyn LlmClient>,
    call_count: AtomicU64,
}

impl ProviderRouter {
    pub fn new(default: Arc<dyn LlmClient>) -> Self {
        Self {
            routes: Vec::new(),
            default,
            call_count: AtomicU64::new(0),
        }
    }

    /// 先注册的前缀优先匹配
    pub fn route(mut self, prefix: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        self.routes.push(Route {
            prefix: prefix.into(),
            client,
        });
        self
    }

    pub fn select(&self, model: &str) -> &Arc<dyn LlmClient> {
        self.routes
            .iter()
            .find(|r| model.starts_with(&r.prefix))
            .map(|r| &r.client)
            .unwrap_or(&self.default)
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmClient for ProviderRouter {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String, LlmError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.select(model).complete(model, messages).await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        // 聚合所有后端的 token 使用
        self.routes
            .iter()
            .map(|r| r.client.token_usage())
            .chain(std::iter::once(self.default.token_usage()))
            .fold((0, 0, 0), |acc, u| (acc.0 + u.0, acc.1 + u.1, acc.2 + u.2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[tokio::test]
    async fn test_router_selects_by_prefix() {
        let deepseek = Arc::new(
            ScriptedLlmClient::new().with_default("deepseek-chat", Ok("from deepseek".into())),
        );
        let default = Arc::new(ScriptedLlmClient::new().with_default("gpt-4o", Ok("from openai".into())));
        let router = ProviderRouter::new(default.clone()).route("deepseek-", deepseek.clone());

        assert_eq!(router.complete("deepseek-chat", &[]).await.unwrap(), "from deepseek");
        assert_eq!(router.complete("gpt-4o", &[]).await.unwrap(), "from openai");
        assert_eq!(deepseek.calls(), vec!["deepseek-chat".to_string()]);
        assert_eq!(default.calls(), vec!["gpt-4o".to_string()]);
        assert_eq!(router.call_count(), 2);
    }
}
