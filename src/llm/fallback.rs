//! 模型回退协调器
//!
//! 按模型链顺序尝试：瞬时错误在同一模型上做有界指数退避重试，致命错误立即换下一个模型；
//! 整条链耗尽时返回 ModelError::ChainExhausted，逐模型列出最后一次失败原因。
//! 链的顺序即优先级，不做任何重排。

use std::sync::Arc;
use std::time::Duration;

use crate::core::ModelChain;
use crate::llm::{LlmClient, LlmError, ModelError, ModelFailure};
use crate::memory::Message;

/// 单模型重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 首次请求之外的最多重试次数
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// 不等待的重试策略（测试用）
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// 第 attempt 次重试前的等待：base * 2^attempt，封顶 max_delay；服务端给出 retry_after 时以其为准
    pub fn delay_for(&self, attempt: u32, err: &LlmError) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        err.retry_after.unwrap_or(exp).min(self.max_delay)
    }
}

/// 一次成功的补全
#[derive(Debug, Clone)]
pub struct Completion {
    pub model: String,
    pub content: String,
    /// 成功之前已放弃的模型
    pub skipped: Vec<ModelFailure>,
}

/// 模型回退协调器
pub struct FallbackCoordinator {
    client: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    request_timeout: Option<Duration>,
}

impl FallbackCoordinator {
    pub fn new(client: Arc<dyn LlmClient>, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn client(&self) -> &Arc<dyn LlmClient> {
        &self.client
    }

    /// 依次尝试链上每个模型，返回第一个成功的补全
    pub async fn complete(
        &self,
        messages: &[Message],
        chain: &ModelChain,
    ) -> Result<Completion, ModelError> {
        let mut failures = Vec::with_capacity(chain.len());

        for model in chain.models() {
            match self.complete_with_retry(model, messages).await {
                Ok(content) => {
                    if !failures.is_empty() {
                        tracing::info!(model = %model, skipped = failures.len(), "fell back to model");
                    }
                    return Ok(Completion {
                        model: model.clone(),
                        content,
                        skipped: failures,
                    });
                }
                Err(failure) => {
                    tracing::warn!(
                        model = %failure.model,
                        attempts = failure.attempts,
                        kind = %failure.error.kind,
                        error = %failure.error.message,
                        "model failed, trying next in chain"
                    );
                    failures.push(failure);
                }
            }
        }

        Err(ModelError::ChainExhausted(failures))
    }

    async fn complete_with_retry(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<String, ModelFailure> {
        let mut attempt = 0u32;
        loop {
            let result = match self.request_timeout {
                Some(limit) => tokio::time::timeout(limit, self.client.complete(model, messages))
                    .await
                    .unwrap_or_else(|_| {
                        Err(LlmError::timeout(format!(
                            "no response within {}s",
                            limit.as_secs_f32()
                        )))
                    }),
                None => self.client.complete(model, messages).await,
            };
            attempt += 1;

            match result {
                Ok(content) => return Ok(content),
                Err(err) if err.is_transient() && attempt <= self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt - 1, &err);
                    tracing::debug!(
                        model,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient model error, backing off"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    return Err(ModelFailure {
                        model: model.to_string(),
                        attempts: attempt,
                        error: err,
                    })
                }
            }
        }
    }
}
