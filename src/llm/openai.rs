//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；模型 id 由调用方逐次传入，
//! 后端错误优先按结构化字段（错误对象的 type / code、reqwest 的超时与连接状态）归类为 LlmError，
//! 只有拿不到结构时才退回文本推断，供回退协调器决定重试还是换模型。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::error::kind_for_status;
use crate::llm::{LlmClient, LlmError, LlmErrorKind};
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    usage: TokenUsage,
}

impl OpenAiClient {
    /// api_key 缺省时读取 OPENAI_API_KEY
    pub fn new(base_url: Option<&str>, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }

        Self {
            client: Client::with_config(config),
            usage: TokenUsage::default(),
        }
    }

    fn to_openai_messages(
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|m| {
                let built = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                };
                built.map_err(|e| LlmError::invalid_request(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(Self::to_openai_messages(messages)?)
            .build()
            .map_err(|e| LlmError::invalid_request(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(classify_error)?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::server(format!("{model} returned no content")))
    }
}

fn classify_error(error: OpenAIError) -> LlmError {
    match error {
        // 5xx 响应体不一定是 JSON，async-openai 以不带 type / code 的 ApiError 交出原文
        OpenAIError::ApiError(api) if api.r#type.is_none() && api.code.is_none() => {
            let error = LlmError::from_message(api.message);
            if error.kind == LlmErrorKind::Other {
                LlmError::server(error.message)
            } else {
                error
            }
        }
        OpenAIError::ApiError(api) => {
            let message = api.to_string();
            LlmError::from_api_error(api.r#type.as_deref(), api.code.as_deref(), message)
        }
        OpenAIError::Reqwest(e) => {
            let message = e.to_string();
            if e.is_timeout() {
                LlmError::timeout(message)
            } else if let Some(kind) = e.status().and_then(|s| kind_for_status(s.as_u16())) {
                LlmError::new(kind, message)
            } else if e.is_connect() || e.is_request() || e.is_body() {
                LlmError::new(LlmErrorKind::Network, message)
            } else {
                LlmError::from_message(message)
            }
        }
        OpenAIError::InvalidArgument(message) => LlmError::invalid_request(message),
        // 非标准的错误体：只剩文本可用
        OpenAIError::JSONDeserialize(_, content) => LlmError::from_message(content),
        other => LlmError::from_message(other.to_string()),
    }
}
