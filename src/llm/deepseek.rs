//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat (常规对话), deepseek-reasoner (思考模式)

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 以 deepseek- 开头的模型 id 走 DeepSeek 端点
pub const DEEPSEEK_MODEL_PREFIX: &str = "deepseek-";

/// 创建 DeepSeek 客户端；优先使用 `DEEPSEEK_API_KEY`，其次 `OPENAI_API_KEY`
pub fn create_deepseek_client() -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());

    OpenAiClient::new(Some(DEEPSEEK_BASE_URL), api_key.as_deref())
}

pub fn is_deepseek_model(model: &str) -> bool {
    model.starts_with(DEEPSEEK_MODEL_PREFIX)
}
