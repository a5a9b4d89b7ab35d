//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / 离线），以及模型链回退

pub mod deepseek;
pub mod error;
pub mod fallback;
pub mod mock;
pub mod openai;
pub mod router;
pub mod traits;

pub use deepseek::{create_deepseek_client, is_deepseek_model, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use error::{LlmError, LlmErrorKind, ModelError, ModelFailure};
pub use fallback::{Completion, FallbackCoordinator, RetryPolicy};
pub use mock::{FnLlmClient, MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use router::ProviderRouter;
pub use traits::LlmClient;
