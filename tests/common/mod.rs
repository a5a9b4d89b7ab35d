//! 集成测试公共构件：确定性模型、内置工具、零延迟重试

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use swebee::config::{AgentConfig, AppConfig};
use swebee::core::{default_registry, AgentRuntime, ModelChain, Task};
use swebee::llm::{FallbackCoordinator, LlmClient, RetryPolicy};
use swebee::memory::{CheckpointStore, InMemoryCheckpointStore, Message, Role};
use swebee::tools::ToolDispatcher;

pub fn no_delay_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    }
}

pub fn runtime_with_store(
    llm: Arc<dyn LlmClient>,
    working_dir: &Path,
    store: Arc<dyn CheckpointStore>,
) -> AgentRuntime {
    let mut app = AppConfig::default();
    app.tools.enable_web = false;
    let config = AgentConfig::new("test", working_dir);
    let registry = default_registry(&app, &config).unwrap();
    let coordinator = FallbackCoordinator::new(llm, no_delay_retry());
    let dispatcher = ToolDispatcher::new(Arc::new(registry), Duration::from_secs(10));
    AgentRuntime::new(Arc::new(coordinator), Arc::new(dispatcher), store)
}

pub fn runtime(llm: Arc<dyn LlmClient>, working_dir: &Path) -> AgentRuntime {
    runtime_with_store(llm, working_dir, Arc::new(InMemoryCheckpointStore::new()))
}

pub fn task(description: &str, working_dir: &Path, models: &[&str], ceiling: u32) -> Task {
    let chain = ModelChain::new(models.iter().map(|m| m.to_string()).collect()).unwrap();
    Task::new(description, working_dir.to_path_buf(), chain, ceiling)
}

/// 第一条 User 消息（任务描述）
pub fn task_text(messages: &[Message]) -> &str {
    messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

pub fn observations(messages: &[Message]) -> usize {
    messages
        .iter()
        .filter(|m| m.content.starts_with("Observation from"))
        .count()
}
