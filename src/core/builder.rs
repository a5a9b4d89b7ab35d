//! Agent 构建器：显式注册工具、选择 LLM 后端、组装运行时
//!
//! 注册表在这里一次性填好并随运行时传递，进程内没有全局注册表。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::config::{AgentConfig, AppConfig};
use crate::core::{AgentError, AgentRuntime, ConfigError, RuntimeSettings};
use crate::llm::deepseek::DEEPSEEK_MODEL_PREFIX;
use crate::llm::{
    create_deepseek_client, FallbackCoordinator, LlmClient, MockLlmClient, OpenAiClient,
    ProviderRouter,
};
use crate::memory::{CheckpointStore, FileCheckpointStore};
use crate::react::EventSender;
use crate::tools::{
    BashTool, GlobSearchTool, GrepSearchTool, ListDirectoryTool, NotebookEditTool, ReadFileTool,
    StrReplaceEditorTool, TodoWriteTool, ToolDispatcher, ToolRegistry, WebFetchTool,
    WebSearchTool,
};

/// Agent 构建器；未显式提供的组件按配置创建
pub struct AgentBuilder {
    app: AppConfig,
    config: AgentConfig,
    llm: Option<Arc<dyn LlmClient>>,
    registry: Option<ToolRegistry>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    events: Option<EventSender>,
    cancel: Option<CancellationToken>,
}

impl AgentBuilder {
    pub fn new(app: AppConfig, config: AgentConfig) -> Self {
        Self {
            app,
            config,
            llm: None,
            registry: None,
            checkpoints: None,
            events: None,
            cancel: None,
        }
    }

    /// 替换 LLM 后端（测试中注入脚本化客户端）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// 校验配置并组装 Agent
    pub fn build(self) -> Result<Agent, AgentError> {
        let config = self.config.validate(&self.app)?;
        let app = self.app;

        let llm = self.llm.unwrap_or_else(|| create_llm_from_env(&app));
        let coordinator = FallbackCoordinator::new(llm, app.llm.retry.policy())
            .with_request_timeout(Duration::from_secs(app.llm.request_timeout_secs.max(1)));

        let registry = match self.registry {
            Some(registry) => registry,
            None => default_registry(&app, &config)?,
        };
        tracing::info!(tools = ?registry.tool_names(), "tool registry ready");
        let dispatcher = ToolDispatcher::new(
            Arc::new(registry),
            Duration::from_secs(app.tools.tool_timeout_secs.max(1)),
        );

        let checkpoints = self.checkpoints.unwrap_or_else(|| {
            Arc::new(FileCheckpointStore::new(
                state_dir(&app, &config.working_dir),
                config.working_dir.clone(),
            ))
        });

        let mut runtime = AgentRuntime::new(Arc::new(coordinator), Arc::new(dispatcher), checkpoints)
            .with_settings(runtime_settings(&app));
        if let Some(events) = self.events {
            runtime = runtime.with_events(events);
        }
        if let Some(cancel) = self.cancel {
            runtime = runtime.with_cancel_token(cancel);
        }

        Ok(Agent::new(app, config, runtime))
    }
}

/// 配置中的 state_dir 为相对路径时挂在工作目录下
pub fn state_dir(app: &AppConfig, working_dir: &Path) -> PathBuf {
    if app.agent.state_dir.is_absolute() {
        app.agent.state_dir.clone()
    } else {
        working_dir.join(&app.agent.state_dir)
    }
}

fn runtime_settings(app: &AppConfig) -> RuntimeSettings {
    RuntimeSettings {
        compaction: app.context.policy(),
        summarizer: app.context.summarizer,
        max_depth: app.agent.max_depth,
        sub_agent_iterations: app.agent.sub_agent_iterations.max(1),
        max_parallel_tools: app.tools.max_parallel_tools.max(1),
        max_sub_agents: app.agent.max_sub_agents.max(1),
    }
}

/// 内置工具注册表：读写与搜索类工具总是注册，shell / web / notebook 由两层开关共同决定
pub fn default_registry(app: &AppConfig, config: &AgentConfig) -> Result<ToolRegistry, ConfigError> {
    let wd = &config.working_dir;
    let mut tools = ToolRegistry::new();

    tools.register(ReadFileTool::new(wd))?;
    tools.register(ListDirectoryTool::new(wd))?;
    tools.register(StrReplaceEditorTool::new(wd))?;
    tools.register(GlobSearchTool::new(wd))?;
    tools.register(GrepSearchTool::new(wd))?;
    tools.register(TodoWriteTool::new())?;

    if app.tools.enable_shell && config.enable_shell {
        tools.register(
            BashTool::new(wd, app.tools.tool_timeout_secs)
                .with_allowed_commands(app.tools.shell.allowed_commands.clone())
                .with_forbidden(app.tools.shell.denied_patterns.clone()),
        )?;
    }
    if app.tools.enable_web && config.enable_web {
        tools.register(WebFetchTool::new(
            app.tools.web.allowed_domains.clone(),
            app.tools.web.timeout_secs,
            app.tools.web.max_chars,
        ))?;
        tools.register(WebSearchTool::new(
            app.tools.web.search_endpoint.clone(),
            app.tools.web.timeout_secs,
            app.tools.web.max_chars,
        ))?;
    }
    if app.tools.enable_notebooks && config.enable_notebooks {
        tools.register(NotebookEditTool::new(wd))?;
    }

    Ok(tools)
}

/// 按环境变量选择后端
///
/// - 设置 DEEPSEEK_API_KEY：deepseek- 前缀的模型走 DeepSeek 端点
/// - 设置 OPENAI_API_KEY：其余模型走 OpenAI 兼容端点（[llm].base_url 可改地址）
/// - 两者都没有：离线 MockLlmClient
pub fn create_llm_from_env(app: &AppConfig) -> Arc<dyn LlmClient> {
    let openai_key = std::env::var("OPENAI_API_KEY").ok();
    let deepseek_key = std::env::var("DEEPSEEK_API_KEY").ok();

    let default: Arc<dyn LlmClient> = match (&openai_key, &deepseek_key) {
        (Some(key), _) => Arc::new(OpenAiClient::new(app.llm.base_url.as_deref(), Some(key))),
        (None, Some(_)) => Arc::new(create_deepseek_client()),
        (None, None) => {
            tracing::warn!("neither OPENAI_API_KEY nor DEEPSEEK_API_KEY is set, using offline mock client");
            return Arc::new(MockLlmClient);
        }
    };

    let mut router = ProviderRouter::new(default);
    if deepseek_key.is_some() {
        router = router.route(DEEPSEEK_MODEL_PREFIX, Arc::new(create_deepseek_client()));
    }
    Arc::new(router)
}
