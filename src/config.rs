//! 配置：AppConfig（文件 + 环境变量）与 AgentConfig（一次运行的值对象）
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SWEBEE__*` 覆盖（双下划线表示嵌套，如 `SWEBEE__LLM__MODEL=gpt-4o`）。
//! AgentConfig 由命令行或调用方直接填写，编排器只接收这个值对象，不做参数解析。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{ConfigError, ModelChain};
use crate::llm::RetryPolicy;
use crate::react::{CompactionPolicy, SummarizerKind};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub context: ContextSection,
    pub tools: ToolsSection,
    pub progress: ProgressSection,
}

/// [agent] 段：迭代上限、子 Agent 限制、状态目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: u32,
    /// 同一轮内并行的子 Agent 数
    pub max_sub_agents: usize,
    /// 子 Agent 最大嵌套深度
    pub max_depth: u32,
    pub sub_agent_iterations: u32,
    /// checkpoint 所在目录（相对工作目录）
    pub state_dir: PathBuf,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_sub_agents: 3,
            max_depth: 2,
            sub_agent_iterations: 8,
            state_dir: PathBuf::from(".swebee"),
        }
    }
}

/// [llm] 段：模型链、端点、重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub fallback_models: Vec<String>,
    /// OpenAI 兼容端点（未设置时用官方地址）
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub retry: RetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "deepseek-chat".to_string(),
            fallback_models: Vec::new(),
            base_url: None,
            request_timeout_secs: 120,
            retry: RetrySection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// [context] 段：压缩阈值与摘要方式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    pub compaction_threshold_tokens: usize,
    pub keep_recent: usize,
    pub summarizer: SummarizerKind,
}

impl Default for ContextSection {
    fn default() -> Self {
        let policy = CompactionPolicy::default();
        Self {
            compaction_threshold_tokens: policy.threshold_tokens,
            keep_recent: policy.keep_recent,
            summarizer: SummarizerKind::Model,
        }
    }
}

impl ContextSection {
    pub fn policy(&self) -> CompactionPolicy {
        CompactionPolicy {
            threshold_tokens: self.compaction_threshold_tokens,
            keep_recent: self.keep_recent,
        }
    }
}

/// [tools] 段：超时、并行度、可选工具开关
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub max_parallel_tools: usize,
    pub enable_shell: bool,
    pub enable_web: bool,
    pub enable_notebooks: bool,
    pub shell: ShellSection,
    pub web: WebSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            max_parallel_tools: 3,
            enable_shell: true,
            enable_web: true,
            enable_notebooks: true,
            shell: ShellSection::default(),
            web: WebSection::default(),
        }
    }
}

/// [tools.shell] 段：为空表示不限制命令名；denied_patterns 追加到内置拒绝列表
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allowed_commands: Vec<String>,
    pub denied_patterns: Vec<String>,
}

/// [tools.web] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub timeout_secs: u64,
    pub max_chars: usize,
    /// 为空表示不限制域名（只约束 web_fetch）
    pub allowed_domains: Vec<String>,
    /// web_search 使用的 DuckDuckGo HTML 端点
    pub search_endpoint: String,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_chars: 8000,
            allowed_domains: Vec::new(),
            search_endpoint: "https://html.duckduckgo.com/html/".to_string(),
        }
    }
}

/// [progress] 段：进度报告
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProgressSection {
    pub enabled: bool,
    /// 相对工作目录
    pub file: PathBuf,
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self {
            enabled: true,
            file: PathBuf::from("progress.md"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 SWEBEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 SWEBEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SWEBEE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("llm.fallback_models")
            .with_list_parse_key("tools.shell.allowed_commands")
            .with_list_parse_key("tools.shell.denied_patterns")
            .with_list_parse_key("tools.web.allowed_domains")
            .try_parsing(true),
    );

    Ok(builder.build()?.try_deserialize()?)
}

/// 一次运行的值对象：任务描述、工作目录、迭代上限、模型链、工具开关、续跑 id
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub task: String,
    pub working_dir: PathBuf,
    /// None 时用 [agent].max_iterations；续跑时 Some 会覆盖 checkpoint 里的上限
    pub max_iterations: Option<u32>,
    /// None 时用 [llm].model
    pub model: Option<String>,
    /// None 时用 [llm].fallback_models
    pub fallback_models: Option<Vec<String>>,
    pub enable_web: bool,
    pub enable_notebooks: bool,
    pub enable_shell: bool,
    pub enable_progress: bool,
    pub resume_id: Option<String>,
}

impl AgentConfig {
    /// 以工作目录和任务描述新建，工具开关全开
    pub fn new(task: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            task: task.into(),
            working_dir: working_dir.into(),
            enable_web: true,
            enable_notebooks: true,
            enable_shell: true,
            enable_progress: true,
            ..Default::default()
        }
    }

    pub fn resume(task_id: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            resume_id: Some(task_id.into()),
            ..Self::new("", working_dir)
        }
    }

    /// 模型链：主模型 + 回退列表
    pub fn model_chain(&self, app: &AppConfig) -> Result<ModelChain, ConfigError> {
        let primary = self.model.clone().unwrap_or_else(|| app.llm.model.clone());
        let fallbacks = self
            .fallback_models
            .clone()
            .unwrap_or_else(|| app.llm.fallback_models.clone());
        ModelChain::new(std::iter::once(primary).chain(fallbacks).collect())
    }

    pub fn iteration_ceiling(&self, app: &AppConfig) -> u32 {
        self.max_iterations.unwrap_or(app.agent.max_iterations)
    }

    /// 校验并规范化：工作目录取绝对路径；新任务要求非空描述
    pub fn validate(mut self, app: &AppConfig) -> Result<Self, ConfigError> {
        if !self.working_dir.is_dir() {
            return Err(ConfigError::MissingWorkingDir(self.working_dir));
        }
        self.working_dir = self
            .working_dir
            .canonicalize()
            .map_err(|_| ConfigError::MissingWorkingDir(self.working_dir.clone()))?;
        self.model_chain(app)?;
        if self.iteration_ceiling(app) == 0 {
            return Err(ConfigError::ZeroIterationCeiling);
        }
        if self.resume_id.is_none() && self.task.trim().is_empty() {
            return Err(ConfigError::EmptyTask);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let app = AppConfig::default();
        assert_eq!(app.agent.max_iterations, 50);
        assert_eq!(app.agent.max_depth, 2);
        assert_eq!(app.context.compaction_threshold_tokens, 12_000);
        assert_eq!(app.context.keep_recent, 8);
        assert_eq!(app.tools.max_parallel_tools, 3);
        assert_eq!(app.llm.retry.policy().base_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swebee.toml");
        std::fs::write(
            &path,
            "[agent]\nmax_iterations = 7\n\n[llm]\nmodel = \"m1\"\nfallback_models = [\"m2\"]\n\n[context]\nsummarizer = \"local\"\n",
        )
        .unwrap();
        let app = load_config(Some(path)).unwrap();
        assert_eq!(app.agent.max_iterations, 7);
        assert_eq!(app.agent.max_sub_agents, 3);
        assert_eq!(app.context.summarizer, SummarizerKind::Local);

        let cfg = AgentConfig::new("t", dir.path());
        let chain = cfg.model_chain(&app).unwrap();
        assert_eq!(chain.models(), ["m1".to_string(), "m2".to_string()]);
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        assert!(load_config(Some(PathBuf::from("/nonexistent/swebee.toml"))).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let app = AppConfig::default();
        let dir = tempfile::tempdir().unwrap();

        let missing = AgentConfig::new("t", dir.path().join("nope"));
        assert!(matches!(missing.validate(&app), Err(ConfigError::MissingWorkingDir(_))));

        let empty = AgentConfig::new("  ", dir.path());
        assert!(matches!(empty.validate(&app), Err(ConfigError::EmptyTask)));

        let mut zero = AgentConfig::new("t", dir.path());
        zero.max_iterations = Some(0);
        assert!(matches!(zero.validate(&app), Err(ConfigError::ZeroIterationCeiling)));

        let mut dup = AgentConfig::new("t", dir.path());
        dup.model = Some("a".into());
        dup.fallback_models = Some(vec!["a".into()]);
        assert!(matches!(dup.validate(&app), Err(ConfigError::DuplicateModel(_))));

        let resume = AgentConfig::resume("abc", dir.path());
        assert!(resume.validate(&app).is_ok());
    }
}
