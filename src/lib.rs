//! swebee - 软件工程任务智能体
//!
//! 模块划分：
//! - **agent**: 无界面门面（新建 / 续跑任务，返回 TaskReport）
//! - **config**: 应用配置加载（TOML + 环境变量）与运行参数值对象
//! - **core**: 任务状态机、错误与恢复、会话监管、任务调度、子 Agent 派生
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / 离线），模型链回退
//! - **memory**: Transcript、token 估算、版本化 checkpoint
//! - **observability**: 日志初始化与 Markdown 进度报告
//! - **react**: 提示词与回复解释、上下文压缩、摘要器、过程事件
//! - **tools**: 工具契约、注册表、分发器与内置工具

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{Agent, TaskReport};
pub use config::{load_config, AgentConfig, AppConfig};
pub use core::{AgentBuilder, AgentError, TaskOrchestrator, TaskStatus};
