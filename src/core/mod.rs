//! 核心编排层：错误与恢复、任务状态、会话监管、任务调度、子 Agent 派生、主控循环

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod spawner;
pub mod state;
pub mod task_scheduler;

pub use builder::{create_llm_from_env, default_registry, state_dir, AgentBuilder};
pub use error::{AgentError, ConfigError, ModelError, StateError, ToolError};
pub use orchestrator::{AgentRuntime, RuntimeSettings, TaskOrchestrator};
pub use recovery::{RecoveryAction, RecoveryEngine};
pub use session_supervisor::SessionSupervisor;
pub use spawner::{SubAgentResult, SubAgentSpawner, SubTaskSpec, TASK_AGENT_TOOL};
pub use state::{ModelChain, Outcome, StopKind, StopReason, Task, TaskStatus};
pub use task_scheduler::TaskScheduler;
