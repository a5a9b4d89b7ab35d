//! 认知层：Planner（提示词与回复解释）、上下文压缩、摘要器、过程事件

pub mod context;
pub mod events;
pub mod planner;
pub mod summarizer;

pub use context::{CompactionPolicy, ContextManager};
pub use events::{
    describe_action, outcome_status, send_event, touched_files, AgentEvent, EventSender,
    ProgressRecord,
};
pub use planner::{build_system_prompt, correction_message, interpret, ModelTurn, Planner};
pub use summarizer::{LocalSummarizer, ModelSummarizer, Summarizer, SummarizerKind};
