//! 记忆层：Transcript 条目、token 估算、版本化 checkpoint 持久化

pub mod checkpoint;
pub mod token_budget;
pub mod transcript;

pub use checkpoint::{
    Checkpoint, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore, CHECKPOINT_VERSION,
};
pub use token_budget::{truncate_chars, TokenEstimator};
pub use transcript::{
    EntryRole, Message, Role, SummaryMeta, ToolCallDescriptor, ToolResultMeta, TranscriptEntry,
};
