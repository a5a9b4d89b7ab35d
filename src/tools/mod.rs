//! 工具层：参数声明、能力标签、注册表、分发器与内置工具

pub mod capability;
pub mod dispatcher;
pub mod editor;
pub mod error;
pub mod filesystem;
pub mod notebook;
pub mod registry;
pub mod schema;
pub mod search;
pub mod shell;
pub mod todo;
pub mod web;

pub use capability::CapabilitySet;
pub use dispatcher::{InvocationResult, ToolCallRequest, ToolDispatcher};
pub use editor::StrReplaceEditorTool;
pub use error::ToolError;
pub use filesystem::{ListDirectoryTool, ReadFileTool, SafeFs};
pub use notebook::NotebookEditTool;
pub use registry::{Tool, ToolDescriptor, ToolRegistry};
pub use schema::{tool_call_schema_json, FieldSpec, FieldType, ParameterSchema};
pub use search::{GlobSearchTool, GrepSearchTool};
pub use shell::BashTool;
pub use todo::TodoWriteTool;
pub use web::{WebFetchTool, WebSearchTool};
