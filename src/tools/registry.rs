//! 工具注册表
//!
//! 所有工具实现 Tool trait；注册时生成不可变的 ToolDescriptor（名称、描述、参数声明、能力标签、是否只读），
//! 之后注册表只读，按名查找，名称重复直接拒绝。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::ConfigError;
use crate::tools::{CapabilitySet, ParameterSchema};

/// 工具 trait：名称、描述（供 LLM 理解）、参数声明、能力标签、异步执行（args 已校验并补全默认值）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    /// 调用所需的能力标签
    fn capability_tags(&self) -> &'static [&'static str] {
        &[]
    }

    /// 不修改任何状态的工具可以同一轮并行执行
    fn is_read_only(&self) -> bool {
        false
    }

    /// 本次调用需要的执行时间；分发器取它与默认超时中较大的一个
    fn budget(&self, _args: &Value) -> Option<Duration> {
        None
    }

    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 注册时固化的工具描述
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
    pub capability_tags: BTreeSet<String>,
    pub read_only: bool,
}

impl ToolDescriptor {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters(),
            capability_tags: tool.capability_tags().iter().map(|t| t.to_string()).collect(),
            read_only: tool.is_read_only(),
        }
    }

    /// 写进 system prompt 的条目
    pub fn to_prompt_json(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters.to_json_schema(),
        })
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    tool: Arc<dyn Tool>,
}

/// 工具注册表（按名称有序，保证 prompt 中工具顺序稳定）
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), ConfigError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), ConfigError> {
        let descriptor = ToolDescriptor::of(tool.as_ref());
        if self.tools.contains_key(&descriptor.name) {
            return Err(ConfigError::DuplicateTool(descriptor.name));
        }
        tracing::debug!(tool = %descriptor.name, tags = ?descriptor.capability_tags, "tool registered");
        self.tools
            .insert(descriptor.name.clone(), RegisteredTool { descriptor, tool });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<(&ToolDescriptor, Arc<dyn Tool>)> {
        self.tools
            .get(name)
            .map(|r| (&r.descriptor, Arc::clone(&r.tool)))
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|r| &r.descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values().map(|r| &r.descriptor)
    }

    /// 在给定能力集合下可用的工具描述
    pub fn visible_to<'a>(
        &'a self,
        capabilities: &'a CapabilitySet,
    ) -> impl Iterator<Item = &'a ToolDescriptor> + 'a {
        self.descriptors()
            .filter(move |d| capabilities.missing(&d.capability_tags).is_empty())
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
