//! 摘要器：把一段较早的 Transcript 压成一条摘要
//!
//! LocalSummarizer 完全确定（同样输入同样输出），不依赖模型；ModelSummarizer 让模型链写摘要，
//! 并在其后附上本地提取的事实（任务、涉及文件、未解决错误），保证这些信息不会被模型漏掉。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::ModelChain;
use crate::llm::FallbackCoordinator;
use crate::memory::{truncate_chars, EntryRole, Message, TranscriptEntry};
use crate::react::events::touched_files;

const TASK_CHARS: usize = 2000;
const NOTE_CHARS: usize = 400;
const ERROR_CHARS: usize = 200;

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, entries: &[TranscriptEntry]) -> Result<String, String>;
}

/// 配置里选择的摘要方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarizerKind {
    #[default]
    Model,
    Local,
}

/// 从条目中提取的可确定事实
#[derive(Debug, Default)]
struct Facts {
    task: Option<String>,
    earlier: Vec<String>,
    files: BTreeSet<String>,
    tools: BTreeMap<String, usize>,
    unresolved: Vec<String>,
    last_note: Option<String>,
}

impl Facts {
    fn collect(entries: &[TranscriptEntry]) -> Self {
        let mut facts = Facts::default();
        // 工具名 -> 最近一次失败描述；之后同工具成功即视为已解决
        let mut open_errors: BTreeMap<String, String> = BTreeMap::new();
        for entry in entries {
            match entry.role {
                EntryRole::Task if facts.task.is_none() => {
                    facts.task = Some(truncate_chars(&entry.content, TASK_CHARS));
                }
                EntryRole::Task => {}
                EntryRole::Summary => facts.earlier.push(entry.content.clone()),
                EntryRole::Model => {
                    if !entry.content.trim().is_empty() {
                        facts.last_note = Some(truncate_chars(entry.content.trim(), NOTE_CHARS));
                    }
                }
                EntryRole::ToolResult => {
                    let Some(meta) = &entry.tool_result else {
                        continue;
                    };
                    *facts.tools.entry(meta.tool.clone()).or_default() += 1;
                    if meta.success {
                        facts.files.extend(touched_files(&meta.tool, &meta.arguments));
                        open_errors.remove(&meta.tool);
                    } else {
                        open_errors.insert(
                            meta.tool.clone(),
                            format!(
                                "{} (iteration {}): {}",
                                meta.tool,
                                entry.iteration,
                                truncate_chars(&entry.content, ERROR_CHARS)
                            ),
                        );
                    }
                }
            }
        }
        facts.unresolved = open_errors.into_values().collect();
        facts
    }

    fn render(&self, with_note: bool) -> String {
        let mut out = String::new();
        if let Some(task) = &self.task {
            out.push_str(&format!("Task: {task}\n"));
        }
        for earlier in &self.earlier {
            out.push_str(&format!("Earlier summary:\n{earlier}\n"));
        }
        if !self.files.is_empty() {
            let files: Vec<&str> = self.files.iter().map(String::as_str).collect();
            out.push_str(&format!("Files touched: {}\n", files.join(", ")));
        }
        if !self.tools.is_empty() {
            let tools: Vec<String> = self.tools.iter().map(|(t, n)| format!("{t} x{n}")).collect();
            out.push_str(&format!("Tools used: {}\n", tools.join(", ")));
        }
        if !self.unresolved.is_empty() {
            out.push_str("Unresolved errors:\n");
            for err in &self.unresolved {
                out.push_str(&format!("- {err}\n"));
            }
        }
        if with_note {
            if let Some(note) = &self.last_note {
                out.push_str(&format!("Last model note: {note}\n"));
            }
        }
        out.trim_end().to_string()
    }
}

/// 确定性的本地摘要
#[derive(Debug, Default, Clone)]
pub struct LocalSummarizer;

#[async_trait]
impl Summarizer for LocalSummarizer {
    async fn summarize(&self, entries: &[TranscriptEntry]) -> Result<String, String> {
        let rendered = Facts::collect(entries).render(true);
        if rendered.is_empty() {
            Ok(format!("{} earlier entries (no notable facts).", entries.len()))
        } else {
            Ok(rendered)
        }
    }
}

/// 用模型链写摘要
pub struct ModelSummarizer {
    coordinator: Arc<FallbackCoordinator>,
    chain: ModelChain,
}

impl ModelSummarizer {
    pub fn new(coordinator: Arc<FallbackCoordinator>, chain: ModelChain) -> Self {
        Self { coordinator, chain }
    }
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(&self, entries: &[TranscriptEntry]) -> Result<String, String> {
        let mut messages = vec![Message::system(
            "Summarize the following part of a software engineering agent's work log. \
             Keep task-relevant facts, decisions, files created or modified, \
             and any error that is not yet resolved. Be concise.",
        )];
        messages.extend(entries.iter().map(TranscriptEntry::to_message));
        messages.push(Message::user("Write the summary now as plain text."));

        let completion = self
            .coordinator
            .complete(&messages, &self.chain)
            .await
            .map_err(|e| e.to_string())?;
        let facts = Facts::collect(entries).render(false);
        Ok(format!("{}\n\n{}", completion.content.trim(), facts)
            .trim()
            .to_string())
    }
}
