//! 对话上下文管理：持有任务的 Transcript，超过阈值时把较早的一段压成摘要
//!
//! 压缩范围是从头开始的连续一段，不含最近 keep_recent 条，也不越过尚未解决的最近一次工具失败。
//! 压缩后前缀只剩一条摘要，范围不足两条时不动，因此连续调用两次不会再改变 Transcript。

use std::ops::Range;

use crate::memory::{Message, SummaryMeta, TokenEstimator, TranscriptEntry};
use crate::react::summarizer::{LocalSummarizer, Summarizer};

/// 压缩策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    /// 估算 token 超过该值时压缩
    pub threshold_tokens: usize,
    /// 始终原样保留的最近条目数
    pub keep_recent: usize,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            threshold_tokens: 12_000,
            keep_recent: 8,
        }
    }
}

/// 上下文管理器
#[derive(Debug, Clone)]
pub struct ContextManager {
    entries: Vec<TranscriptEntry>,
    policy: CompactionPolicy,
}

impl ContextManager {
    pub fn new(policy: CompactionPolicy) -> Self {
        Self::from_entries(Vec::new(), policy)
    }

    /// 续跑时从 checkpoint 的 Transcript 重建
    pub fn from_entries(entries: Vec<TranscriptEntry>, policy: CompactionPolicy) -> Self {
        Self { entries, policy }
    }

    pub fn append(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn policy(&self) -> CompactionPolicy {
        self.policy
    }

    /// 按模型实际看到的文本估算
    pub fn estimated_tokens(&self) -> usize {
        self.entries
            .iter()
            .map(|e| TokenEstimator::estimate(&e.to_message().content))
            .sum()
    }

    pub fn needs_compaction(&self) -> bool {
        self.estimated_tokens() > self.policy.threshold_tokens
    }

    /// 尚未解决的最近一次工具失败（其后没有同一工具的成功结果）
    pub fn pending_failure_index(&self) -> Option<usize> {
        let mut succeeded_later: Vec<&str> = Vec::new();
        for (i, entry) in self.entries.iter().enumerate().rev() {
            let Some(meta) = &entry.tool_result else {
                continue;
            };
            if meta.success {
                succeeded_later.push(meta.tool.as_str());
            } else if !succeeded_later.contains(&meta.tool.as_str()) {
                return Some(i);
            }
        }
        None
    }

    /// 可压缩的前缀；不足两条时返回 None
    pub fn compaction_range(&self) -> Option<Range<usize>> {
        let mut end = self.entries.len().checked_sub(self.policy.keep_recent)?;
        if let Some(pending) = self.pending_failure_index() {
            end = end.min(pending);
        }
        (end >= 2).then_some(0..end)
    }

    /// 超过阈值时压缩；返回新写入的摘要条目
    pub async fn maybe_compact(&mut self, summarizer: &dyn Summarizer) -> Option<TranscriptEntry> {
        if !self.needs_compaction() {
            return None;
        }
        let range = self.compaction_range()?;
        let tokens_before = self.estimated_tokens();
        let covered = &self.entries[range.clone()];

        let text = match summarizer.summarize(covered).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) | Err(_) => {
                tracing::warn!("summarizer failed, using local summary");
                LocalSummarizer
                    .summarize(covered)
                    .await
                    .unwrap_or_else(|e| e)
            }
        };

        let entries_covered = covered
            .iter()
            .map(|e| e.summary.as_ref().map(|s| s.entries_covered).unwrap_or(1))
            .sum();
        let first_iteration = covered
            .first()
            .map(|e| e.summary.as_ref().map(|s| s.first_iteration).unwrap_or(e.iteration))
            .unwrap_or(0);
        let last_iteration = covered.last().map(|e| e.iteration).unwrap_or(0);

        let summary = TranscriptEntry::summary(
            text,
            SummaryMeta {
                entries_covered,
                first_iteration,
                last_iteration,
            },
            last_iteration,
        );
        self.entries.splice(range, [summary.clone()]);
        tracing::info!(
            entries_covered,
            tokens_before,
            tokens_after = self.estimated_tokens(),
            "context compacted"
        );
        Some(summary)
    }

    /// 不含 system 的消息（由 Planner 拼 system）
    pub fn messages(&self) -> Vec<Message> {
        self.entries.iter().map(TranscriptEntry::to_message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{EntryRole, ToolResultMeta};
    use async_trait::async_trait;
    use serde_json::json;

    fn result(tool: &str, success: bool, iteration: u32) -> TranscriptEntry {
        TranscriptEntry::tool_result(
            "x".repeat(400),
            ToolResultMeta {
                call_id: format!("call_{iteration}_0"),
                tool: tool.into(),
                arguments: json!({}),
                success,
                error_kind: None,
            },
            iteration,
        )
    }

    fn filled(n: u32) -> ContextManager {
        let mut ctx = ContextManager::new(CompactionPolicy {
            threshold_tokens: 200,
            keep_recent: 2,
        });
        ctx.append(TranscriptEntry::task("do it", 0));
        for i in 1..=n {
            ctx.append(TranscriptEntry::model("step", vec![], i));
            ctx.append(result("read_file", true, i));
        }
        ctx
    }

    struct Broken;

    #[async_trait]
    impl Summarizer for Broken {
        async fn summarize(&self, _: &[TranscriptEntry]) -> Result<String, String> {
            Err("model down".into())
        }
    }

    #[tokio::test]
    async fn test_below_threshold_is_untouched() {
        let mut ctx = ContextManager::new(CompactionPolicy::default());
        ctx.append(TranscriptEntry::task("small", 0));
        assert!(ctx.maybe_compact(&LocalSummarizer).await.is_none());
        assert_eq!(ctx.len(), 1);
    }

    #[tokio::test]
    async fn test_compaction_keeps_recent_and_is_idempotent() {
        let mut ctx = filled(4);
        assert_eq!(ctx.len(), 9);
        let summary = ctx.maybe_compact(&LocalSummarizer).await.unwrap();
        assert_eq!(summary.summary.as_ref().unwrap().entries_covered, 7);
        assert_eq!(ctx.len(), 3);
        assert_eq!(ctx.entries()[0].role, EntryRole::Summary);

        let before: Vec<TranscriptEntry> = ctx.entries().to_vec();
        assert!(ctx.maybe_compact(&LocalSummarizer).await.is_none());
        assert_eq!(ctx.entries(), before.as_slice());
    }

    #[tokio::test]
    async fn test_nested_summary_counts_covered_entries() {
        let mut ctx = filled(4);
        ctx.maybe_compact(&LocalSummarizer).await.unwrap();
        for i in 5..=6 {
            ctx.append(TranscriptEntry::model("more", vec![], i));
            ctx.append(result("read_file", true, i));
        }
        let summary = ctx.maybe_compact(&LocalSummarizer).await.unwrap();
        let meta = summary.summary.unwrap();
        // 7 条旧摘要 + 之后 4 条（最后 2 条保留）
        assert_eq!(meta.entries_covered, 7 + 4);
        assert_eq!(meta.first_iteration, 0);
        assert!(summary.content.contains("Earlier summary"));
    }

    #[tokio::test]
    async fn test_pending_failure_is_not_summarized() {
        let mut ctx = filled(2);
        ctx.append(result("bash", false, 3));
        ctx.append(TranscriptEntry::model("retry later", vec![], 4));
        ctx.append(result("read_file", true, 4));
        ctx.append(TranscriptEntry::model("again", vec![], 5));
        let pending = ctx.pending_failure_index().unwrap();
        assert_eq!(pending, 5);
        ctx.maybe_compact(&LocalSummarizer).await.unwrap();
        assert!(ctx.entries().iter().any(|e| e.is_failed_tool_result()));
        assert_eq!(ctx.entries()[1].tool_result.as_ref().unwrap().tool, "bash");
    }

    #[tokio::test]
    async fn test_resolved_failure_can_be_summarized() {
        let mut ctx = filled(1);
        ctx.append(result("bash", false, 2));
        ctx.append(result("bash", true, 3));
        assert_eq!(ctx.pending_failure_index(), None);
    }

    #[tokio::test]
    async fn test_summarizer_failure_falls_back_to_local() {
        let mut ctx = filled(4);
        let summary = ctx.maybe_compact(&Broken).await.unwrap();
        assert!(summary.content.contains("Task: do it"));
    }
}
