//! Markdown 进度报告（纯格式化，不做 IO）

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::core::Task;
use crate::memory::truncate_chars;
use crate::react::ProgressRecord;

const RESULT_PREVIEW_CHARS: usize = 300;

pub fn render_markdown(task: &Task, records: &[ProgressRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Task Progress Report\n");
    let _ = writeln!(out, "**Task ID:** {}  ", task.id);
    if let Some(parent) = &task.parent_id {
        let _ = writeln!(out, "**Parent:** {parent}  ");
    }
    let _ = writeln!(out, "**Status:** {}  ", task.status);
    let _ = writeln!(
        out,
        "**Iterations:** {} / {}  ",
        task.iteration, task.max_iterations
    );
    let _ = writeln!(out, "**Model chain:** {}  ", task.model_chain.models().join(", "));
    if let Some(model) = &task.model_used {
        let _ = writeln!(out, "**Model used:** {model}  ");
    }
    let _ = writeln!(
        out,
        "**Started:** {}  ",
        task.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(
        out,
        "**Last updated:** {}\n",
        task.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    let _ = writeln!(out, "## Task Description\n\n{}\n", task.description.trim());

    let _ = writeln!(out, "## Timeline\n");
    if records.is_empty() {
        let _ = writeln!(out, "_No actions yet._\n");
    }
    for record in records {
        let mark = if record.result.success { "✅" } else { "❌" };
        let _ = writeln!(
            out,
            "### {} Iteration {}: {}\n",
            mark, record.iteration, record.action
        );
        let _ = writeln!(
            out,
            "- **Tool:** `{}` ({} ms, {})",
            record.tool_name,
            record.duration_ms,
            record.timestamp.format("%H:%M:%S")
        );
        if !record.files.is_empty() {
            let _ = writeln!(out, "- **Files:** {}", record.files.join(", "));
        }
        let preview = truncate_chars(record.result.content().trim(), RESULT_PREVIEW_CHARS);
        if !preview.is_empty() {
            let _ = writeln!(out, "- **Result:**\n\n```\n{preview}\n```");
        }
        out.push('\n');
    }

    let files: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.files.iter().map(String::as_str))
        .collect();
    if !files.is_empty() {
        let _ = writeln!(out, "## Files Touched\n");
        for file in files {
            let _ = writeln!(out, "- {file}");
        }
        out.push('\n');
    }

    if let Some(answer) = &task.final_answer {
        let _ = writeln!(out, "## Final Answer\n\n{}\n", answer.trim());
    }
    if let Some(reason) = &task.reason {
        let _ = writeln!(out, "## Stop Reason\n\n{reason}\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ModelChain, StopReason, TaskStatus};
    use crate::tools::{InvocationResult, ToolCallRequest, ToolError};
    use serde_json::json;
    use std::path::PathBuf;

    fn task() -> Task {
        let chain = ModelChain::new(vec!["m1".into(), "m2".into()]).unwrap();
        Task::new("fix the bug", PathBuf::from("/w"), chain, 5)
    }

    #[test]
    fn test_render_timeline_and_files() {
        let mut task = task();
        task.iteration = 2;
        let ok = ToolCallRequest {
            id: "c1".into(),
            name: "read_file".into(),
            arguments: json!({"path": "src/lib.rs"}),
        };
        let bad = ToolCallRequest {
            id: "c2".into(),
            name: "bash".into(),
            arguments: json!({"command": "cargo test"}),
        };
        let records = vec![
            ProgressRecord::from_result(1, &InvocationResult::succeeded(&ok, "fn main() {}".into(), 3)),
            ProgressRecord::from_result(
                2,
                &InvocationResult::failed(&bad, ToolError::Timeout { millis: 30_000 }, 30_000),
            ),
        ];

        let md = render_markdown(&task, &records);
        assert!(md.contains("**Task ID:** "));
        assert!(md.contains("**Iterations:** 2 / 5"));
        assert!(md.contains("m1, m2"));
        assert!(md.contains("✅ Iteration 1"));
        assert!(md.contains("❌ Iteration 2"));
        assert!(md.contains("## Files Touched\n\n- src/lib.rs"));
    }

    #[test]
    fn test_render_stop_reason() {
        let mut task = task();
        task.status = TaskStatus::Failed;
        task.reason = Some(StopReason::iteration_limit(5));
        let md = render_markdown(&task, &[]);
        assert!(md.contains("_No actions yet._"));
        assert!(md.contains("## Stop Reason"));
        assert!(md.contains("iteration ceiling of 5"));
    }
}
