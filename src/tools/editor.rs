//! 文件编辑工具：创建、查看、精确字符串替换
//!
//! str_replace 要求 old_str 在文件中恰好出现一次（除非 replace_all），避免误改多处。

use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::filesystem::detect_language;
use crate::tools::{capability, FieldType, ParameterSchema, SafeFs, Tool};

pub struct StrReplaceEditorTool {
    fs: SafeFs,
}

impl StrReplaceEditorTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }

    async fn create(&self, path: &str, text: &str) -> Result<String, String> {
        let target = self.fs.resolve_new(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Create directory failed: {e}"))?;
        }
        let existed = target.exists();
        tokio::fs::write(&target, text)
            .await
            .map_err(|e| format!("Write failed: {e}"))?;
        let lang = detect_language(&target)
            .map(|l| format!(" [{l}]"))
            .unwrap_or_default();
        Ok(format!(
            "{} file: {} ({} chars, {} lines){}",
            if existed { "Overwrote" } else { "Created" },
            self.fs.display(&target),
            text.chars().count(),
            text.lines().count(),
            lang
        ))
    }

    async fn view(&self, path: &str, range: Option<(usize, usize)>) -> Result<String, String> {
        let target = self.fs.resolve(path)?;
        let content = tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| format!("Read failed: {e}"))?;
        let lines: Vec<&str> = content.lines().collect();
        let (start, end) = match range {
            Some((s, e)) => {
                let s = s.max(1);
                let e = e.min(lines.len());
                if s > e {
                    return Err(format!(
                        "Invalid view_range [{s}, {e}] for file with {} lines",
                        lines.len()
                    ));
                }
                (s, e)
            }
            None => (1, lines.len()),
        };
        Ok(lines
            .iter()
            .enumerate()
            .skip(start.saturating_sub(1))
            .take((end + 1).saturating_sub(start))
            .map(|(i, l)| format!("{:>6}\t{}", i + 1, l))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn str_replace(
        &self,
        path: &str,
        old: &str,
        new: &str,
        replace_all: bool,
    ) -> Result<String, String> {
        if old.is_empty() {
            return Err("old_str must not be empty".to_string());
        }
        let target = self.fs.resolve(path)?;
        let original = tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| format!("Read failed: {e}"))?;
        let count = original.matches(old).count();
        match count {
            0 => {
                let preview: String = old.chars().take(50).collect();
                return Err(format!("Text not found in {path}: {preview}"));
            }
            n if n > 1 && !replace_all => {
                return Err(format!(
                    "old_str occurs {n} times in {path}; add surrounding context or set replace_all"
                ))
            }
            _ => {}
        }
        let updated = if replace_all {
            original.replace(old, new)
        } else {
            original.replacen(old, new, 1)
        };
        tokio::fs::write(&target, &updated)
            .await
            .map_err(|e| format!("Write failed: {e}"))?;
        let delta = updated.len() as i64 - original.len() as i64;
        Ok(format!(
            "Updated {} ({} replacement{}, size changed by {} bytes)",
            self.fs.display(&target),
            count,
            if count == 1 { "" } else { "s" },
            delta
        ))
    }
}

#[async_trait]
impl Tool for StrReplaceEditorTool {
    fn name(&self) -> &str {
        "str_replace_editor"
    }

    fn description(&self) -> &str {
        "Create, view, and edit files. Commands: create (write file_text), view, view_range ([start, end]), str_replace (replace old_str with new_str; old_str must be unique unless replace_all)."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("command", FieldType::String, "The command to execute")
            .one_of(&["create", "view", "view_range", "str_replace"])
            .required("path", FieldType::String, "Path to the file")
            .optional("file_text", FieldType::String, "Content for create")
            .optional("old_str", FieldType::String, "Text to replace")
            .optional("new_str", FieldType::String, "Replacement text")
            .optional("view_range", FieldType::Array, "[start_line, end_line]")
            .with_default("replace_all", FieldType::Boolean, json!(false), "Replace every occurrence")
    }

    fn capability_tags(&self) -> &'static [&'static str] {
        &[capability::READ, capability::WRITE]
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let command = args["command"].as_str().unwrap_or_default();
        let path = args["path"].as_str().unwrap_or_default();
        tracing::info!(command = %command, path = %path, "str_replace_editor tool execute");

        match command {
            "create" => {
                let text = args["file_text"].as_str().unwrap_or_default();
                self.create(path, text).await
            }
            "view" => self.view(path, None).await,
            "view_range" => {
                let range = args["view_range"]
                    .as_array()
                    .filter(|r| r.len() == 2)
                    .and_then(|r| Some((r[0].as_u64()? as usize, r[1].as_u64()? as usize)))
                    .ok_or("view_range must be [start_line, end_line]")?;
                self.view(path, Some(range)).await
            }
            "str_replace" => {
                let old = args["old_str"]
                    .as_str()
                    .ok_or("str_replace requires old_str")?;
                let new = args["new_str"].as_str().unwrap_or_default();
                let replace_all = args["replace_all"].as_bool().unwrap_or(false);
                self.str_replace(path, old, new, replace_all).await
            }
            other => Err(format!("Unsupported command: {other}")),
        }
    }
}
