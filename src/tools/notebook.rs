//! notebook_edit：Jupyter 笔记本的创建、读取与追加单元格

use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{capability, FieldType, ParameterSchema, SafeFs, Tool};

pub struct NotebookEditTool {
    fs: SafeFs,
}

impl NotebookEditTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }

    fn empty_notebook() -> Value {
        json!({
            "cells": [],
            "metadata": {
                "kernelspec": {"display_name": "Python 3", "language": "python", "name": "python3"},
                "language_info": {"name": "python"}
            },
            "nbformat": 4,
            "nbformat_minor": 5
        })
    }

    async fn load(&self, path: &str) -> Result<(std::path::PathBuf, Value), String> {
        let target = self.fs.resolve(path)?;
        let raw = tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| format!("Read failed: {e}"))?;
        let nb: Value = serde_json::from_str(&raw).map_err(|e| format!("Not a notebook: {e}"))?;
        if !nb["cells"].is_array() {
            return Err(format!("Not a notebook: {path} has no cells array"));
        }
        Ok((target, nb))
    }

    async fn store(target: &Path, nb: &Value) -> Result<(), String> {
        let text = serde_json::to_string_pretty(nb).map_err(|e| e.to_string())?;
        tokio::fs::write(target, text)
            .await
            .map_err(|e| format!("Write failed: {e}"))
    }
}

#[async_trait]
impl Tool for NotebookEditTool {
    fn name(&self) -> &str {
        "notebook_edit"
    }

    fn description(&self) -> &str {
        "Work with Jupyter notebooks: create an empty notebook, read a summary of its cells, or add a code/markdown cell."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("command", FieldType::String, "Notebook operation")
            .one_of(&["create", "read", "add_cell"])
            .required("path", FieldType::String, "Path to the .ipynb file")
            .optional("cell_content", FieldType::String, "Source for add_cell")
            .with_default("cell_type", FieldType::String, json!("code"), "Cell type for add_cell")
            .one_of(&["code", "markdown"])
    }

    fn capability_tags(&self) -> &'static [&'static str] {
        &[capability::READ, capability::WRITE]
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let command = args["command"].as_str().unwrap_or_default();
        let path = args["path"].as_str().unwrap_or_default();
        tracing::info!(command = %command, path = %path, "notebook_edit tool execute");

        match command {
            "create" => {
                let target = self.fs.resolve_new(path)?;
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| format!("Create directory failed: {e}"))?;
                }
                Self::store(&target, &Self::empty_notebook()).await?;
                Ok(format!("Created notebook: {}", self.fs.display(&target)))
            }
            "read" => {
                let (_, nb) = self.load(path).await?;
                let cells = nb["cells"].as_array().map(Vec::as_slice).unwrap_or_default();
                let mut out = format!("Notebook {path}: {} cells\n", cells.len());
                for (i, cell) in cells.iter().enumerate() {
                    let kind = cell["cell_type"].as_str().unwrap_or("unknown");
                    let source = match &cell["source"] {
                        Value::Array(lines) => lines
                            .iter()
                            .filter_map(Value::as_str)
                            .collect::<String>(),
                        Value::String(s) => s.clone(),
                        _ => String::new(),
                    };
                    let first = source.lines().next().unwrap_or("");
                    out.push_str(&format!("[{i}] {kind}: {first}\n"));
                }
                Ok(out)
            }
            "add_cell" => {
                let (target, mut nb) = self.load(path).await?;
                let content = args["cell_content"].as_str().unwrap_or_default();
                let cell_type = args["cell_type"].as_str().unwrap_or("code");
                let source: Vec<String> = content
                    .split_inclusive('\n')
                    .map(str::to_string)
                    .collect();
                let mut cell = json!({"cell_type": cell_type, "metadata": {}, "source": source});
                if cell_type == "code" {
                    cell["execution_count"] = Value::Null;
                    cell["outputs"] = json!([]);
                }
                let count = match nb["cells"].as_array_mut() {
                    Some(cells) => {
                        cells.push(cell);
                        cells.len()
                    }
                    None => return Err(format!("Not a notebook: {path}")),
                };
                Self::store(&target, &nb).await?;
                Ok(format!("Added {cell_type} cell to {path} (now {count} cells)"))
            }
            other => Err(format!("Unsupported notebook command: {other}")),
        }
    }
}
