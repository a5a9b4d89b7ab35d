//! 沙箱文件系统与只读文件工具
//!
//! SafeFs 绑定工作目录，所有路径必须落在根目录下（禁止 ../ 与符号链接逃逸）；
//! read_file / list_directory 基于 SafeFs 提供读取能力。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{capability, FieldType, ParameterSchema, Tool};

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析已存在的路径（跟随符号链接后仍须在根下）
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let candidate = self.join(path);
        let canonical = candidate
            .canonicalize()
            .map_err(|_| format!("Path not found: {path}"))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(format!("Path escapes the workspace: {path}"))
        }
    }

    /// 解析可能尚不存在的路径（写入用），按词法规约 `..` 后校验
    pub fn resolve_new(&self, path: &str) -> Result<PathBuf, String> {
        let mut normalized = PathBuf::new();
        for component in self.join(path).components() {
            match component {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(format!("Path escapes the workspace: {path}"));
                    }
                }
                Component::CurDir => {}
                other => normalized.push(other.as_os_str()),
            }
        }
        if !normalized.starts_with(&self.root_dir) {
            return Err(format!("Path escapes the workspace: {path}"));
        }
        // 已存在的最近祖先不能是指向根外的符号链接
        let mut ancestor = normalized.as_path();
        while !ancestor.exists() {
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => break,
            }
        }
        if let Ok(real) = ancestor.canonicalize() {
            if !real.starts_with(&self.root_dir) {
                return Err(format!("Path escapes the workspace: {path}"));
            }
        }
        Ok(normalized)
    }

    /// 相对根目录的显示路径
    pub fn display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    fn join(&self, path: &str) -> PathBuf {
        let path = path.trim();
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root_dir.join(path.trim_start_matches("./"))
        }
    }
}

/// 按扩展名推断语言（用于输出标注）
pub fn detect_language(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let lang = match ext.as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" => "javascript",
        "ts" => "typescript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" => "cpp",
        "rb" => "ruby",
        "md" => "markdown",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "html" => "html",
        "css" => "css",
        "sh" => "shell",
        "ipynb" => "notebook",
        "txt" => "text",
        _ => return None,
    };
    Some(lang)
}

/// 读取文件，可选行区间，输出带行号
pub struct ReadFileTool {
    fs: SafeFs,
    max_chars: usize,
}

impl ReadFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
            max_chars: 100_000,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file in the workspace. Output is prefixed with line numbers; use start_line/end_line for large files."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("path", FieldType::String, "File path relative to the workspace")
            .optional("start_line", FieldType::Integer, "First line to show (1-based)")
            .optional("end_line", FieldType::Integer, "Last line to show (inclusive)")
    }

    fn capability_tags(&self) -> &'static [&'static str] {
        &[capability::READ]
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args["path"].as_str().unwrap_or_default();
        tracing::info!(path = %path, "read_file tool execute");
        let resolved = self.fs.resolve(path)?;
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| format!("Read failed: {e}"))?;

        let total = content.lines().count();
        if total == 0 {
            return Ok("(empty file)".to_string());
        }
        let start = args["start_line"].as_u64().unwrap_or(1).max(1) as usize;
        let end = args["end_line"]
            .as_u64()
            .map(|e| e as usize)
            .unwrap_or(total)
            .min(total);
        if start > end {
            return Err(format!("Invalid line range {start}..{end} (file has {total} lines)"));
        }

        let mut out = String::new();
        for (idx, line) in content.lines().enumerate().skip(start - 1).take(end + 1 - start) {
            out.push_str(&format!("{:>6}\t{}\n", idx + 1, line));
            if out.len() > self.max_chars {
                out.push_str("...[truncated]\n");
                break;
            }
        }
        Ok(out)
    }
}

/// 列出目录（可递归），附带大小与语言标注
pub struct ListDirectoryTool {
    fs: SafeFs,
    max_entries: usize,
}

impl ListDirectoryTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
            max_entries: 500,
        }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the contents of a directory in the workspace, optionally recursively."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_default("path", FieldType::String, json!("."), "Directory path")
            .with_default("recursive", FieldType::Boolean, json!(false), "Walk subdirectories")
            .with_default("show_hidden", FieldType::Boolean, json!(false), "Include dotfiles")
    }

    fn capability_tags(&self) -> &'static [&'static str] {
        &[capability::READ]
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args["path"].as_str().unwrap_or(".");
        let recursive = args["recursive"].as_bool().unwrap_or(false);
        let show_hidden = args["show_hidden"].as_bool().unwrap_or(false);
        tracing::info!(path = %path, recursive, "list_directory tool execute");

        let base = self.fs.resolve(path)?;
        if !base.is_dir() {
            return Err(format!("Not a directory: {path}"));
        }

        let max_depth = if recursive { 10 } else { 1 };
        let mut items: Vec<(bool, String, u64)> = walkdir::WalkDir::new(&base)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0
                    || ((show_hidden || !name.starts_with('.'))
                        && name != "target"
                        && name != "node_modules")
            })
            .filter_map(|e| e.ok())
            .map(|e| {
                let is_dir = e.file_type().is_dir();
                let size = if is_dir {
                    0
                } else {
                    e.metadata().map(|m| m.len()).unwrap_or(0)
                };
                let rel = e
                    .path()
                    .strip_prefix(&base)
                    .unwrap_or(e.path())
                    .to_string_lossy()
                    .into_owned();
                (is_dir, rel, size)
            })
            .collect();
        items.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let total_size: u64 = items.iter().map(|i| i.2).sum();
        let mut out = format!(
            "Directory: {}\nTotal items: {}, total size: {} bytes\n\n",
            self.fs.display(&base),
            items.len(),
            total_size
        );
        for (is_dir, name, size) in items.iter().take(self.max_entries) {
            if *is_dir {
                out.push_str(&format!("{name}/\n"));
            } else {
                let lang = detect_language(Path::new(name))
                    .map(|l| format!(" [{l}]"))
                    .unwrap_or_default();
                out.push_str(&format!("{name} ({size} bytes){lang}\n"));
            }
        }
        if items.len() > self.max_entries {
            out.push_str(&format!("... and {} more\n", items.len() - self.max_entries));
        }
        Ok(out)
    }
}
