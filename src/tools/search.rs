//! 代码搜索工具：按 glob 找文件、按正则搜内容
//!
//! 均在工作目录内遍历，跳过隐藏目录、target 与 node_modules，结果数量有上限。

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{capability, FieldType, ParameterSchema, SafeFs, Tool};

const MAX_FILE_SIZE: u64 = 1024 * 1024;

fn walk_files(base: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    walkdir::WalkDir::new(base)
        .max_depth(20)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            e.depth() == 0
                || (!name.starts_with('.') && name != "target" && name != "node_modules")
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
}

/// 按 glob 模式查找文件，按修改时间倒序
pub struct GlobSearchTool {
    fs: SafeFs,
    max_results: usize,
}

impl GlobSearchTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
            max_results: 50,
        }
    }
}

#[async_trait]
impl Tool for GlobSearchTool {
    fn name(&self) -> &str {
        "glob_search"
    }

    fn description(&self) -> &str {
        "Find files whose workspace-relative path matches a glob pattern such as '**/*.rs' or 'src/*.toml'. Newest files first."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("pattern", FieldType::String, "Glob pattern")
            .with_default("path", FieldType::String, json!("."), "Directory to search from")
    }

    fn capability_tags(&self) -> &'static [&'static str] {
        &[capability::READ]
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let raw = args["pattern"].as_str().unwrap_or_default();
        let path = args["path"].as_str().unwrap_or(".");
        tracing::info!(pattern = %raw, path = %path, "glob_search tool execute");

        // 不含 ** 的模式按任意深度匹配
        let pattern_text = if raw.contains("**") || raw.contains('/') {
            raw.to_string()
        } else {
            format!("**/{raw}")
        };
        let pattern =
            glob::Pattern::new(&pattern_text).map_err(|e| format!("Invalid glob pattern: {e}"))?;
        let base = self.fs.resolve(path)?;

        let mut hits: Vec<(SystemTime, String)> = walk_files(&base)
            .filter_map(|e| {
                let rel = e.path().strip_prefix(&base).ok()?.to_string_lossy().into_owned();
                let matched = pattern.matches(&rel)
                    || (!raw.contains('/') && pattern.matches(&format!("x/{rel}")));
                matched.then(|| {
                    let modified = e
                        .metadata()
                        .ok()
                        .and_then(|m| m.modified().ok())
                        .unwrap_or(SystemTime::UNIX_EPOCH);
                    (modified, self.fs.display(e.path()))
                })
            })
            .collect();
        hits.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut out = format!("Found {} files matching '{}'", hits.len(), raw);
        for (_, file) in hits.iter().take(self.max_results) {
            out.push('\n');
            out.push_str(file);
        }
        if hits.len() > self.max_results {
            out.push_str(&format!("\n... and {} more files", hits.len() - self.max_results));
        }
        Ok(out)
    }
}

/// 正则搜索文件内容，可选上下文行
pub struct GrepSearchTool {
    fs: SafeFs,
    max_matches: usize,
}

struct GrepMatch {
    file: PathBuf,
    line_number: usize,
    line: String,
    context: Vec<String>,
}

impl GrepSearchTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
            max_matches: 100,
        }
    }

    fn search_file(
        &self,
        path: &Path,
        re: &regex::Regex,
        context_lines: usize,
        out: &mut Vec<GrepMatch>,
    ) {
        // 跳过无法按 UTF-8 读取的文件
        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };
        let lines: Vec<&str> = content.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            if out.len() >= self.max_matches {
                return;
            }
            if !re.is_match(line) {
                continue;
            }
            let context = if context_lines > 0 {
                let start = i.saturating_sub(context_lines);
                let end = (i + context_lines + 1).min(lines.len());
                (start..end)
                    .filter(|&j| j != i)
                    .map(|j| format!("{}: {}", j + 1, lines[j].trim_end()))
                    .collect()
            } else {
                Vec::new()
            };
            out.push(GrepMatch {
                file: path.to_path_buf(),
                line_number: i + 1,
                line: line.trim_end().to_string(),
                context,
            });
        }
    }
}

#[async_trait]
impl Tool for GrepSearchTool {
    fn name(&self) -> &str {
        "grep_search"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Optionally restrict to file names matching file_pattern (e.g. '*.rs') and show context lines."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("pattern", FieldType::String, "Regular expression")
            .with_default("path", FieldType::String, json!("."), "File or directory to search")
            .with_default("file_pattern", FieldType::String, json!("*"), "File name glob")
            .with_default("case_sensitive", FieldType::Boolean, json!(true), "Case sensitive match")
            .with_default("context_lines", FieldType::Integer, json!(0), "Lines of context around each match")
    }

    fn capability_tags(&self) -> &'static [&'static str] {
        &[capability::READ]
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let pattern = args["pattern"].as_str().unwrap_or_default();
        let path = args["path"].as_str().unwrap_or(".");
        let file_pattern = args["file_pattern"].as_str().unwrap_or("*");
        let case_sensitive = args["case_sensitive"].as_bool().unwrap_or(true);
        let context_lines = args["context_lines"].as_u64().unwrap_or(0).min(10) as usize;
        tracing::info!(pattern = %pattern, path = %path, "grep_search tool execute");

        let re = regex::RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| format!("Invalid regex pattern: {e}"))?;
        let name_filter =
            glob::Pattern::new(file_pattern).map_err(|e| format!("Invalid file_pattern: {e}"))?;
        let base = self.fs.resolve(path)?;

        let mut matches = Vec::new();
        let mut files_searched = 0usize;
        if base.is_file() {
            files_searched = 1;
            self.search_file(&base, &re, context_lines, &mut matches);
        } else {
            for entry in walk_files(&base) {
                if matches.len() >= self.max_matches {
                    break;
                }
                if entry.metadata().map(|m| m.len() > MAX_FILE_SIZE).unwrap_or(true) {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                if !name_filter.matches(&name) {
                    continue;
                }
                files_searched += 1;
                self.search_file(entry.path(), &re, context_lines, &mut matches);
            }
        }

        let mut out = format!(
            "Pattern '{}' (case {}): {} matches in {} files searched\n",
            pattern,
            if case_sensitive { "sensitive" } else { "insensitive" },
            matches.len(),
            files_searched
        );
        for m in &matches {
            out.push_str(&format!(
                "{}:{}: {}\n",
                self.fs.display(&m.file),
                m.line_number,
                m.line
            ));
            for ctx in &m.context {
                out.push_str(&format!("    {ctx}\n"));
            }
        }
        if matches.len() >= self.max_matches {
            out.push_str("...[match limit reached]\n");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> tempfile::TempDir {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("src/nested")).unwrap();
        std::fs::write(temp.path().join("src/main.rs"), "fn main() {\n    run();\n}\n").unwrap();
        std::fs::write(temp.path().join("src/nested/util.rs"), "pub fn run() {}\n").unwrap();
        std::fs::write(temp.path().join("README.md"), "Run the tool\n").unwrap();
        temp
    }

    #[tokio::test]
    async fn test_glob_finds_nested_files() {
        let temp = workspace();
        let tool = GlobSearchTool::new(temp.path());
        let out = tool.execute(json!({"pattern": "*.rs", "path": "."})).await.unwrap();
        assert!(out.starts_with("Found 2 files"));
        assert!(out.contains("src/nested/util.rs"));
        assert!(!out.contains("README.md"));
    }

    #[tokio::test]
    async fn test_grep_with_filter_and_case() {
        let temp = workspace();
        let tool = GrepSearchTool::new(temp.path());
        let out = tool
            .execute(json!({
                "pattern": "run", "path": ".", "file_pattern": "*.rs",
                "case_sensitive": true, "context_lines": 1
            }))
            .await
            .unwrap();
        assert!(out.contains("src/main.rs:2:     run();"));
        assert!(out.contains("src/nested/util.rs:1: pub fn run() {}"));
        assert!(!out.contains("README.md"));

        let insensitive = tool
            .execute(json!({
                "pattern": "^run", "path": "README.md", "file_pattern": "*",
                "case_sensitive": false, "context_lines": 0
            }))
            .await
            .unwrap();
        assert!(insensitive.contains("README.md:1"));
    }

    #[tokio::test]
    async fn test_grep_invalid_regex() {
        let temp = workspace();
        let tool = GrepSearchTool::new(temp.path());
        let err = tool
            .execute(json!({"pattern": "(", "path": ".", "file_pattern": "*", "case_sensitive": true, "context_lines": 0}))
            .await
            .unwrap_err();
        assert!(err.contains("Invalid regex"));
    }
}
