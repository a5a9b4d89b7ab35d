//! bash 工具：在工作目录中执行命令
//!
//! 拒绝危险子串（rm -rf /、mkfs、fork bomb 等）；配置了允许列表时只放行列表内的命令名（首词）。
//! 安装、下载、测试类命令自动放宽进程超时，其余使用默认超时；同一个超时（加余量）也报给分发器作为调用预算。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::memory::truncate_chars;
use crate::tools::{capability, FieldType, ParameterSchema, Tool};

/// 禁止的命令/子串（即使在允许列表中也不允许带这些参数）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "rm -rf ~",
    "curl | sh",
    "wget | sh",
    "chmod 777 /",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "shutdown",
    "reboot",
    ":(){ :|:& };:", // fork bomb
];

const MAX_OUTPUT_CHARS: usize = 30_000;

/// 模型可请求的最长超时
const MAX_TIMEOUT_SECS: u64 = 600;

/// 分发器预算比命令超时多留的余量，保证先由本工具杀进程并返回输出
const BUDGET_GRACE_SECS: u64 = 5;

pub struct BashTool {
    working_dir: PathBuf,
    allowed_commands: HashSet<String>,
    extra_forbidden: Vec<String>,
    timeout_secs: u64,
}

impl BashTool {
    pub fn new(working_dir: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            allowed_commands: HashSet::new(),
            extra_forbidden: Vec::new(),
            timeout_secs,
        }
    }

    /// 空列表表示不限制命令名
    pub fn with_allowed_commands(mut self, commands: Vec<String>) -> Self {
        self.allowed_commands = commands.into_iter().map(|s| s.to_lowercase()).collect();
        self
    }

    pub fn with_forbidden(mut self, patterns: Vec<String>) -> Self {
        self.extra_forbidden = patterns.into_iter().map(|s| s.to_lowercase()).collect();
        self
    }

    fn check(&self, raw: &str) -> Result<(), String> {
        let lower = raw.to_lowercase();
        let forbidden = FORBIDDEN_SUBSTR
            .iter()
            .copied()
            .chain(self.extra_forbidden.iter().map(String::as_str));
        for pattern in forbidden {
            if lower.contains(pattern) {
                return Err(format!("Forbidden pattern: {pattern}"));
            }
        }
        let name = lower.split_whitespace().next().unwrap_or("");
        if name.is_empty() {
            return Err("Empty command".to_string());
        }
        if self.allowed_commands.is_empty() || self.allowed_commands.contains(name) {
            Ok(())
        } else {
            Err(format!("Command '{name}' not in allowlist"))
        }
    }

    fn effective_timeout(&self, args: &Value) -> u64 {
        let command = args["command"].as_str().unwrap_or_default();
        args["timeout"]
            .as_u64()
            .unwrap_or_else(|| self.timeout_for(command))
            .clamp(1, MAX_TIMEOUT_SECS)
    }

    /// 安装 / 下载 / 测试类命令放宽超时
    fn timeout_for(&self, command: &str) -> u64 {
        let lower = command.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
        if has(&["install", "pip ", "npm ", "apt", "brew"]) {
            (self.timeout_secs * 10).min(300)
        } else if has(&["git clone", "wget", "curl", "download"]) {
            (self.timeout_secs * 6).min(180)
        } else if has(&["test", "pytest", "cargo build", "make"]) {
            (self.timeout_secs * 4).min(120)
        } else {
            self.timeout_secs
        }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace directory and return stdout/stderr. Dangerous commands are refused."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("command", FieldType::String, "The shell command to execute")
            .optional("timeout", FieldType::Integer, "Timeout in seconds (optional)")
    }

    fn capability_tags(&self) -> &'static [&'static str] {
        &[capability::PROCESS]
    }

    fn budget(&self, args: &Value) -> Option<Duration> {
        Some(Duration::from_secs(self.effective_timeout(args) + BUDGET_GRACE_SECS))
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let command = args["command"].as_str().unwrap_or_default().trim();
        self.check(command)?;
        let timeout_secs = self.effective_timeout(&args);

        tracing::info!(command = %command, timeout_secs, "bash tool execute");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.working_dir).kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
            .await
            .map_err(|_| format!("Command timed out after {timeout_secs}s"))?
            .map_err(|e| format!("Execution failed: {e}"))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut text = stdout.trim_end().to_string();
        if !stderr.trim().is_empty() {
            text.push_str(&format!("\nSTDERR: {}", stderr.trim_end()));
        }
        let text = truncate_chars(&text, MAX_OUTPUT_CHARS);
        if !output.status.success() {
            return Err(format!(
                "Exit code {}\n{}",
                output.status.code().unwrap_or(-1),
                text
            ));
        }
        Ok(if text.is_empty() {
            "(no output)".to_string()
        } else {
            text
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_forbidden_and_allowlist() {
        let tool = BashTool::new(".", 5);
        assert!(tool.check("rm -rf / --no-preserve-root").is_err());
        assert!(tool.check("ls -la").is_ok());

        let restricted = BashTool::new(".", 5).with_allowed_commands(vec!["ls".into()]);
        assert!(restricted.check("ls").is_ok());
        assert!(restricted.check("cat file").is_err());
    }

    #[test]
    fn test_timeout_extension() {
        let tool = BashTool::new(".", 30);
        assert_eq!(tool.timeout_for("pip install x"), 300);
        assert_eq!(tool.timeout_for("cargo test"), 120);
        assert_eq!(tool.timeout_for("ls"), 30);

        assert_eq!(
            tool.budget(&json!({"command": "cargo test"})),
            Some(Duration::from_secs(125))
        );
        assert_eq!(
            tool.budget(&json!({"command": "ls", "timeout": 100_000})),
            Some(Duration::from_secs(MAX_TIMEOUT_SECS + BUDGET_GRACE_SECS))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "hi").unwrap();
        let tool = BashTool::new(temp.path(), 5);
        let out = tool.execute(json!({"command": "ls"})).await.unwrap();
        assert!(out.contains("marker.txt"));
        let err = tool.execute(json!({"command": "exit 3"})).await.unwrap_err();
        assert!(err.starts_with("Exit code 3"));
    }
}
