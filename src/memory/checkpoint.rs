//! 版本化 Checkpoint：任务记录 + Transcript + 进度记录
//!
//! 磁盘布局：`<state_dir>/checkpoints/<task_id>.json`，写入走临时文件 + rename，
//! 读到的永远是某个完整提交的版本。加载时先读 `version` 再解析其余字段，
//! 未知版本与工作目录不一致都会被拒绝，而不是尽力解析。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{StateError, Task};
use crate::memory::TranscriptEntry;
use crate::react::ProgressRecord;

/// 当前 checkpoint 格式版本
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    #[serde(flatten)]
    pub task: Task,
    pub transcript: Vec<TranscriptEntry>,
    #[serde(default)]
    pub progress: Vec<ProgressRecord>,
}

impl Checkpoint {
    pub fn capture(task: &Task, transcript: &[TranscriptEntry], progress: &[ProgressRecord]) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            task: task.clone(),
            transcript: transcript.to_vec(),
            progress: progress.to_vec(),
        }
    }

    /// 校验版本后解码；working_dir 给出时要求与记录一致
    pub fn decode(task_id: &str, raw: &str, working_dir: Option<&Path>) -> Result<Self, StateError> {
        let corrupt = |reason: String| StateError::Corrupt {
            task_id: task_id.to_string(),
            reason,
        };
        let value: Value = serde_json::from_str(raw).map_err(|e| corrupt(e.to_string()))?;
        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| corrupt("missing version field".to_string()))?;
        if version != u64::from(CHECKPOINT_VERSION) {
            return Err(StateError::Incompatible {
                task_id: task_id.to_string(),
                reason: format!(
                    "unsupported checkpoint version {version} (expected {CHECKPOINT_VERSION})"
                ),
            });
        }
        let checkpoint: Checkpoint =
            serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))?;
        if checkpoint.task.id != task_id {
            return Err(corrupt(format!(
                "checkpoint belongs to task {}",
                checkpoint.task.id
            )));
        }
        if let Some(expected) = working_dir {
            if checkpoint.task.working_dir != expected {
                return Err(StateError::Incompatible {
                    task_id: task_id.to_string(),
                    reason: format!(
                        "working directory mismatch: checkpoint has {}, current is {}",
                        checkpoint.task.working_dir.display(),
                        expected.display()
                    ),
                });
            }
        }
        Ok(checkpoint)
    }
}

/// Checkpoint 存储
pub trait CheckpointStore: Send + Sync {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StateError>;
    fn load(&self, task_id: &str) -> Result<Checkpoint, StateError>;
    fn remove(&self, task_id: &str) -> Result<(), StateError>;
    /// 已保存的任务 id（排序后）
    fn list(&self) -> Result<Vec<String>, StateError>;
}

/// 文件存储：每个任务一个 JSON 文件
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    working_dir: PathBuf,
}

impl FileCheckpointStore {
    /// state_dir 下的 checkpoints/ 子目录；working_dir 用于加载时校验
    pub fn new(state_dir: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: state_dir.into().join("checkpoints"),
            working_dir: working_dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// id 不合法时拒绝，不会拼出 checkpoints/ 之外的路径
    pub fn path_for(&self, task_id: &str) -> Result<PathBuf, StateError> {
        if !is_valid_task_id(task_id) {
            return Err(StateError::InvalidId(task_id.to_string()));
        }
        Ok(self.dir.join(format!("{task_id}.json")))
    }
}

/// 任务 id 只允许小写十六进制字符
pub fn is_valid_task_id(task_id: &str) -> bool {
    !task_id.is_empty() && task_id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        let path = self.path_for(&checkpoint.task.id)?;
        tracing::debug!(
            path = %path.display(),
            iteration = checkpoint.task.iteration,
            status = %checkpoint.task.status,
            "writing checkpoint"
        );
        let mut buf = serde_json::to_string_pretty(checkpoint)?;
        buf.push('\n');
        write_atomic(&path, &buf)
    }

    fn load(&self, task_id: &str) -> Result<Checkpoint, StateError> {
        let path = self.path_for(task_id)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateError::NotFound(task_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Checkpoint::decode(task_id, &raw, Some(&self.working_dir))
    }

    fn remove(&self, task_id: &str) -> Result<(), StateError> {
        match fs::remove_file(self.path_for(task_id)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StateError::NotFound(task_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<String>, StateError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .filter(|id| is_valid_task_id(id))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), StateError> {
    let parent = path.parent().ok_or_else(|| {
        StateError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("checkpoint path has no parent: {}", path.display()),
        ))
    })?;
    fs::create_dir_all(parent)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// 内存存储：与文件存储走同一解码路径，便于测试
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入原始 JSON（测试损坏 / 旧版本数据用）
    pub fn insert_raw(&self, task_id: &str, raw: impl Into<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(task_id.to_string(), raw.into());
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StateError> {
        self.entries.lock().map_err(|_| {
            StateError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "checkpoint store lock poisoned",
            ))
        })
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        let raw = serde_json::to_string(checkpoint)?;
        self.lock()?.insert(checkpoint.task.id.clone(), raw);
        Ok(())
    }

    fn load(&self, task_id: &str) -> Result<Checkpoint, StateError> {
        let raw = self
            .lock()?
            .get(task_id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(task_id.to_string()))?;
        Checkpoint::decode(task_id, &raw, None)
    }

    fn remove(&self, task_id: &str) -> Result<(), StateError> {
        self.lock()?
            .remove(task_id)
            .map(|_| ())
            .ok_or_else(|| StateError::NotFound(task_id.to_string()))
    }

    fn list(&self) -> Result<Vec<String>, StateError> {
        let mut ids: Vec<String> = self.lock()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ModelChain, TaskStatus};

    fn sample_task(dir: &Path) -> Task {
        let chain = ModelChain::new(vec!["m1".into(), "m2".into()]).unwrap();
        let mut task = Task::new("fix bug", dir.to_path_buf(), chain, 5);
        task.iteration = 2;
        task.status = TaskStatus::Paused;
        task
    }

    #[test]
    fn test_file_store_roundtrip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(temp.path().join(".swebee"), temp.path());
        let task = sample_task(temp.path());
        let transcript = vec![TranscriptEntry::task("fix bug", 0)];
        store
            .save(&Checkpoint::capture(&task, &transcript, &[]))
            .expect("save");

        let loaded = store.load(&task.id).expect("load");
        assert_eq!(loaded.version, CHECKPOINT_VERSION);
        assert_eq!(loaded.task.iteration, 2);
        assert_eq!(loaded.task.status, TaskStatus::Paused);
        assert_eq!(loaded.task.model_chain, task.model_chain);
        assert_eq!(loaded.transcript.len(), 1);
        assert_eq!(store.list().expect("list"), vec![task.id.clone()]);
        assert!(!store.path_for(&task.id).unwrap().with_extension("json.tmp").exists());

        store.remove(&task.id).expect("remove");
        assert!(matches!(store.load(&task.id), Err(StateError::NotFound(_))));
    }

    #[test]
    fn test_checkpoint_uses_flat_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let task = sample_task(temp.path());
        let v = serde_json::to_value(Checkpoint::capture(&task, &[], &[])).unwrap();
        assert_eq!(v["version"], 1);
        assert_eq!(v["task_id"], task.id.as_str());
        assert_eq!(v["iteration_ceiling"], 5);
        assert_eq!(v["model_chain"], serde_json::json!(["m1", "m2"]));
        assert!(v["transcript"].is_array());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let task = sample_task(temp.path());
        let mut v = serde_json::to_value(Checkpoint::capture(&task, &[], &[])).unwrap();
        v["version"] = serde_json::json!(99);
        let store = InMemoryCheckpointStore::new();
        store.insert_raw(&task.id, v.to_string());
        match store.load(&task.id) {
            Err(StateError::Incompatible { reason, .. }) => assert!(reason.contains("99")),
            other => panic!("Expected Incompatible, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_and_missing_version_rejected() {
        let store = InMemoryCheckpointStore::new();
        store.insert_raw("a", "{not json");
        store.insert_raw("b", r#"{"task_id":"b"}"#);
        assert!(matches!(store.load("a"), Err(StateError::Corrupt { .. })));
        assert!(matches!(store.load("b"), Err(StateError::Corrupt { .. })));
        assert!(matches!(store.load("c"), Err(StateError::NotFound(_))));
    }

    #[test]
    fn test_working_dir_mismatch_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let other = tempfile::tempdir().expect("tempdir");
        let writer = FileCheckpointStore::new(temp.path().join("state"), temp.path());
        let task = sample_task(temp.path());
        writer.save(&Checkpoint::capture(&task, &[], &[])).expect("save");

        let reader = FileCheckpointStore::new(temp.path().join("state"), other.path());
        match reader.load(&task.id) {
            Err(StateError::Incompatible { reason, .. }) => {
                assert!(reason.contains("working directory"))
            }
            other => panic!("Expected Incompatible, got {other:?}"),
        }
    }

    #[test]
    fn test_task_id_outside_checkpoint_dir_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(temp.path().join("state"), temp.path());
        let victim = temp.path().join("x.json");
        fs::write(&victim, "{}").expect("write");

        for id in ["../../x", "../x", "", "ABC", "a/b", "a.b"] {
            assert!(
                matches!(store.remove(id), Err(StateError::InvalidId(_))),
                "id {id:?} should be rejected"
            );
            assert!(matches!(store.load(id), Err(StateError::InvalidId(_))));
        }
        assert!(victim.exists());

        let mut task = sample_task(temp.path());
        task.id = "../x".into();
        assert!(matches!(
            store.save(&Checkpoint::capture(&task, &[], &[])),
            Err(StateError::InvalidId(_))
        ));
        assert_eq!(fs::read_to_string(&victim).expect("read"), "{}");

        fs::create_dir_all(store.dir()).expect("mkdir");
        fs::write(store.dir().join("notes.json"), "{}").expect("write");
        assert!(store.list().expect("list").is_empty());
    }

}
