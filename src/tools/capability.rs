//! 能力标签与能力集合
//!
//! 每个工具声明自己需要的能力标签；任务持有一个能力集合，工具的全部标签都在集合内才允许调用。
//! 子 Agent 的能力集合只能是父集合与请求集合的交集。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// 读取工作区文件
pub const READ: &str = "read";
/// 修改工作区文件
pub const WRITE: &str = "write";
/// 执行外部进程
pub const PROCESS: &str = "process";
/// 访问网络
pub const NETWORK: &str = "network";
/// 派生子 Agent
pub const DELEGATE: &str = "delegate";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "tags", rename_all = "snake_case")]
pub enum CapabilitySet {
    /// 不限制
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl CapabilitySet {
    pub fn only<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(tags.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, tag: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(tags) => tags.contains(tag),
        }
    }

    /// 工具所需但集合内缺少的标签
    pub fn missing<'a, I>(&self, required: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        required
            .into_iter()
            .filter(|tag| !self.contains(tag))
            .cloned()
            .collect()
    }

    /// 交集；requested 为 None 时继承自身
    pub fn narrow(&self, requested: Option<&CapabilitySet>) -> CapabilitySet {
        match (self, requested) {
            (_, None) | (_, Some(Self::All)) => self.clone(),
            (Self::All, Some(other)) => other.clone(),
            (Self::Only(mine), Some(Self::Only(theirs))) => {
                Self::Only(mine.intersection(theirs).cloned().collect())
            }
        }
    }

    /// other 的每个能力都在自身内
    pub fn is_superset_of(&self, other: &CapabilitySet) -> bool {
        match (self, other) {
            (Self::All, _) => true,
            (Self::Only(_), Self::All) => false,
            (Self::Only(mine), Self::Only(theirs)) => theirs.is_subset(mine),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrow_is_intersection() {
        let parent = CapabilitySet::only([READ, WRITE, DELEGATE]);
        let requested = CapabilitySet::only([READ, NETWORK]);
        let child = parent.narrow(Some(&requested));
        assert_eq!(child, CapabilitySet::only([READ]));
        assert!(parent.is_superset_of(&child));
    }

    #[test]
    fn test_narrow_from_all_and_none() {
        let requested = CapabilitySet::only([READ]);
        assert_eq!(CapabilitySet::All.narrow(Some(&requested)), requested);
        assert_eq!(requested.narrow(None), requested);
        assert_eq!(requested.narrow(Some(&CapabilitySet::All)), requested);
    }

    #[test]
    fn test_missing_tags() {
        let set = CapabilitySet::only([READ]);
        let required: BTreeSet<String> = [READ, PROCESS].iter().map(|s| s.to_string()).collect();
        assert_eq!(set.missing(&required), vec![PROCESS.to_string()]);
        assert!(CapabilitySet::All.missing(&required).is_empty());
    }
}
