//! 同步状态模型 - 两侧各一张路径表，纯内存无 IO

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 单侧一个文件的已知状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// 内容指纹（32 位十六进制 MD5）；两侧相等即认为内容一致
    pub fingerprint: String,
    /// 修改时间（Unix 秒），仅用于远端时效性判断
    pub last_modified: i64,
}

impl FileRecord {
    pub fn new(fingerprint: impl Into<String>, last_modified: i64) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            last_modified,
        }
    }
}

/// 单侧状态表：相对路径 -> 文件记录
///
/// 键存在表示"该侧有此文件"，缺失表示"该侧没有"，没有"未知"状态。
/// 只收录常规文件，目录不建条目。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateStore {
    entries: HashMap<String, FileRecord>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.entries.get(path)
    }

    pub fn set(&mut self, path: impl Into<String>, record: FileRecord) {
        self.entries.insert(path.into(), record);
    }

    pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
        self.entries.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 条目快照；后续并发修改不影响已取出的序列
    pub fn entries(&self) -> Vec<(String, FileRecord)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// 路径快照（排序，便于确定性遍历）
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl FromIterator<(String, FileRecord)> for StateStore {
    fn from_iter<T: IntoIterator<Item = (String, FileRecord)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// 双侧状态：由编排器持有，引擎与事件适配器只拿引用
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    pub local: StateStore,
    pub remote: StateStore,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let mut store = StateStore::new();
        assert!(store.is_empty());

        store.set("a.txt", FileRecord::new("h1", 100));
        assert_eq!(store.get("a.txt").unwrap().fingerprint, "h1");
        assert!(store.contains("a.txt"));
        assert_eq!(store.len(), 1);

        store.set("a.txt", FileRecord::new("h2", 200));
        assert_eq!(store.get("a.txt").unwrap().fingerprint, "h2");
        assert_eq!(store.len(), 1);

        let removed = store.remove("a.txt").unwrap();
        assert_eq!(removed.last_modified, 200);
        assert!(store.get("a.txt").is_none());
    }

    #[test]
    fn entries_is_a_snapshot() {
        let mut store = StateStore::new();
        store.set("a", FileRecord::new("h1", 1));
        store.set("b", FileRecord::new("h2", 2));

        let snapshot = store.entries();
        store.remove("a");
        store.set("c", FileRecord::new("h3", 3));

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().any(|(p, _)| p == "a"));
        assert!(!snapshot.iter().any(|(p, _)| p == "c"));
    }

    #[test]
    fn paths_are_sorted() {
        let mut store = StateStore::new();
        store.set("b", FileRecord::new("h", 0));
        store.set("a", FileRecord::new("h", 0));
        store.set("c/d", FileRecord::new("h", 0));

        assert_eq!(store.paths(), vec!["a", "b", "c/d"]);
    }
}
