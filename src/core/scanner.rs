//! 全量扫描 - 本地遍历与远端列表转为状态表

use crate::core::fingerprint::{self, digest_bytes};
use crate::core::state::{FileRecord, StateStore};
use crate::error::SyncError;
use crate::storage::{LocalTree, ObjectStore};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// 一次扫描的产出
///
/// 指纹算不出来的路径不能写进状态表（表里缺失等于"该侧不存在"，
/// 会触发反方向覆盖），所以单独记录，本轮对账跳过这些路径，下一轮重试。
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub store: StateStore,
    pub unknown: HashSet<String>,
}

/// 扫描配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 排除规则（glob patterns），对本地与远端键同时生效
    pub exclude_patterns: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: vec![
                // 常见的排除模式
                ".git/**".to_string(),
                ".svn/**".to_string(),
                "node_modules/**".to_string(),
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "*.tmp".to_string(),
                "*.temp".to_string(),
                "*.bucketsync-tmp".to_string(),
                "~*".to_string(),
            ],
        }
    }
}

/// 两侧状态表的构建器
#[derive(Debug, Clone, Default)]
pub struct TreeScanner {
    config: ScanConfig,
}

impl TreeScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    /// 检查相对键是否命中排除规则
    pub fn is_excluded(&self, path: &str) -> bool {
        self.config
            .exclude_patterns
            .iter()
            .any(|pattern| matches_pattern(path, pattern))
    }

    /// 全量本地扫描：遍历根目录并逐个计算内容指纹
    ///
    /// 单个文件指纹失败记入 unknown（本轮跳过，下一轮重试）；
    /// 遍历本身失败中止整轮。
    pub async fn scan_local(&self, tree: &LocalTree) -> Result<ScanOutcome, SyncError> {
        let files = tree.scan().await.map_err(SyncError::Scan)?;

        let mut outcome = ScanOutcome::default();
        let mut excluded = 0usize;
        for file in files {
            if self.is_excluded(&file.rel_path) {
                debug!("排除文件: {}", file.rel_path);
                excluded += 1;
                continue;
            }

            match fingerprint::digest_file(&file.abs_path).await {
                Ok(hash) => {
                    outcome
                        .store
                        .set(file.rel_path, FileRecord::new(hash, file.modified_time));
                }
                Err(e) => {
                    let err = SyncError::fingerprint(file.rel_path.clone(), e);
                    warn!("{}", err);
                    outcome.unknown.insert(file.rel_path);
                }
            }
        }

        info!(
            "本地扫描完成: {} 个文件, {} 个被排除, {} 个指纹未知 ({})",
            outcome.store.len(),
            excluded,
            outcome.unknown.len(),
            tree.name()
        );
        Ok(outcome)
    }

    /// 全量远端列表：ETag 可用时直接作指纹，否则回退拉取内容计算
    ///
    /// 回退拉取失败的对象记入 unknown，不得从状态表里消失，
    /// 否则下一轮会把本地副本当成"远端没有"而反向上传覆盖。
    pub async fn scan_remote(&self, remote: &dyn ObjectStore) -> Result<ScanOutcome, SyncError> {
        let objects = remote.list().await.map_err(SyncError::Listing)?;

        let mut outcome = ScanOutcome::default();
        let mut excluded = 0usize;
        for object in objects {
            if object.is_dir {
                continue;
            }
            if self.is_excluded(&object.key) {
                excluded += 1;
                continue;
            }

            let fingerprint = match object.etag.as_deref().and_then(fingerprint::fingerprint_from_etag)
            {
                Some(hash) => hash,
                None => {
                    // 分块上传等场景的 ETag 不是内容 MD5
                    debug!("ETag 不可用作指纹，回退拉取内容: {}", object.key);
                    match remote.get(&object.key).await {
                        Ok(data) => digest_bytes(&data),
                        Err(e) => {
                            let err = SyncError::fingerprint(object.key.clone(), e);
                            warn!("{}", err);
                            outcome.unknown.insert(object.key);
                            continue;
                        }
                    }
                }
            };

            outcome.store.set(
                object.key,
                FileRecord::new(fingerprint, object.last_modified),
            );
        }

        info!(
            "远端列表完成: {} 个对象, {} 个被排除, {} 个指纹未知 ({})",
            outcome.store.len(),
            excluded,
            outcome.unknown.len(),
            remote.name()
        );
        Ok(outcome)
    }
}

/// 简单的 glob 模式匹配
fn matches_pattern(path: &str, pattern: &str) -> bool {
    let path = path.to_lowercase();
    let pattern = pattern.to_lowercase();

    // 处理 ** 通配符
    if pattern.contains("**") {
        let parts: Vec<&str> = pattern.split("**").collect();
        if parts.len() == 2 {
            let prefix = parts[0].trim_end_matches('/');
            let suffix = parts[1].trim_start_matches('/');

            if prefix.is_empty() && suffix.is_empty() {
                return true;
            }
            // 前缀必须落在路径分量边界上（`.git/**` 不匹配 `.gitignore`）
            if !prefix.is_empty()
                && path != prefix
                && !path.starts_with(&format!("{}/", prefix))
            {
                return false;
            }
            if !suffix.is_empty() && !path.ends_with(suffix) {
                return false;
            }
            return true;
        }
    }

    // 处理 * 通配符
    if pattern.contains('*') {
        let regex_pattern = pattern.replace('.', "\\.").replace('*', ".*");
        if let Ok(re) = regex::Regex::new(&format!("^{}$", regex_pattern)) {
            return re.is_match(&path);
        }
    }

    // 精确匹配
    path == pattern || path.ends_with(&format!("/{}", pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RemoteObject;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn default_excludes_match_expected_paths() {
        let scanner = TreeScanner::default();

        assert!(scanner.is_excluded(".git/config"));
        assert!(scanner.is_excluded("node_modules/pkg/index.js"));
        assert!(scanner.is_excluded("docs/.DS_Store"));
        assert!(scanner.is_excluded("build/output.tmp"));
        assert!(scanner.is_excluded("download.bucketsync-tmp"));

        assert!(!scanner.is_excluded("src/main.rs"));
        assert!(!scanner.is_excluded("notes.txt"));
        assert!(!scanner.is_excluded("gitlog.txt"));
    }

    #[test]
    fn directory_glob_respects_component_boundary() {
        let scanner = TreeScanner::default();

        assert!(scanner.is_excluded(".git/config"));
        assert!(scanner.is_excluded("node_modules/pkg/index.js"));

        // 同前缀但不同分量的路径不能被误排除
        assert!(!scanner.is_excluded(".gitignore"));
        assert!(!scanner.is_excluded(".gitattributes"));
        assert!(!scanner.is_excluded("node_modulesX/file.js"));
    }

    #[tokio::test]
    async fn local_scan_fingerprints_files_and_skips_excluded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), b"junk").unwrap();

        let tree = LocalTree::new(dir.path()).unwrap();
        let outcome = TreeScanner::default().scan_local(&tree).await.unwrap();

        assert_eq!(outcome.store.len(), 1);
        assert!(outcome.unknown.is_empty());
        assert_eq!(
            outcome.store.get("a.txt").unwrap().fingerprint,
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    /// 内存桶，模拟对象存储
    struct FakeBucket {
        objects: Mutex<HashMap<String, (Vec<u8>, Option<String>, i64)>>,
        broken: HashSet<String>,
    }

    impl FakeBucket {
        fn new(entries: Vec<(&str, &[u8], Option<&str>, i64)>) -> Self {
            Self {
                objects: Mutex::new(
                    entries
                        .into_iter()
                        .map(|(k, d, e, t)| {
                            (k.to_string(), (d.to_vec(), e.map(|s| s.to_string()), t))
                        })
                        .collect(),
                ),
                broken: HashSet::new(),
            }
        }

        /// 标记某个键的读取总是失败
        fn with_broken(mut self, key: &str) -> Self {
            self.broken.insert(key.to_string());
            self
        }
    }

    #[async_trait]
    impl ObjectStore for FakeBucket {
        async fn list(&self) -> Result<Vec<RemoteObject>> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .iter()
                .map(|(k, (d, e, t))| RemoteObject {
                    key: k.clone(),
                    etag: e.clone(),
                    last_modified: *t,
                    size: d.len() as u64,
                    is_dir: false,
                })
                .collect())
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>> {
            if self.broken.contains(key) {
                anyhow::bail!("读取失败: {}", key);
            }
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .map(|(d, _, _)| d.clone())
                .ok_or_else(|| anyhow::anyhow!("NotFound: {}", key))
        }

        async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (data, None, 0));
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        fn name(&self) -> &str {
            "fake://bucket"
        }
    }

    #[tokio::test]
    async fn remote_scan_uses_etag_when_it_is_md5() {
        let bucket = FakeBucket::new(vec![(
            "a.txt",
            b"hello",
            Some("5d41402abc4b2a76b9719d911017c592"),
            42,
        )]);

        let outcome = TreeScanner::default().scan_remote(&bucket).await.unwrap();
        let record = outcome.store.get("a.txt").unwrap();
        assert_eq!(record.fingerprint, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(record.last_modified, 42);
    }

    #[tokio::test]
    async fn remote_scan_falls_back_to_content_hash_for_multipart_etag() {
        let bucket = FakeBucket::new(vec![(
            "big.bin",
            b"hello",
            Some("0123456789abcdef0123456789abcdef-4"),
            7,
        )]);

        let outcome = TreeScanner::default().scan_remote(&bucket).await.unwrap();
        assert_eq!(
            outcome.store.get("big.bin").unwrap().fingerprint,
            "5d41402abc4b2a76b9719d911017c592"
        );
        assert!(outcome.unknown.is_empty());
    }

    #[tokio::test]
    async fn unreadable_object_is_tracked_as_unknown_not_absent() {
        let bucket = FakeBucket::new(vec![(
            "big.bin",
            b"hello",
            Some("0123456789abcdef0123456789abcdef-4"),
            7,
        )])
        .with_broken("big.bin");

        let outcome = TreeScanner::default().scan_remote(&bucket).await.unwrap();

        // 指纹拿不到的对象不得从表中消失，而是进入 unknown 等下一轮
        assert!(!outcome.store.contains("big.bin"));
        assert!(outcome.unknown.contains("big.bin"));
    }

    #[tokio::test]
    async fn remote_scan_applies_exclude_rules() {
        let bucket = FakeBucket::new(vec![
            ("keep.txt", b"k", Some("5d41402abc4b2a76b9719d911017c592"), 1),
            (".git/config", b"j", Some("5d41402abc4b2a76b9719d911017c592"), 1),
        ]);

        let outcome = TreeScanner::default().scan_remote(&bucket).await.unwrap();
        assert!(outcome.store.contains("keep.txt"));
        assert!(!outcome.store.contains(".git/config"));
    }
}
