use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// 本地扫描到的一个常规文件
#[derive(Debug, Clone)]
pub struct LocalFile {
    /// 根目录相对键，正斜杠分隔
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size: u64,
    pub modified_time: i64,
}

/// 本地文件系统端口：同步根目录下的读写删与遍历
#[derive(Debug, Clone)]
pub struct LocalTree {
    root: PathBuf,
    name: String,
}

impl LocalTree {
    pub fn new(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            anyhow::bail!("同步根目录不存在: {}", root.display());
        }
        let name = format!("local:{}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            name,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, rel: &str) -> PathBuf {
        let rel = rel.trim_start_matches('/').trim_start_matches('\\');
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    /// 规范化路径分隔符（统一使用 /，与远端键约定一致）
    pub fn normalize_key(path: &str) -> String {
        path.replace('\\', "/")
    }

    /// 把绝对路径换算成根目录相对键
    pub fn relative_key(&self, abs: &Path) -> Option<String> {
        let rel = abs.strip_prefix(&self.root).ok()?.to_str()?;
        if rel.is_empty() {
            return None;
        }
        Some(Self::normalize_key(rel))
    }

    /// 递归遍历根目录，只返回常规文件
    pub async fn scan(&self) -> Result<Vec<LocalFile>> {
        let root = self.root.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        let files = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in WalkDir::new(&root).follow_links(false) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }

                let metadata = entry.metadata()?;
                let Some(rel) = entry
                    .path()
                    .strip_prefix(&root)
                    .ok()
                    .and_then(|p| p.to_str())
                else {
                    continue;
                };

                let modified = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);

                files.push(LocalFile {
                    rel_path: Self::normalize_key(rel),
                    abs_path: entry.path().to_path_buf(),
                    size: metadata.len(),
                    modified_time: modified,
                });
            }
            anyhow::Ok(files)
        })
        .await??;

        Ok(files)
    }

    pub async fn read(&self, rel: &str) -> Result<Vec<u8>> {
        let path = self.resolve(rel);
        let data = fs::read(&path)
            .await
            .with_context(|| format!("读取文件失败: {}", path.display()))?;
        Ok(data)
    }

    /// 写入文件：先写临时文件再原子重命名，父目录按需创建
    pub async fn write(&self, rel: &str, data: Vec<u8>) -> Result<()> {
        let path = self.resolve(rel);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = path.with_extension("bucketsync-tmp");
        fs::write(&temp_path, data).await?;
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    /// 删除文件；不存在时静默成功
    pub async fn delete(&self, rel: &str) -> Result<()> {
        let path = self.resolve(rel);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// 文件修改时间（Unix 秒）
    pub async fn modified_time(&self, rel: &str) -> Result<i64> {
        let path = self.resolve(rel);
        let metadata = fs::metadata(&path).await?;
        let modified = metadata
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)?
            .as_secs() as i64;
        Ok(modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(dir: &tempfile::TempDir) -> LocalTree {
        LocalTree::new(dir.path()).unwrap()
    }

    #[test]
    fn rejects_missing_root() {
        assert!(LocalTree::new(Path::new("/no/such/root/dir")).is_err());
    }

    #[tokio::test]
    async fn scan_returns_relative_forward_slash_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/c.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("top.txt"), b"hi").unwrap();

        let mut files = tree(&dir).scan().await.unwrap();
        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].rel_path, "a/b/c.txt");
        assert_eq!(files[0].size, 5);
        assert!(files[0].modified_time > 0);
        assert_eq!(files[1].rel_path, "top.txt");
    }

    #[tokio::test]
    async fn write_creates_parents_and_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let tree = tree(&dir);

        tree.write("deep/nested/file.bin", vec![1, 2, 3]).await.unwrap();
        assert_eq!(tree.read("deep/nested/file.bin").await.unwrap(), vec![1, 2, 3]);
        assert!(tree.modified_time("deep/nested/file.bin").await.unwrap() > 0);

        // 没有遗留临时文件
        assert!(!dir.path().join("deep/nested/file.bucketsync-tmp").exists());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let tree = tree(&dir);

        tree.write("x.txt", b"x".to_vec()).await.unwrap();
        tree.delete("x.txt").await.unwrap();
        assert!(!dir.path().join("x.txt").exists());
        tree.delete("x.txt").await.unwrap();
    }

    #[test]
    fn relative_key_normalizes_and_rejects_outside_paths() {
        let dir = tempfile::tempdir().unwrap();
        let tree = tree(&dir);

        let abs = dir.path().join("sub").join("f.txt");
        assert_eq!(tree.relative_key(&abs).unwrap(), "sub/f.txt");
        assert!(tree.relative_key(Path::new("/etc/passwd")).is_none());
        assert!(tree.relative_key(dir.path()).is_none());
    }
}
