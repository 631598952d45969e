//! 传输端口的落地实现 - 连接本地目录与对象存储

use crate::core::engine::{TransferOutcome, TransferPorts};
use crate::core::fingerprint::digest_bytes;
use crate::storage::{LocalTree, ObjectStore};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// 把引擎的抽象操作翻译到真实存储
pub struct StoragePorts {
    remote: Arc<dyn ObjectStore>,
    local: Arc<LocalTree>,
}

impl StoragePorts {
    pub fn new(remote: Arc<dyn ObjectStore>, local: Arc<LocalTree>) -> Self {
        Self { remote, local }
    }
}

#[async_trait]
impl TransferPorts for StoragePorts {
    async fn upload(&self, path: &str) -> Result<TransferOutcome> {
        let data = self.local.read(path).await?;
        let fingerprint = digest_bytes(&data);
        let size = data.len();

        self.remote.put(path, data).await?;
        debug!("上传 {} -> {} ({} 字节)", path, self.remote.name(), size);

        Ok(TransferOutcome {
            fingerprint,
            last_modified: chrono::Utc::now().timestamp(),
        })
    }

    async fn download(&self, path: &str) -> Result<TransferOutcome> {
        let data = self.remote.get(path).await?;
        let fingerprint = digest_bytes(&data);
        let size = data.len();

        self.local.write(path, data).await?;
        debug!("下载 {} <- {} ({} 字节)", path, self.remote.name(), size);

        // 以落盘后的实际修改时间为准
        let last_modified = self.local.modified_time(path).await?;
        Ok(TransferOutcome {
            fingerprint,
            last_modified,
        })
    }

    async fn delete_remote(&self, path: &str) -> Result<()> {
        self.remote.delete(path).await?;
        debug!("删除远端对象: {}", path);
        Ok(())
    }

    async fn delete_local(&self, path: &str) -> Result<()> {
        self.local.delete(path).await?;
        debug!("删除本地文件: {}", path);
        Ok(())
    }
}
