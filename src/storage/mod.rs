pub mod local;
pub mod s3;

use anyhow::Result;
use async_trait::async_trait;

pub use local::{LocalFile, LocalTree};
pub use s3::S3Store;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远端对象条目（list 返回）
#[derive(Debug, Clone)]
pub struct RemoteObject {
    /// 相对键，始终使用正斜杠
    pub key: String,
    /// ETag，已去除首尾引号；不保证是内容 MD5（分块上传会带 `-N` 后缀）
    pub etag: Option<String>,
    pub last_modified: i64,
    pub size: u64,
    pub is_dir: bool,
}

/// 对象存储抽象接口（桶内键值操作）
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 递归列出桶内所有对象
    async fn list(&self) -> Result<Vec<RemoteObject>>;

    /// 读取整个对象
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// 写入整个对象
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// 删除对象；键不存在不算错误
    async fn delete(&self, key: &str) -> Result<()>;

    /// 存储名称（用于日志）
    fn name(&self) -> &str;
}
