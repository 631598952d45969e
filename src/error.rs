//! 错误分类 - 按操作边界划分

use thiserror::Error;

/// 同步过程中的错误类别
///
/// 单路径错误（传输/删除/指纹）在操作边界被捕获并记录，
/// 不会中断整个对账流程；全局错误（列表/扫描）只中止当前这一轮。
#[derive(Debug, Error)]
pub enum SyncError {
    /// 上传或下载失败
    #[error("传输失败: {path}: {cause}")]
    Transfer { path: String, cause: anyhow::Error },

    /// 本地或远端删除失败
    #[error("删除失败: {path}: {cause}")]
    Delete { path: String, cause: anyhow::Error },

    /// 远端列表失败（中止本轮对账）
    #[error("远端列表失败: {0}")]
    Listing(anyhow::Error),

    /// 本地目录扫描失败（中止本轮对账）
    #[error("本地扫描失败: {0}")]
    Scan(anyhow::Error),

    /// 文件无法读取，指纹计算失败
    #[error("指纹计算失败: {path}: {cause}")]
    Fingerprint { path: String, cause: anyhow::Error },
}

impl SyncError {
    pub fn transfer(path: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self::Transfer {
            path: path.into(),
            cause: cause.into(),
        }
    }

    pub fn delete(path: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self::Delete {
            path: path.into(),
            cause: cause.into(),
        }
    }

    pub fn fingerprint(path: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self::Fingerprint {
            path: path.into(),
            cause: cause.into(),
        }
    }
}
