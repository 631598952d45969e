//! 内容指纹 - MD5 摘要与 ETag 解析
//!
//! 指纹选用 MD5 是为了与 S3 简单上传返回的 ETag 直接可比；
//! 该摘要只用于变更检测，不承担任何安全属性。

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use std::path::Path;
use tokio::io::AsyncReadExt;

const READ_BUF_SIZE: usize = 64 * 1024;

/// 计算内存数据的指纹
pub fn digest_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// 流式计算文件指纹，不把整个文件读入内存
pub async fn digest_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("打开文件失败: {}", path.display()))?;

    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// 阻塞版本，供 watcher 线程使用
pub fn digest_file_blocking(path: &Path) -> std::io::Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// 从 ETag 提取内容指纹
///
/// 只有 32 位十六进制的 ETag 才是普通上传的内容 MD5；
/// 分块上传产生 `<hex>-<n>` 形式，无法直接当指纹用，返回 None，
/// 调用方需要回退到拉取内容重新计算。
pub fn fingerprint_from_etag(etag: &str) -> Option<String> {
    let tag = etag.trim_matches('"');
    if tag.len() == 32 && tag.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(tag.to_ascii_lowercase())
    } else {
        None
    }
}
