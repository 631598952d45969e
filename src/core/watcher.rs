//! 本地变更监听 - 把文件系统事件翻译成引擎可用的变更

use crate::core::engine::{ChangeKind, LocalChange};
use crate::core::fingerprint::digest_file_blocking;
use crate::core::scanner::TreeScanner;
use crate::core::state::FileRecord;
use crate::storage::LocalTree;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// 在阻塞线程上启动监听循环，变更经 channel 送往编排器
pub fn spawn_watcher(
    tree: Arc<LocalTree>,
    scanner: TreeScanner,
    tx: Sender<LocalChange>,
    token: CancellationToken,
) -> tokio::task::JoinHandle<anyhow::Result<()>> {
    tokio::task::spawn_blocking(move || watch_loop(tree, scanner, tx, token))
}

fn watch_loop(
    tree: Arc<LocalTree>,
    scanner: TreeScanner,
    tx: Sender<LocalChange>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let (raw_tx, raw_rx) = mpsc::channel::<notify::Result<notify::Event>>();

    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = raw_tx.send(res);
    })?;
    watcher.watch(tree.root(), RecursiveMode::Recursive)?;
    info!("开始监听本地变更: {}", tree.name());

    loop {
        if token.is_cancelled() {
            break;
        }

        // 定时醒来检查取消信号
        match raw_rx.recv_timeout(POLL_TIMEOUT) {
            Ok(Ok(event)) => {
                for change in changes_from_event(&tree, &scanner, &event) {
                    if tx.blocking_send(change).is_err() {
                        // 接收端已关闭
                        return Ok(());
                    }
                }
            }
            Ok(Err(e)) => warn!("监听事件错误: {}", e),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("本地监听退出");
    Ok(())
}

/// 把原始事件展开为零个或多个变更
///
/// 重命名拆成"旧路径删除 + 新路径新增"两条，其余事件按类型直接映射。
fn changes_from_event(
    tree: &LocalTree,
    scanner: &TreeScanner,
    event: &notify::Event,
) -> Vec<LocalChange> {
    let mut out = Vec::new();

    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                push_change(tree, scanner, from, ChangeKind::Removed, &mut out);
                push_change(tree, scanner, to, ChangeKind::Added, &mut out);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in &event.paths {
                push_change(tree, scanner, path, ChangeKind::Removed, &mut out);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in &event.paths {
                push_change(tree, scanner, path, ChangeKind::Added, &mut out);
            }
        }
        kind => {
            if let Some(change_kind) = map_event_kind(&kind) {
                for path in &event.paths {
                    push_change(tree, scanner, path, change_kind, &mut out);
                }
            }
        }
    }

    out
}

/// 事件类型 -> 变更类型；Access 等无关事件丢弃
fn map_event_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Added),
        // 重命名由上层单独展开，模糊的 Name(Any) 按路径是否存在判断
        EventKind::Modify(ModifyKind::Name(_)) => None,
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        _ => None,
    }
}

/// 过滤并补全单条变更：算相对键、排除规则、事件时刻的内容指纹
fn push_change(
    tree: &LocalTree,
    scanner: &TreeScanner,
    abs: &Path,
    kind: ChangeKind,
    out: &mut Vec<LocalChange>,
) {
    if abs.is_dir() {
        return;
    }
    let Some(rel) = tree.relative_key(abs) else {
        return;
    };
    if scanner.is_excluded(&rel) {
        debug!("排除变更: {}", rel);
        return;
    }

    match kind {
        ChangeKind::Removed => out.push(LocalChange {
            path: rel,
            kind: ChangeKind::Removed,
            record: None,
        }),
        ChangeKind::Added | ChangeKind::Modified => match digest_file_blocking(abs) {
            Ok(hash) => {
                let mtime = std::fs::metadata(abs)
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or_else(|| chrono::Utc::now().timestamp());
                out.push(LocalChange {
                    path: rel,
                    kind,
                    record: Some(FileRecord::new(hash, mtime)),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // 事件到达时文件已经消失，按删除处理
                out.push(LocalChange {
                    path: rel,
                    kind: ChangeKind::Removed,
                    record: None,
                });
            }
            Err(e) => warn!("读取变更文件失败，跳过 {}: {}", rel, e),
        },
    }
}
