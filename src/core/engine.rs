//! 对账引擎 - 三向差异计算与操作执行
//!
//! 计划（纯函数）与执行（经由传输端口）分离；
//! 每条路径的传输与状态回写由独立互斥锁串行化，不同路径互不阻塞。

use crate::core::state::{FileRecord, StateStore, SyncState};
use crate::error::SyncError;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// 本地变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// 事件适配器送来的单个本地变更
///
/// Added/Modified 必须带上适配器已算好的指纹记录，引擎不重新计算。
#[derive(Debug, Clone)]
pub struct LocalChange {
    pub path: String,
    pub kind: ChangeKind,
    pub record: Option<FileRecord>,
}

/// 传输成功后的结果，用于回写状态表
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub fingerprint: String,
    pub last_modified: i64,
}

/// 传输端口：引擎只通过这组抽象操作触碰外部世界
#[async_trait]
pub trait TransferPorts: Send + Sync {
    /// 本地 -> 远端，返回上传内容的指纹
    async fn upload(&self, path: &str) -> Result<TransferOutcome>;
    /// 远端 -> 本地，返回落盘内容的指纹
    async fn download(&self, path: &str) -> Result<TransferOutcome>;
    async fn delete_remote(&self, path: &str) -> Result<()>;
    async fn delete_local(&self, path: &str) -> Result<()>;
}

/// 一次全量对账的操作计划
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub downloads: Vec<String>,
    pub uploads: Vec<String>,
    pub delete_remote: Vec<String>,
    pub delete_local: Vec<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.total_ops() == 0
    }

    pub fn total_ops(&self) -> usize {
        self.downloads.len()
            + self.uploads.len()
            + self.delete_remote.len()
            + self.delete_local.len()
    }
}

/// 计算全量对账计划（纯函数，不做任何 IO）
///
/// 内容冲突采用"远端优先"：两侧都有且指纹不同时只安排下载，
/// 避免同一路径同轮既上传又下载的竞态。
///
/// unresolved 是扫描阶段指纹未能确定的路径：它们在状态表里缺席，
/// 但缺席不代表不存在，本轮不得为其安排任何操作。
pub fn plan_full(state: &SyncState, unresolved: &HashSet<String>) -> SyncPlan {
    let mut downloads = BTreeSet::new();
    let mut uploads = BTreeSet::new();

    for (path, remote_rec) in state.remote.entries() {
        if unresolved.contains(&path) {
            continue;
        }
        match state.local.get(&path) {
            None => {
                downloads.insert(path);
            }
            Some(local_rec) if local_rec.fingerprint != remote_rec.fingerprint => {
                downloads.insert(path);
            }
            Some(_) => {}
        }
    }

    for (path, _) in state.local.entries() {
        if unresolved.contains(&path) {
            continue;
        }
        if !state.remote.contains(&path) {
            uploads.insert(path);
        }
    }

    // 删除只针对本轮没有安排任何传输的单侧路径；
    // 远端优先策略下传输集覆盖了全部单侧路径，这两个集合通常为空，
    // 删除传播走事件增量路径。
    let mut delete_remote = BTreeSet::new();
    for (path, _) in state.remote.entries() {
        if unresolved.contains(&path) {
            continue;
        }
        if !state.local.contains(&path) && !downloads.contains(&path) {
            delete_remote.insert(path);
        }
    }

    let mut delete_local = BTreeSet::new();
    for (path, _) in state.local.entries() {
        if unresolved.contains(&path) {
            continue;
        }
        if !state.remote.contains(&path) && !uploads.contains(&path) {
            delete_local.insert(path);
        }
    }

    SyncPlan {
        downloads: downloads.into_iter().collect(),
        uploads: uploads.into_iter().collect(),
        delete_remote: delete_remote.into_iter().collect(),
        delete_local: delete_local.into_iter().collect(),
    }
}

/// 周期远端时效检测：比较时间戳而非指纹
///
/// 列表操作拿时间戳比拿内容摘要便宜得多，这是唯一用时间戳判断
/// 新旧的地方；误判由随后的全量对账纠正。
pub fn plan_stale_downloads(local: &StateStore, listing: &StateStore) -> Vec<String> {
    let mut stale = BTreeSet::new();
    for (path, remote_rec) in listing.entries() {
        match local.get(&path) {
            None => {
                stale.insert(path);
            }
            Some(local_rec) if remote_rec.last_modified > local_rec.last_modified => {
                stale.insert(path);
            }
            Some(_) => {}
        }
    }
    stale.into_iter().collect()
}

/// 一轮对账的统计
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub planned: u32,
    pub downloads: u32,
    pub uploads: u32,
    pub deletes: u32,
    pub failures: u32,
}

/// 对账引擎
pub struct ReconcileEngine {
    state: Arc<RwLock<SyncState>>,
    ports: Arc<dyn TransferPorts>,
    dry_run: bool,
    /// path -> 互斥锁：保证同一路径同时至多一个在途操作
    path_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ReconcileEngine {
    pub fn new(state: Arc<RwLock<SyncState>>, ports: Arc<dyn TransferPorts>, dry_run: bool) -> Self {
        Self {
            state,
            ports,
            dry_run,
            path_locks: StdMutex::new(HashMap::new()),
        }
    }

    fn path_lock(&self, path: &str) -> Arc<Mutex<()>> {
        let mut locks = self.path_locks.lock().unwrap();
        locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 回收不再被任何操作持有的路径锁，防止映射表随路径数无限增长。
    /// 调用前必须已释放本操作持有的 Arc。
    fn release_path_lock(&self, path: &str) {
        let mut locks = self.path_locks.lock().unwrap();
        if let Some(lock) = locks.get(path) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(path);
            }
        }
    }

    /// 全量对账：按 下载 -> 上传 -> 删远端 -> 删本地 的顺序执行计划，
    /// 删除放最后，避免删掉马上要恢复的内容。
    /// 单路径失败只记日志，轮内继续；状态表仅在操作成功后更新。
    /// unresolved 中的路径本轮完全跳过。
    pub async fn run_full_pass(&self, unresolved: &HashSet<String>) -> PassReport {
        let plan = {
            let state = self.state.read().await;
            plan_full(&state, unresolved)
        };

        let mut report = PassReport {
            planned: plan.total_ops() as u32,
            ..Default::default()
        };

        if plan.is_empty() {
            debug!("全量对账: 两侧无差异");
            return report;
        }

        info!(
            "对账计划: 下载 {}, 上传 {}, 删远端 {}, 删本地 {}",
            plan.downloads.len(),
            plan.uploads.len(),
            plan.delete_remote.len(),
            plan.delete_local.len()
        );

        for path in &plan.downloads {
            if self.download_one(path).await {
                report.downloads += 1;
            } else {
                report.failures += 1;
            }
        }
        for path in &plan.uploads {
            if self.upload_one(path).await {
                report.uploads += 1;
            } else {
                report.failures += 1;
            }
        }
        for path in &plan.delete_remote {
            if self.delete_remote_one(path).await {
                report.deletes += 1;
            } else {
                report.failures += 1;
            }
        }
        for path in &plan.delete_local {
            if self.delete_local_one(path).await {
                report.deletes += 1;
            } else {
                report.failures += 1;
            }
        }

        info!(
            "本轮完成: 下载 {}, 上传 {}, 删除 {}, 失败 {}",
            report.downloads, report.uploads, report.deletes, report.failures
        );
        report
    }

    /// 周期远端变更检测：对时间戳更新的远端条目安排下载，
    /// 并用最新列表替换远端状态表（dry-run 下两者都只报告）。
    /// 指纹未知的路径保留上一轮的记录，不下载也不视为已删除。
    pub async fn refresh_remote(&self, listing: StateStore, unresolved: &HashSet<String>) -> PassReport {
        let stale: Vec<String> = {
            let state = self.state.read().await;
            plan_stale_downloads(&state.local, &listing)
                .into_iter()
                .filter(|path| !unresolved.contains(path))
                .collect()
        };

        if !self.dry_run {
            let mut state = self.state.write().await;
            let mut next = listing;
            for path in unresolved {
                if !next.contains(path) {
                    if let Some(old) = state.remote.get(path) {
                        next.set(path.clone(), old.clone());
                    }
                }
            }
            state.remote = next;
        }

        let mut report = PassReport {
            planned: stale.len() as u32,
            ..Default::default()
        };

        if stale.is_empty() {
            debug!("远端检测: 无更新");
            return report;
        }

        info!("远端检测: {} 个条目需要下载", stale.len());
        for path in &stale {
            if self.download_one(path).await {
                report.downloads += 1;
            } else {
                report.failures += 1;
            }
        }
        report
    }

    /// 增量对账：单路径直接反应，不做全量比较；
    /// 漏掉或乱序的事件由下一轮全量纠正。
    pub async fn apply_event(&self, change: LocalChange) {
        match change.kind {
            ChangeKind::Added | ChangeKind::Modified => {
                let Some(record) = change.record else {
                    warn!("变更事件缺少指纹记录，忽略: {}", change.path);
                    return;
                };
                if self.dry_run {
                    info!("[dry-run] 上传 {}", change.path);
                    return;
                }

                let lock = self.path_lock(&change.path);
                {
                    let _guard = lock.lock().await;

                    self.state
                        .write()
                        .await
                        .local
                        .set(change.path.clone(), record);

                    match self.ports.upload(&change.path).await {
                        Ok(outcome) => {
                            self.state.write().await.remote.set(
                                change.path.clone(),
                                FileRecord::new(outcome.fingerprint, outcome.last_modified),
                            );
                            info!("上传完成: {}", change.path);
                        }
                        // 失败不回写，差异保留到下一轮全量重试
                        Err(e) => warn!("{}", SyncError::transfer(change.path.clone(), e)),
                    }
                }
                drop(lock);
                self.release_path_lock(&change.path);
            }
            ChangeKind::Removed => {
                if self.dry_run {
                    info!("[dry-run] 删除远端 {}", change.path);
                    return;
                }

                let lock = self.path_lock(&change.path);
                {
                    let _guard = lock.lock().await;

                    self.state.write().await.local.remove(&change.path);

                    match self.ports.delete_remote(&change.path).await {
                        Ok(()) => {
                            self.state.write().await.remote.remove(&change.path);
                            info!("远端已删除: {}", change.path);
                        }
                        Err(e) => warn!("{}", SyncError::delete(change.path.clone(), e)),
                    }
                }
                drop(lock);
                self.release_path_lock(&change.path);
            }
        }
    }

    async fn download_one(&self, path: &str) -> bool {
        if self.dry_run {
            info!("[dry-run] 下载 {}", path);
            return true;
        }

        let lock = self.path_lock(path);
        let ok = {
            let _guard = lock.lock().await;
            match self.ports.download(path).await {
                Ok(outcome) => {
                    self.state.write().await.local.set(
                        path.to_string(),
                        FileRecord::new(outcome.fingerprint, outcome.last_modified),
                    );
                    info!("下载完成: {}", path);
                    true
                }
                Err(e) => {
                    warn!("{}", SyncError::transfer(path, e));
                    false
                }
            }
        };
        drop(lock);
        self.release_path_lock(path);
        ok
    }

    async fn upload_one(&self, path: &str) -> bool {
        if self.dry_run {
            info!("[dry-run] 上传 {}", path);
            return true;
        }

        let lock = self.path_lock(path);
        let ok = {
            let _guard = lock.lock().await;
            match self.ports.upload(path).await {
                Ok(outcome) => {
                    self.state.write().await.remote.set(
                        path.to_string(),
                        FileRecord::new(outcome.fingerprint, outcome.last_modified),
                    );
                    info!("上传完成: {}", path);
                    true
                }
                Err(e) => {
                    warn!("{}", SyncError::transfer(path, e));
                    false
                }
            }
        };
        drop(lock);
        self.release_path_lock(path);
        ok
    }

    async fn delete_remote_one(&self, path: &str) -> bool {
        if self.dry_run {
            info!("[dry-run] 删除远端 {}", path);
            return true;
        }

        let lock = self.path_lock(path);
        let ok = {
            let _guard = lock.lock().await;
            match self.ports.delete_remote(path).await {
                Ok(()) => {
                    self.state.write().await.remote.remove(path);
                    info!("远端已删除: {}", path);
                    true
                }
                Err(e) => {
                    warn!("{}", SyncError::delete(path, e));
                    false
                }
            }
        };
        drop(lock);
        self.release_path_lock(path);
        ok
    }

    async fn delete_local_one(&self, path: &str) -> bool {
        if self.dry_run {
            info!("[dry-run] 删除本地 {}", path);
            return true;
        }

        let lock = self.path_lock(path);
        let ok = {
            let _guard = lock.lock().await;
            match self.ports.delete_local(path).await {
                Ok(()) => {
                    self.state.write().await.local.remove(path);
                    info!("本地已删除: {}", path);
                    true
                }
                Err(e) => {
                    warn!("{}", SyncError::delete(path, e));
                    false
                }
            }
        };
        drop(lock);
        self.release_path_lock(path);
        ok
    }
}
