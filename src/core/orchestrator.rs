//! 同步编排器 - 启动引导、事件循环与周期远端检测

use crate::config::Settings;
use crate::core::engine::{LocalChange, PassReport, ReconcileEngine};
use crate::core::scanner::{ScanConfig, TreeScanner};
use crate::core::state::SyncState;
use crate::core::transfer::StoragePorts;
use crate::core::watcher;
use crate::storage::{LocalTree, ObjectStore, S3Store};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 顶层编排器：持有状态表与引擎，驱动全量/增量/周期三条路径
pub struct Orchestrator {
    settings: Settings,
    local: Arc<LocalTree>,
    remote: Arc<dyn ObjectStore>,
    scanner: TreeScanner,
    state: Arc<RwLock<SyncState>>,
    engine: Arc<ReconcileEngine>,
}

impl Orchestrator {
    pub fn new(settings: Settings) -> Result<Self> {
        let remote: Arc<dyn ObjectStore> = Arc::new(S3Store::from_settings(&settings)?);
        Self::with_store(settings, remote)
    }

    /// 注入自定义对象存储（测试或嵌入场景）
    pub fn with_store(settings: Settings, remote: Arc<dyn ObjectStore>) -> Result<Self> {
        let local = Arc::new(LocalTree::new(&settings.local_root)?);
        let state = Arc::new(RwLock::new(SyncState::default()));
        let ports = Arc::new(StoragePorts::new(remote.clone(), local.clone()));
        let engine = Arc::new(ReconcileEngine::new(
            state.clone(),
            ports,
            settings.dry_run,
        ));

        Ok(Self {
            settings,
            local,
            remote,
            scanner: TreeScanner::new(ScanConfig::default()),
            state,
            engine,
        })
    }

    /// 启动引导：两侧全量扫描建表，随后跑一轮全量对账。
    /// 任一侧初始扫描失败视为致命错误，向上冒泡。
    pub async fn bootstrap(&self) -> Result<PassReport> {
        info!(
            "启动引导: {} <-> {}{}",
            self.local.name(),
            self.remote.name(),
            if self.settings.dry_run { " (dry-run)" } else { "" }
        );

        let local_scan = self
            .scanner
            .scan_local(&self.local)
            .await
            .context("初始本地扫描失败")?;
        let remote_scan = self
            .scanner
            .scan_remote(self.remote.as_ref())
            .await
            .context("初始远端列表失败")?;

        // 指纹未知的路径本轮不参与对账，下一轮扫描重试
        let mut unresolved = local_scan.unknown;
        unresolved.extend(remote_scan.unknown);

        {
            let mut state = self.state.write().await;
            state.local = local_scan.store;
            state.remote = remote_scan.store;
        }

        Ok(self.engine.run_full_pass(&unresolved).await)
    }

    /// 单次同步后退出（sync 子命令）
    pub async fn run_once(&self) -> Result<PassReport> {
        self.bootstrap().await
    }

    /// 常驻模式：本地事件监听 + 周期远端检测，直到收到取消信号
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        self.bootstrap().await?;

        let (tx, mut rx) = tokio::sync::mpsc::channel::<LocalChange>(EVENT_CHANNEL_CAPACITY);
        let watcher_handle =
            watcher::spawn_watcher(self.local.clone(), self.scanner.clone(), tx, token.clone());

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.settings.poll_interval_secs));
        // 第一个 tick 立即触发，引导阶段已经覆盖
        interval.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("收到停止信号，退出同步循环");
                    break;
                }
                maybe = rx.recv() => {
                    match maybe {
                        Some(change) => self.engine.apply_event(change).await,
                        None => {
                            warn!("监听通道已关闭，退出同步循环");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    self.periodic_pass().await;
                }
            }
        }

        drop(rx);
        match watcher_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("监听线程异常退出: {}", e),
            Err(e) => warn!("监听线程回收失败: {}", e),
        }
        Ok(())
    }

    /// 周期任务：远端列表 -> 时效下载 -> 全量对账。
    /// 列表失败只跳过本轮，状态表保持不变。
    async fn periodic_pass(&self) {
        let scan = match self.scanner.scan_remote(self.remote.as_ref()).await {
            Ok(scan) => scan,
            Err(e) => {
                warn!("{}，跳过本轮周期检测", e);
                return;
            }
        };

        self.engine.refresh_remote(scan.store, &scan.unknown).await;
        self.engine.run_full_pass(&scan.unknown).await;
    }
}
