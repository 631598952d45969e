use bucketsync_lib::logging::{self, LogConfig};
use bucketsync_lib::{Orchestrator, Settings};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "bucketsync", version, about = "本地目录与 S3 桶的双向同步")]
struct Cli {
    /// 本地同步根目录（覆盖 BUCKETSYNC_LOCAL_ROOT）
    #[arg(long, global = true)]
    root: Option<std::path::PathBuf>,

    /// 只报告决策，不执行任何写操作
    #[arg(long, global = true)]
    dry_run: bool,

    /// 周期对账间隔秒数（覆盖 BUCKETSYNC_POLL_INTERVAL_SECS）
    #[arg(long, global = true)]
    poll_interval: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 常驻运行：监听本地变更并周期对账
    Run,
    /// 执行一轮全量同步后退出
    Sync,
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::from_env()?;
    if let Some(root) = &cli.root {
        settings.local_root = root.clone();
    }
    if cli.dry_run {
        settings.dry_run = true;
    }
    if let Some(interval) = cli.poll_interval {
        settings.poll_interval_secs = interval;
    }
    settings.validate()?;
    Ok(settings)
}

#[tokio::main]
async fn main() {
    logging::init(&LogConfig::from_env());

    let cli = Cli::parse();
    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            error!("配置错误: {:#}", e);
            std::process::exit(1);
        }
    };

    let orchestrator = match Orchestrator::new(settings) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("初始化失败: {:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Sync => orchestrator.run_once().await.and_then(|report| {
            info!(
                "同步完成: 下载 {}, 上传 {}, 删除 {}, 失败 {}",
                report.downloads, report.uploads, report.deletes, report.failures
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }),
        Command::Run => {
            let token = CancellationToken::new();
            let cancel = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("收到 Ctrl-C");
                    cancel.cancel();
                }
            });
            orchestrator.run(token).await
        }
    };

    if let Err(e) = result {
        error!("同步失败: {:#}", e);
        std::process::exit(1);
    }
}
