//! 日志模块 - 文件日志与大小轮转

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 最大日志文件大小（MB）
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 5,
            level: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// 从环境变量读取覆盖项
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_size_mb: std::env::var("BUCKETSYNC_LOG_MAX_SIZE_MB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_size_mb),
            level: std::env::var("BUCKETSYNC_LOG_LEVEL").unwrap_or(defaults.level),
        }
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小限制的日志写入器
///
/// 超过上限时把当前文件重命名为 app.log.old 后重新打开，只保留一份备份。
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join("app.log");
        let max_size = (max_size_mb as u64) * 1024 * 1024;
        let writer = Self::open_file(&file_path, max_size)?;

        Ok(Self {
            file_path,
            max_size,
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    fn open_file(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        if let Ok(metadata) = fs::metadata(file_path) {
            if metadata.len() > max_size {
                Self::rotate_log(file_path)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(file_path)?;
        Ok(BufWriter::new(file))
    }

    /// 轮转日志文件
    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let backup_path = file_path.with_extension("log.old");
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(file_path, &backup_path)?;
        Ok(())
    }
}

/// 日志写入器包装
pub struct LogWriter {
    inner: Arc<Mutex<Option<BufWriter<File>>>>,
    file_path: PathBuf,
    max_size: u64,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock().unwrap();

        let Some(writer) = guard.as_mut() else {
            return Err(io::Error::other("日志写入器不可用"));
        };
        let written = writer.write(buf)?;
        writer.flush()?;

        // 超限则轮转后重新打开
        if let Ok(metadata) = fs::metadata(&self.file_path) {
            if metadata.len() > self.max_size {
                if let Some(mut w) = guard.take() {
                    let _ = w.flush();
                }
                let _ = SizeRotatingWriter::rotate_log(&self.file_path);
                if let Ok(new_writer) = SizeRotatingWriter::open_file(&self.file_path, self.max_size)
                {
                    *guard = Some(new_writer);
                }
            }
        }

        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self.inner.lock().unwrap();
        match guard.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            inner: self.writer.clone(),
            file_path: self.file_path.clone(),
            max_size: self.max_size,
        }
    }
}

/// 获取日志目录路径
pub fn log_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("bucketsync").join("logs"))
        .unwrap_or_else(|| PathBuf::from(".bucketsync/logs"))
}

/// 初始化日志系统：文件 + 控制台两路输出
pub fn init(config: &LogConfig) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(config.tracing_level().into())
        .add_directive("opendal=warn".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap());

    // 文件层可选：创建失败时回退为纯控制台输出
    let dir = log_dir();
    let file_layer = SizeRotatingWriter::new(&dir, config.max_size_mb)
        .ok()
        .map(|file_writer| {
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
        });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing_falls_back_to_info() {
        let config = LogConfig {
            max_size_mb: 5,
            level: "verbose".to_string(),
        };
        assert_eq!(config.tracing_level(), tracing::Level::INFO);

        let config = LogConfig {
            max_size_mb: 5,
            level: "Debug".to_string(),
        };
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn init_builds_layer_stack_and_is_idempotent() {
        let config = LogConfig::default();
        // 第二次调用时全局 subscriber 已设置，静默忽略
        init(&config);
        init(&config);
        tracing::info!("日志初始化自检");
    }

    #[test]
    fn rotation_keeps_single_backup() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SizeRotatingWriter::new(dir.path(), 0).unwrap();

        let mut sink = writer.make_writer();
        sink.write_all(b"first line that exceeds the zero-byte cap\n")
            .unwrap();
        // 第二次写入时上一次的内容已超限，触发轮转
        sink.write_all(b"second line\n").unwrap();

        assert!(dir.path().join("app.log").exists());
        assert!(dir.path().join("app.log.old").exists());
    }
}
