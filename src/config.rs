//! 运行配置 - 从环境变量加载

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 同步目标与运行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub local_root: PathBuf,
    /// 自定义 S3 兼容端点（可选）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// 只报告决策，不执行任何写操作
    #[serde(default)]
    pub dry_run: bool,
    /// 周期对账间隔（秒）
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    60
}

impl Settings {
    /// 从进程环境变量加载
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意查找函数加载（便于测试）
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| get(key).with_context(|| format!("缺少环境变量 {}", key));

        let poll_interval_secs = match get("BUCKETSYNC_POLL_INTERVAL_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("BUCKETSYNC_POLL_INTERVAL_SECS 无效: {}", raw))?,
            None => default_poll_interval(),
        };

        Ok(Self {
            region: require("BUCKETSYNC_REGION")?,
            access_key_id: require("BUCKETSYNC_ACCESS_KEY_ID")?,
            secret_access_key: require("BUCKETSYNC_SECRET_ACCESS_KEY")?,
            bucket: require("BUCKETSYNC_BUCKET")?,
            local_root: PathBuf::from(require("BUCKETSYNC_LOCAL_ROOT")?),
            endpoint: get("BUCKETSYNC_ENDPOINT"),
            dry_run: get("BUCKETSYNC_DRY_RUN")
                .map(|v| parse_bool(&v))
                .unwrap_or(false),
            poll_interval_secs,
        })
    }

    /// 启动前校验；失败视为不可恢复，进程应以非零码退出
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            anyhow::bail!("bucket 不能为空");
        }
        if !self.local_root.is_dir() {
            anyhow::bail!("本地根目录不存在: {}", self.local_root.display());
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("轮询间隔必须大于 0");
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, String> {
        let dir = std::env::temp_dir();
        HashMap::from([
            ("BUCKETSYNC_REGION", "us-east-1".to_string()),
            ("BUCKETSYNC_ACCESS_KEY_ID", "ak".to_string()),
            ("BUCKETSYNC_SECRET_ACCESS_KEY", "sk".to_string()),
            ("BUCKETSYNC_BUCKET", "mybucket".to_string()),
            ("BUCKETSYNC_LOCAL_ROOT", dir.to_string_lossy().into_owned()),
        ])
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<Settings> {
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn loads_required_fields_with_defaults() {
        let settings = load(&base_env()).unwrap();
        assert_eq!(settings.region, "us-east-1");
        assert_eq!(settings.bucket, "mybucket");
        assert!(!settings.dry_run);
        assert_eq!(settings.poll_interval_secs, 60);
        assert!(settings.endpoint.is_none());
    }

    #[test]
    fn missing_credential_is_an_error() {
        let mut env = base_env();
        env.remove("BUCKETSYNC_SECRET_ACCESS_KEY");
        assert!(load(&env).is_err());
    }

    #[test]
    fn parses_dry_run_and_interval() {
        let mut env = base_env();
        env.insert("BUCKETSYNC_DRY_RUN", "true".to_string());
        env.insert("BUCKETSYNC_POLL_INTERVAL_SECS", "15".to_string());
        let settings = load(&env).unwrap();
        assert!(settings.dry_run);
        assert_eq!(settings.poll_interval_secs, 15);
    }

    #[test]
    fn rejects_invalid_interval() {
        let mut env = base_env();
        env.insert("BUCKETSYNC_POLL_INTERVAL_SECS", "soon".to_string());
        assert!(load(&env).is_err());
    }

    #[test]
    fn validate_rejects_missing_root() {
        let mut env = base_env();
        env.insert(
            "BUCKETSYNC_LOCAL_ROOT",
            "/definitely/not/a/real/path".to_string(),
        );
        let settings = load(&env).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut env = base_env();
        env.insert("BUCKETSYNC_POLL_INTERVAL_SECS", "0".to_string());
        let settings = load(&env).unwrap();
        assert!(settings.validate().is_err());
    }
}
