use super::{ObjectStore, RemoteObject, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::config::Settings;
use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::time::Duration;

pub struct S3Store {
    operator: Operator,
    name: String,
}

impl S3Store {
    pub fn new(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<String>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!("s3://{}", bucket);

        Ok(Self { operator, name })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.bucket,
            &settings.region,
            &settings.access_key_id,
            &settings.secret_access_key,
            settings.endpoint.clone(),
        )
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list(&self) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();

        let mut lister = self
            .operator
            .lister_with("")
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let path = entry.path().to_string();

            // 跳过根目录
            if path.is_empty() || path == "/" {
                continue;
            }

            let meta = entry.metadata();

            objects.push(RemoteObject {
                key: path.trim_start_matches('/').to_string(),
                etag: meta.etag().map(|s| s.trim_matches('"').to_string()),
                last_modified: meta.last_modified().map_or(0, |t| t.timestamp()),
                size: meta.content_length(),
                is_dir: meta.is_dir(),
            });
        }

        Ok(objects)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let data = self.operator.read(key).await?;
        Ok(data.to_vec())
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.operator.write(key, data).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // S3 删除不存在的键不会报错
        self.operator.delete(key).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
