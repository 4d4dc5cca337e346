use crate::config::toml_config::{UploadConfig, UploadTarget};
use crate::domain::ports::ObjectStore;
use crate::utils::error::{DetectorError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// 依設定建立上傳目的地
pub async fn from_config(config: &UploadConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.target {
        UploadTarget::Directory => {
            let dir = config.directory.as_ref().ok_or_else(|| DetectorError::MissingConfigError {
                field: "upload.directory".to_string(),
            })?;
            Ok(Arc::new(DirectoryObjectStore::new(dir)))
        }
        #[cfg(feature = "s3")]
        UploadTarget::S3 => Ok(Arc::new(s3::S3ObjectStore::from_config(config).await?)),
        #[cfg(not(feature = "s3"))]
        UploadTarget::S3 => Err(DetectorError::config(
            "S3 upload requires the `s3` feature",
        )),
    }
}

/// Mirrors objects into a local directory, keys become relative paths.
#[derive(Debug, Clone)]
pub struct DirectoryObjectStore {
    root: PathBuf,
}

impl DirectoryObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for DirectoryObjectStore {
    async fn put_object(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<()> {
        if key.split('/').any(|part| part == "..") {
            return Err(DetectorError::UploadError {
                key: key.to_string(),
                message: "key must not contain '..'".to_string(),
            });
        }
        let full_path = self.root.join(key.trim_start_matches('/'));
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, data)
            .await
            .map_err(|e| DetectorError::UploadError {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    fn describe(&self) -> String {
        format!("dir://{}", self.root.display())
    }
}

#[cfg(feature = "s3")]
pub mod s3 {
    use super::*;
    use aws_config::BehaviorVersion;
    use aws_sdk_s3::config::Region;
    use aws_sdk_s3::error::DisplayErrorContext;
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::Client as S3Client;

    #[derive(Debug, Clone)]
    pub struct S3ObjectStore {
        client: S3Client,
        bucket: String,
    }

    impl S3ObjectStore {
        pub fn new(client: S3Client, bucket: String) -> Self {
            Self { client, bucket }
        }

        /// 憑證走 AWS 預設鏈 (環境變數、~/.aws、instance profile)
        pub async fn from_config(config: &UploadConfig) -> Result<Self> {
            let bucket = config.bucket.clone().ok_or_else(|| DetectorError::MissingConfigError {
                field: "upload.bucket".to_string(),
            })?;

            let shared = aws_config::load_defaults(BehaviorVersion::latest()).await;
            let mut builder = aws_sdk_s3::config::Builder::from(&shared)
                .region(Region::new(config.region.clone()));
            if let Some(endpoint) = &config.endpoint_url {
                // MinIO 等相容服務需要 path-style
                builder = builder.endpoint_url(endpoint).force_path_style(true);
            }

            Ok(Self::new(S3Client::from_conf(builder.build()), bucket))
        }
    }

    #[async_trait]
    impl ObjectStore for S3ObjectStore {
        async fn put_object(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_type(content_type)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| DetectorError::UploadError {
                    key: key.to_string(),
                    message: DisplayErrorContext(&e).to_string(),
                })?;
            Ok(())
        }

        fn describe(&self) -> String {
            format!("s3://{}", self.bucket)
        }
    }
}
