use crate::adapters::ppm;
use crate::adapters::storage::ImageStorage;
use crate::config::toml_config::UploadConfig;
use crate::domain::model::StoredCapture;
use crate::domain::ports::ObjectStore;
use crate::utils::error::{DetectorError, Result};
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// 第 `attempt` 次失敗後的等待時間 (從 1 起算)，每次加倍並設上限
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// `<prefix>/<YYYY-MM-DD>/<file name>`
pub fn object_key(prefix: &str, capture: &StoredCapture, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/{}", capture.date_dir(), file_name)
    } else {
        format!("{}/{}/{}", prefix, capture.date_dir(), file_name)
    }
}

fn file_name(path: &std::path::Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| DetectorError::storage(format!("invalid capture path '{}'", path.display())))
}

/// Uploads the snapshot first, then its metadata.
pub async fn upload_capture(store: &dyn ObjectStore, prefix: &str, capture: &StoredCapture) -> Result<()> {
    let image_key = object_key(prefix, capture, &file_name(&capture.image_path)?);
    let image = tokio::fs::read(&capture.image_path).await?;
    store.put_object(&image_key, image, ppm::CONTENT_TYPE).await?;

    let metadata_key = object_key(prefix, capture, &file_name(&capture.metadata_path)?);
    let metadata = serde_json::to_vec_pretty(&capture.metadata)?;
    store
        .put_object(&metadata_key, metadata, "application/json")
        .await?;
    Ok(())
}

#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    policy: RetryPolicy,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            policy,
        }
    }

    pub fn from_config(store: Arc<dyn ObjectStore>, config: &UploadConfig) -> Self {
        Self::new(store, config.prefix.clone(), RetryPolicy::from_config(config))
    }

    /// 上傳並在成功後標記；重試用盡則回傳最後一次錯誤
    pub async fn upload_with_retry(&self, capture: &StoredCapture) -> Result<StoredCapture> {
        let mut attempt = 1;
        loop {
            match upload_capture(self.store.as_ref(), &self.prefix, capture).await {
                Ok(()) => {
                    tracing::info!(
                        "☁️  Uploaded {} to {}",
                        capture.metadata.object_id,
                        self.store.describe()
                    );
                    return ImageStorage::mark_uploaded(capture, Local::now());
                }
                Err(e) if attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        "Upload attempt {}/{} for {} failed: {}. Retrying in {:?}",
                        attempt,
                        self.policy.max_attempts,
                        capture.metadata.object_id,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "Giving up on {} after {} attempt(s): {}",
                        capture.metadata.object_id,
                        attempt,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Uploads every pending capture; returns (uploaded, failed).
    pub async fn sync(&self, pending: Vec<StoredCapture>) -> (usize, usize) {
        let mut uploaded = 0;
        let mut failed = 0;
        for capture in pending {
            match self.upload_with_retry(&capture).await {
                Ok(_) => uploaded += 1,
                Err(_) => failed += 1,
            }
        }
        (uploaded, failed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub uploaded: usize,
    pub failed: usize,
}

/// 背景上傳佇列，單一 worker 依序處理
pub struct UploadQueue {
    sender: Option<mpsc::Sender<StoredCapture>>,
    worker: Option<JoinHandle<UploadStats>>,
}

impl UploadQueue {
    pub fn start(uploader: Uploader, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<StoredCapture>(capacity.max(1));
        let worker = tokio::spawn(async move {
            let mut stats = UploadStats::default();
            while let Some(capture) = receiver.recv().await {
                match uploader.upload_with_retry(&capture).await {
                    Ok(_) => stats.uploaded += 1,
                    Err(_) => stats.failed += 1,
                }
            }
            stats
        });
        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Never blocks the capture loop; a full queue leaves the capture on
    /// disk for the next `sync`.
    pub fn enqueue(&self, capture: StoredCapture) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(capture) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(capture)) => {
                tracing::warn!(
                    "Upload queue full, {} stays pending until next sync",
                    capture.metadata.object_id
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// 關閉佇列並等待剩餘項目處理完
    pub async fn shutdown(mut self) -> UploadStats {
        self.sender.take();
        match self.worker.take() {
            Some(worker) => worker.await.unwrap_or_else(|e| {
                tracing::error!("Upload worker panicked: {}", e);
                UploadStats::default()
            }),
            None => UploadStats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{BoundingBox, CaptureMetadata, FrameSize};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct FlakyStore {
        failures_left: Arc<Mutex<u32>>,
        objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        attempts: Arc<Mutex<u32>>,
    }

    impl FlakyStore {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: Arc::new(Mutex::new(times)),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn put_object(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<()> {
            *self.attempts.lock().await += 1;
            let mut failures = self.failures_left.lock().await;
            if *failures > 0 {
                *failures -= 1;
                return Err(DetectorError::UploadError {
                    key: key.to_string(),
                    message: "connection reset".to_string(),
                });
            }
            self.objects.lock().await.insert(key.to_string(), data);
            Ok(())
        }

        fn describe(&self) -> String {
            "mock://flaky".to_string()
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn write_capture(dir: &TempDir) -> StoredCapture {
        let day = dir.path().join("2024-05-17");
        std::fs::create_dir_all(&day).unwrap();
        let image_path = day.join("21-30-00_object_x.ppm");
        let metadata_path = image_path.with_extension("json");
        let metadata = CaptureMetadata {
            object_id: "x".to_string(),
            timestamp: chrono::TimeZone::with_ymd_and_hms(&Local, 2024, 5, 17, 21, 30, 0).unwrap(),
            bbox: BoundingBox::new(0, 0, 1, 1),
            frame_size: FrameSize { width: 1, height: 1 },
            track_id: None,
            uploaded_at: None,
        };
        std::fs::write(&image_path, b"P6\n1 1\n255\nabc").unwrap();
        std::fs::write(&metadata_path, serde_json::to_vec(&metadata).unwrap()).unwrap();
        StoredCapture {
            image_path,
            metadata_path,
            metadata,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(3000),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_millis(3000));
        assert_eq!(policy.backoff(40), Duration::from_millis(3000));
    }

    #[test]
    fn test_object_key_layout() {
        let capture = StoredCapture {
            image_path: PathBuf::from("a.ppm"),
            metadata_path: PathBuf::from("a.json"),
            metadata: CaptureMetadata {
                object_id: "a".to_string(),
                timestamp: chrono::TimeZone::with_ymd_and_hms(&Local, 2024, 1, 2, 3, 4, 5).unwrap(),
                bbox: BoundingBox::new(0, 0, 1, 1),
                frame_size: FrameSize { width: 1, height: 1 },
                track_id: None,
                uploaded_at: None,
            },
        };
        assert_eq!(object_key("captures/", &capture, "a.ppm"), "captures/2024-01-02/a.ppm");
        assert_eq!(object_key("", &capture, "a.ppm"), "2024-01-02/a.ppm");
    }

    #[tokio::test]
    async fn test_retries_until_success_and_marks_uploaded() {
        let dir = TempDir::new().unwrap();
        let capture = write_capture(&dir);
        let store = FlakyStore::failing(2);
        let uploader = Uploader::new(Arc::new(store.clone()), "captures", fast_policy(5));

        let uploaded = uploader.upload_with_retry(&capture).await.unwrap();

        assert!(uploaded.metadata.uploaded_at.is_some());
        assert_eq!(*store.attempts.lock().await, 4); // 2 failures + image + metadata
        let objects = store.objects.lock().await;
        assert!(objects.contains_key("captures/2024-05-17/21-30-00_object_x.ppm"));
        assert!(objects.contains_key("captures/2024-05-17/21-30-00_object_x.json"));

        let on_disk = crate::adapters::storage::read_metadata(&capture.metadata_path).unwrap();
        assert!(on_disk.uploaded_at.is_some());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let dir = TempDir::new().unwrap();
        let capture = write_capture(&dir);
        let store = FlakyStore::failing(100);
        let uploader = Uploader::new(Arc::new(store.clone()), "captures", fast_policy(3));

        let result = uploader.upload_with_retry(&capture).await;

        assert!(matches!(result, Err(DetectorError::UploadError { .. })));
        assert_eq!(*store.attempts.lock().await, 3);
        let on_disk = crate::adapters::storage::read_metadata(&capture.metadata_path).unwrap();
        assert!(on_disk.uploaded_at.is_none());
    }

    #[tokio::test]
    async fn test_queue_drains_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let capture = write_capture(&dir);
        let store = FlakyStore::default();
        let uploader = Uploader::new(Arc::new(store.clone()), "captures", fast_policy(2));

        let queue = UploadQueue::start(uploader, 4);
        assert!(queue.enqueue(capture));
        let stats = queue.shutdown().await;

        assert_eq!(stats, UploadStats { uploaded: 1, failed: 0 });
        assert_eq!(store.objects.lock().await.len(), 2);
    }
}
