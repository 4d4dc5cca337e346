use crate::adapters::{camera, object_store, ImageStorage, SysinfoDiskSpace};
use crate::config::toml_config::AppConfig;
use crate::core::engine::{shutdown_signal, DetectionEngine, RunSummary};
use crate::core::upload::{UploadQueue, Uploader};
use crate::domain::ports::{DiskSpace, FrameSource};
use crate::utils::error::{DetectorError, Result};
use crate::utils::monitor::SystemMonitor;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub max_frames: Option<u64>,
    pub monitor: bool,
    pub no_upload: bool,
}

pub async fn run_detection(config: &AppConfig, options: RunOptions) -> Result<RunSummary> {
    let source = camera::from_config(&config.camera)?;
    run_detection_with(
        config,
        options,
        source,
        Arc::new(SysinfoDiskSpace),
        shutdown_signal(),
    )
    .await
}

/// 組裝並執行偵測流程，來源、磁碟與停止訊號由呼叫端提供
pub async fn run_detection_with<F>(
    config: &AppConfig,
    options: RunOptions,
    source: Box<dyn FrameSource>,
    disk: Arc<dyn DiskSpace>,
    shutdown: F,
) -> Result<RunSummary>
where
    F: Future<Output = ()>,
{
    let storage = ImageStorage::new(config.storage.clone(), disk)?;
    tracing::info!("📁 Storing captures under {}", storage.images_path().display());

    let mut monitor = SystemMonitor::new(options.monitor);
    if monitor.is_enabled() {
        tracing::info!("🔍 System monitoring enabled");
        monitor.log_stats("Startup");
    }

    let mut engine = DetectionEngine::new(source, config, storage)
        .with_monitor(monitor)
        .with_max_frames(options.max_frames);

    if config.upload.enabled && !options.no_upload {
        let store = object_store::from_config(&config.upload).await?;
        tracing::info!("☁️  Uploading captures to {}", store.describe());
        let uploader = Uploader::from_config(store, &config.upload);
        engine = engine.with_uploads(UploadQueue::start(uploader, config.upload.queue_capacity));
    }

    let summary = engine.run(shutdown).await?;
    tracing::info!(
        "Processed {} frame(s): {} detection(s), {} new object(s), {} saved, {} capture failure(s)",
        summary.frames,
        summary.detections,
        summary.new_objects,
        summary.saved,
        summary.capture_failures
    );
    Ok(summary)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pending: usize,
    pub uploaded: usize,
    pub failed: usize,
}

pub async fn sync_pending(config: &AppConfig) -> Result<SyncReport> {
    sync_pending_with(config, Arc::new(SysinfoDiskSpace)).await
}

/// 重新上傳所有沒有 `uploaded_at` 的快照
pub async fn sync_pending_with(config: &AppConfig, disk: Arc<dyn DiskSpace>) -> Result<SyncReport> {
    config.validate_config()?;
    if !config.upload.enabled {
        return Err(DetectorError::config("upload.enabled is false, nothing to sync to"));
    }
    let storage = ImageStorage::new(config.storage.clone(), disk)?;
    let pending = storage.pending_uploads()?;
    let count = pending.len();
    if count == 0 {
        tracing::info!("Nothing to upload");
        return Ok(SyncReport::default());
    }

    let store = object_store::from_config(&config.upload).await?;
    tracing::info!("☁️  Uploading {} pending capture(s) to {}", count, store.describe());
    let uploader = Uploader::from_config(store, &config.upload);
    let (uploaded, failed) = uploader.sync(pending).await;

    Ok(SyncReport {
        pending: count,
        uploaded,
        failed,
    })
}

pub fn cleanup(config: &AppConfig, days: Option<i64>) -> Result<usize> {
    cleanup_with(config, days, Arc::new(SysinfoDiskSpace))
}

pub fn cleanup_with(config: &AppConfig, days: Option<i64>, disk: Arc<dyn DiskSpace>) -> Result<usize> {
    let days = days.unwrap_or(config.storage.days_to_keep);
    let storage = ImageStorage::new(config.storage.clone(), disk)?;
    let removed = storage.cleanup_old_files(days)?;
    tracing::info!("🧹 Removed {} directory(ies) older than {} day(s)", removed, days);
    Ok(removed)
}
