use crate::adapters::storage::ImageStorage;
use crate::config::toml_config::{AppConfig, EngineConfig};
use crate::core::detector::MotionDetector;
use crate::core::tracker::ObjectTracker;
use crate::core::upload::{UploadQueue, UploadStats};
use crate::domain::model::{Frame, StoredCapture};
use crate::domain::ports::FrameSource;
use crate::utils::error::{DetectorError, Result};
use crate::utils::monitor::SystemMonitor;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub detections: u64,
    pub new_objects: u64,
    pub saved: u64,
    pub capture_failures: u64,
    pub uploads: UploadStats,
}

#[derive(Debug, Default)]
struct FrameOutcome {
    detections: usize,
    new_objects: usize,
    saved: Vec<StoredCapture>,
}

/// 偵測 → 追蹤 → 儲存；CPU 與檔案 I/O 都在這裡，交給 blocking 執行緒
struct FramePipeline {
    detector: MotionDetector,
    tracker: ObjectTracker,
    storage: ImageStorage,
}

impl FramePipeline {
    fn process(&mut self, frame: &Frame) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();
        let detections = match self.detector.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::error!("Detection failed, rebuilding background: {}", e);
                self.detector.reset();
                return outcome;
            }
        };
        outcome.detections = detections.len();

        let entered = self.tracker.update(&detections, frame.captured_at);
        outcome.new_objects = entered.len();

        // 被頻率限制略過的物件留在 unsaved，之後的影格再存
        let candidates = if self.tracker.is_enabled() {
            self.tracker.unsaved()
        } else {
            entered
        };

        for object in candidates {
            match self.storage.save_detected_object_at(
                frame,
                object.bbox,
                Some(object.id),
                frame.captured_at,
            ) {
                Ok(Some(capture)) => {
                    self.tracker.mark_saved(object.id);
                    outcome.saved.push(capture);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Failed to save detected object: {}", e);
                }
            }
        }
        outcome
    }
}

/// 擷取 → 偵測 → 追蹤 → 儲存 → 上傳 的主迴圈
pub struct DetectionEngine {
    source: Box<dyn FrameSource>,
    pipeline: Option<FramePipeline>,
    uploads: Option<UploadQueue>,
    config: EngineConfig,
    monitor: SystemMonitor,
    max_frames: Option<u64>,
}

impl DetectionEngine {
    pub fn new(source: Box<dyn FrameSource>, app: &AppConfig, storage: ImageStorage) -> Self {
        Self {
            source,
            pipeline: Some(FramePipeline {
                detector: MotionDetector::new(app.detector.clone()),
                tracker: ObjectTracker::new(app.tracking.clone()),
                storage,
            }),
            uploads: None,
            config: app.engine.clone(),
            monitor: SystemMonitor::default(),
            max_frames: None,
        }
    }

    pub fn with_uploads(mut self, queue: UploadQueue) -> Self {
        self.uploads = Some(queue);
        self
    }

    pub fn with_monitor(mut self, monitor: SystemMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Runs until `shutdown` resolves, the source ends, or `max_frames` is
    /// reached. The source is always released and queued uploads drained.
    pub async fn run<F>(mut self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        self.source.initialize().await.map_err(|e| {
            tracing::error!("Failed to initialize camera: {}", e);
            e
        })?;

        tracing::info!("Starting detection loop");
        let result = self.detection_loop(shutdown).await;

        self.source.release().await;
        let uploads = match self.uploads.take() {
            Some(queue) => {
                tracing::info!("Waiting for queued uploads to finish...");
                queue.shutdown().await
            }
            None => UploadStats::default(),
        };
        self.monitor.log_final_stats();
        tracing::info!("Cleanup complete");

        let mut summary = result?;
        summary.uploads = uploads;
        Ok(summary)
    }

    async fn detection_loop<F>(&mut self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let mut summary = RunSummary::default();
        let mut consecutive_failures = 0u32;
        let frame_interval = Duration::from_millis(self.config.frame_interval_ms);
        tokio::pin!(shutdown);

        loop {
            if let Some(max) = self.max_frames {
                if summary.frames >= max {
                    tracing::info!("Reached {} frame(s), stopping", max);
                    break;
                }
            }

            let captured = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Shutting down...");
                    break;
                }
                captured = self.source.capture_frame() => captured,
            };

            match captured {
                Ok(Some(frame)) => {
                    consecutive_failures = 0;
                    summary.frames += 1;
                    self.process_frame(frame, &mut summary).await?;

                    if self.monitor.is_enabled()
                        && self.config.monitor_every_frames > 0
                        && summary.frames % self.config.monitor_every_frames == 0
                    {
                        self.monitor.log_stats(&format!("Frame {}", summary.frames));
                    }
                }
                Ok(None) => {
                    tracing::info!("Frame source exhausted after {} frame(s)", summary.frames);
                    break;
                }
                Err(e) => {
                    summary.capture_failures += 1;
                    consecutive_failures += 1;
                    tracing::error!("Failed to capture frame: {}", e);
                    if consecutive_failures > self.config.max_consecutive_failures {
                        return Err(DetectorError::capture(format!(
                            "{} consecutive capture failures, last: {}",
                            consecutive_failures, e
                        )));
                    }
                }
            }

            if !frame_interval.is_zero() {
                tokio::time::sleep(frame_interval).await;
            }
        }

        Ok(summary)
    }

    async fn process_frame(&mut self, frame: Frame, summary: &mut RunSummary) -> Result<()> {
        let mut pipeline = self.pipeline.take().ok_or_else(|| DetectorError::DetectionError {
            message: "frame pipeline is unavailable".to_string(),
        })?;
        let (pipeline, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = pipeline.process(&frame);
            (pipeline, outcome)
        })
        .await
        .map_err(|e| DetectorError::DetectionError {
            message: format!("frame processing task failed: {}", e),
        })?;
        self.pipeline = Some(pipeline);

        summary.detections += outcome.detections as u64;
        summary.new_objects += outcome.new_objects as u64;
        for capture in outcome.saved {
            summary.saved += 1;
            if let Some(queue) = &self.uploads {
                queue.enqueue(capture);
            }
        }
        Ok(())
    }
}

/// Ctrl-C 或 SIGTERM (systemd stop)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::camera::{SyntheticScene, SyntheticSource};
    use crate::domain::model::BoundingBox;
    use crate::domain::ports::DiskSpace;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct PlentyOfSpace;

    impl DiskSpace for PlentyOfSpace {
        fn available_bytes(&self, _path: &Path) -> Result<u64> {
            Ok(u64::MAX)
        }
    }

    struct BrokenCamera {
        released: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl FrameSource for BrokenCamera {
        async fn initialize(&mut self) -> Result<()> {
            Ok(())
        }

        async fn capture_frame(&mut self) -> Result<Option<Frame>> {
            Err(DetectorError::capture("Failed to capture frame"))
        }

        async fn release(&mut self) {
            self.released.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    /// 影格間隔 200ms；A 從第 2 張出現，B 從第 4 張出現，兩者都停留在畫面上
    struct StaggeredCamera {
        index: i64,
        limit: i64,
        start: chrono::DateTime<chrono::Local>,
    }

    #[async_trait]
    impl FrameSource for StaggeredCamera {
        async fn initialize(&mut self) -> Result<()> {
            Ok(())
        }

        async fn capture_frame(&mut self) -> Result<Option<Frame>> {
            if self.index >= self.limit {
                return Ok(None);
            }
            let mut frame = Frame::filled(80, 60, [60, 90, 60]);
            if self.index >= 2 {
                frame.fill_rect(BoundingBox::new(5, 5, 12, 12), [220, 200, 180]);
            }
            if self.index >= 4 {
                frame.fill_rect(BoundingBox::new(55, 40, 12, 12), [220, 200, 180]);
            }
            frame.captured_at = self.start + chrono::Duration::milliseconds(200 * self.index);
            self.index += 1;
            Ok(Some(frame))
        }

        async fn release(&mut self) {}
    }

    fn app_config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.base_path = dir.path().to_str().unwrap().to_string();
        config.storage.min_save_interval_secs = 0;
        config.engine.frame_interval_ms = 0;
        config.detector.blur_size = 3;
        config.detector.min_area = 50;
        config
    }

    fn storage(config: &AppConfig) -> ImageStorage {
        ImageStorage::new(config.storage.clone(), Arc::new(PlentyOfSpace)).unwrap()
    }

    #[tokio::test]
    async fn test_synthetic_object_is_saved_once() {
        let dir = TempDir::new().unwrap();
        let config = app_config(&dir);
        let scene = SyntheticScene {
            appear_after: 3,
            step: 1,
            object_side: 12,
            frame_limit: Some(8),
            ..SyntheticScene::default()
        };
        let source = Box::new(SyntheticSource::new(80, 60, scene));

        let engine = DetectionEngine::new(source, &config, storage(&config));
        let summary = engine.run(std::future::pending()).await.unwrap();

        assert_eq!(summary.frames, 8);
        assert_eq!(summary.capture_failures, 0);
        assert!(summary.detections >= 1);
        assert_eq!(summary.new_objects, 1);
        assert_eq!(summary.saved, 1);
    }

    #[tokio::test]
    async fn test_object_skipped_by_rate_limit_is_saved_later() {
        let dir = TempDir::new().unwrap();
        let mut config = app_config(&dir);
        config.storage.min_save_interval_secs = 1;
        let source = Box::new(StaggeredCamera {
            index: 0,
            limit: 10,
            start: chrono::Local::now(),
        });

        let engine = DetectionEngine::new(source, &config, storage(&config));
        let summary = engine.run(std::future::pending()).await.unwrap();

        // A 在第 2 張存檔；B 在第 4 張出現時未滿 1 秒，第 7 張 (1.0 秒後) 補存
        assert_eq!(summary.frames, 10);
        assert_eq!(summary.new_objects, 2);
        assert_eq!(summary.saved, 2);

        let pending = storage(&config).pending_uploads().unwrap();
        let ids: Vec<Option<u64>> = pending.iter().map(|c| c.metadata.track_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&Some(1)) && ids.contains(&Some(2)));
    }

    #[tokio::test]
    async fn test_max_frames_stops_loop() {
        let dir = TempDir::new().unwrap();
        let config = app_config(&dir);
        let source = Box::new(SyntheticSource::new(32, 24, SyntheticScene::default()));

        let engine = DetectionEngine::new(source, &config, storage(&config)).with_max_frames(Some(5));
        let summary = engine.run(std::future::pending()).await.unwrap();

        assert_eq!(summary.frames, 5);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_loop() {
        let dir = TempDir::new().unwrap();
        let config = app_config(&dir);
        let source = Box::new(SyntheticSource::new(32, 24, SyntheticScene::default()));

        let engine = DetectionEngine::new(source, &config, storage(&config));
        let summary = engine.run(async {}).await.unwrap();

        assert_eq!(summary.frames, 0);
    }

    #[tokio::test]
    async fn test_consecutive_capture_failures_abort_and_release() {
        let dir = TempDir::new().unwrap();
        let mut config = app_config(&dir);
        config.engine.max_consecutive_failures = 3;
        let released = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let source = Box::new(BrokenCamera {
            released: released.clone(),
        });

        let engine = DetectionEngine::new(source, &config, storage(&config));
        let result = engine.run(std::future::pending()).await;

        assert!(matches!(result, Err(DetectorError::CaptureError { .. })));
        assert!(released.load(std::sync::atomic::Ordering::SeqCst));
    }
}
