use crate::adapters::ppm;
use crate::config::toml_config::StorageConfig;
use crate::core::draw;
use crate::domain::model::{BoundingBox, CaptureMetadata, Frame, StoredCapture};
use crate::domain::ports::DiskSpace;
use crate::utils::error::{DetectorError, Result};
use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const INDEX_FILE: &str = "index.csv";
const INDEX_HEADER: [&str; 7] = ["object_id", "timestamp", "x", "y", "width", "height", "image"];
const LATEST_LINK: &str = "latest";

#[derive(Debug, Serialize)]
struct IndexRow<'a> {
    object_id: &'a str,
    timestamp: String,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    image: &'a str,
}

/// 本地快照儲存：`<base>/images/<YYYY-MM-DD>/<HH-MM-SS>_object_<id>.ppm`
pub struct ImageStorage {
    base_path: PathBuf,
    images_path: PathBuf,
    config: StorageConfig,
    disk: Arc<dyn DiskSpace>,
    last_save: Option<DateTime<Local>>,
    current_day: Option<NaiveDate>,
}

impl ImageStorage {
    pub fn new(config: StorageConfig, disk: Arc<dyn DiskSpace>) -> Result<Self> {
        let base_path = PathBuf::from(&config.base_path);
        let images_path = base_path.join("images");
        let mut storage = Self {
            base_path,
            images_path,
            config,
            disk,
            last_save: None,
            current_day: None,
        };
        storage.init_directory_structure(Local::now())?;
        Ok(storage)
    }

    pub fn images_path(&self) -> &Path {
        &self.images_path
    }

    pub fn last_save(&self) -> Option<DateTime<Local>> {
        self.last_save
    }

    fn init_directory_structure(&mut self, now: DateTime<Local>) -> Result<()> {
        let today = now.date_naive();
        if self.current_day == Some(today) {
            return Ok(());
        }

        let today_dir = self.images_path.join(today.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&today_dir).map_err(|e| {
            DetectorError::storage(format!(
                "Failed to initialize directory structure at '{}': {}",
                today_dir.display(),
                e
            ))
        })?;

        if let Err(e) = self.update_latest_link(&today_dir) {
            tracing::warn!(
                "Could not create symlink: {}. Continuing without symlink.",
                e
            );
        }
        self.current_day = Some(today);
        Ok(())
    }

    #[cfg(unix)]
    fn update_latest_link(&self, target: &Path) -> std::io::Result<()> {
        let link = self.images_path.join(LATEST_LINK);
        if fs::symlink_metadata(&link).is_ok() {
            fs::remove_file(&link)?;
        }
        // 相對路徑，整個目錄搬移後仍有效
        let relative = target.file_name().map(PathBuf::from).unwrap_or_else(|| target.to_path_buf());
        std::os::unix::fs::symlink(relative, link)
    }

    #[cfg(not(unix))]
    fn update_latest_link(&self, _target: &Path) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "symlinks are only maintained on unix",
        ))
    }

    pub fn generate_filename(&self, object_id: &str, now: DateTime<Local>) -> (String, PathBuf) {
        let filename = format!("{}_object_{}.ppm", now.format("%H-%M-%S"), object_id);
        let full_path = self
            .images_path
            .join(now.format("%Y-%m-%d").to_string())
            .join(&filename);
        (filename, full_path)
    }

    pub fn save_detected_object(
        &mut self,
        frame: &Frame,
        bbox: BoundingBox,
        track_id: Option<u64>,
    ) -> Result<Option<StoredCapture>> {
        self.save_detected_object_at(frame, bbox, track_id, Local::now())
    }

    /// 儲存快照與描述檔；距離上次儲存未滿 `min_save_interval_secs` 則略過
    pub fn save_detected_object_at(
        &mut self,
        frame: &Frame,
        bbox: BoundingBox,
        track_id: Option<u64>,
        now: DateTime<Local>,
    ) -> Result<Option<StoredCapture>> {
        if let Some(last) = self.last_save {
            let elapsed = (now - last).num_milliseconds() as f64 / 1000.0;
            let interval = self.config.min_save_interval_secs as f64;
            if elapsed < interval {
                tracing::info!(
                    "Skipping save: minimum interval ({}s) not reached. Only {:.1}s elapsed.",
                    self.config.min_save_interval_secs,
                    elapsed
                );
                return Ok(None);
            }
        }

        if !self.check_storage_space()? {
            let removed = self.cleanup_old_files_at(self.config.days_to_keep, now)?;
            tracing::warn!("Low disk space, removed {} old day(s)", removed);
            if !self.check_storage_space()? {
                return Err(DetectorError::storage("Insufficient storage space"));
            }
        }

        self.init_directory_structure(now)?;

        let object_id = now.format("%Y%m%d_%H%M%S_%6f").to_string();
        let metadata = CaptureMetadata {
            object_id: object_id.clone(),
            timestamp: now,
            bbox,
            frame_size: frame.size(),
            track_id,
            uploaded_at: None,
        };

        let (filename, image_path) = self.generate_filename(&object_id, now);

        let mut annotated = frame.clone();
        draw::draw_box(&mut annotated, bbox, draw::GREEN, 2);
        let stamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
        draw::draw_text(&mut annotated, &stamp, 10, 10, 2, draw::GREEN);

        fs::write(&image_path, ppm::encode(&annotated))?;

        let metadata_path = image_path.with_extension("json");
        fs::write(&metadata_path, serde_json::to_vec_pretty(&metadata)?)?;

        self.append_index(&image_path, &filename, &metadata)?;

        self.last_save = Some(now);
        tracing::info!(
            "Saved frame with detected object to {}",
            image_path.display()
        );

        Ok(Some(StoredCapture {
            image_path,
            metadata_path,
            metadata,
        }))
    }

    fn append_index(&self, image_path: &Path, filename: &str, metadata: &CaptureMetadata) -> Result<()> {
        let index_path = image_path
            .parent()
            .map(|dir| dir.join(INDEX_FILE))
            .ok_or_else(|| DetectorError::storage("snapshot path has no parent directory"))?;
        let is_new = !index_path.exists();

        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer.write_record(INDEX_HEADER)?;
        }
        writer.serialize(IndexRow {
            object_id: &metadata.object_id,
            timestamp: metadata.timestamp.to_rfc3339(),
            x: metadata.bbox.x,
            y: metadata.bbox.y,
            width: metadata.bbox.width,
            height: metadata.bbox.height,
            image: filename,
        })?;
        writer.flush()?;
        Ok(())
    }

    /// 剩餘空間需大於上限的 10%
    pub fn check_storage_space(&self) -> Result<bool> {
        let free = self.disk.available_bytes(&self.base_path)?;
        Ok(free as f64 > self.config.max_storage_bytes() as f64 * 0.1)
    }

    pub fn cleanup_old_files(&self, days_to_keep: i64) -> Result<usize> {
        self.cleanup_old_files_at(days_to_keep, Local::now())
    }

    /// Removes date directories strictly older than `days_to_keep` days.
    pub fn cleanup_old_files_at(&self, days_to_keep: i64, now: DateTime<Local>) -> Result<usize> {
        let today = now.date_naive();
        let mut removed = 0;

        for entry in fs::read_dir(&self.images_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name == LATEST_LINK || !entry.file_type()?.is_dir() {
                continue;
            }
            let Ok(dir_date) = NaiveDate::parse_from_str(name, "%Y-%m-%d") else {
                continue;
            };
            if (today - dir_date).num_days() > days_to_keep {
                fs::remove_dir_all(entry.path())?;
                tracing::info!("Removed old directory: {}", entry.path().display());
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// 尚未上傳的快照，依路徑排序
    pub fn pending_uploads(&self) -> Result<Vec<StoredCapture>> {
        let mut pending = Vec::new();

        for day in fs::read_dir(&self.images_path)? {
            let day = day?;
            if day.file_name().to_str() == Some(LATEST_LINK) || !day.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(day.path())? {
                let metadata_path = entry?.path();
                if metadata_path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let metadata = match read_metadata(&metadata_path) {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        tracing::warn!("Skipping unreadable metadata {}: {}", metadata_path.display(), e);
                        continue;
                    }
                };
                let image_path = metadata_path.with_extension("ppm");
                if metadata.uploaded_at.is_none() && image_path.exists() {
                    pending.push(StoredCapture {
                        image_path,
                        metadata_path,
                        metadata,
                    });
                }
            }
        }

        pending.sort_by(|a, b| a.image_path.cmp(&b.image_path));
        Ok(pending)
    }

    /// 在描述檔寫入 `uploaded_at`
    pub fn mark_uploaded(capture: &StoredCapture, at: DateTime<Local>) -> Result<StoredCapture> {
        let mut metadata = read_metadata(&capture.metadata_path)?;
        metadata.uploaded_at = Some(at);
        fs::write(&capture.metadata_path, serde_json::to_vec_pretty(&metadata)?)?;
        Ok(StoredCapture {
            image_path: capture.image_path.clone(),
            metadata_path: capture.metadata_path.clone(),
            metadata,
        })
    }
}

pub fn read_metadata(path: &Path) -> Result<CaptureMetadata> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
