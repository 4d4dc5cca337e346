use crate::utils::error::{DetectorError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub tracking: TrackingConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub engine: EngineConfig,
    pub power: PowerConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraSourceKind {
    Command,
    Directory,
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub source: CameraSourceKind,
    pub camera_id: u32,
    pub width: u32,
    pub height: u32,
    /// 擷取指令，`{id}` `{width}` `{height}` 會被替換
    pub command: Vec<String>,
    pub frames_dir: Option<String>,
    pub loop_frames: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: CameraSourceKind::Command,
            camera_id: 0,
            width: 640,
            height: 480,
            command: [
                "ffmpeg",
                "-loglevel",
                "error",
                "-f",
                "v4l2",
                "-video_size",
                "{width}x{height}",
                "-i",
                "/dev/video{id}",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            frames_dir: None,
            loop_frames: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_area: u64,
    pub threshold: u32,
    pub blur_size: u32,
    pub dilate_iterations: u32,
    pub learning_rate: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_area: 500,
            threshold: 30,
            blur_size: 21,
            dilate_iterations: 2,
            learning_rate: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub enabled: bool,
    pub iou_threshold: f32,
    pub max_missed: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            iou_threshold: 0.3,
            max_missed: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_path: String,
    pub max_storage_gb: f64,
    pub min_save_interval_secs: u64,
    pub days_to_keep: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: "storage".to_string(),
            max_storage_gb: 10.0,
            min_save_interval_secs: 10,
            days_to_keep: 7,
        }
    }
}

impl StorageConfig {
    pub fn max_storage_bytes(&self) -> u64 {
        (self.max_storage_gb * 1024.0 * 1024.0 * 1024.0) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadTarget {
    S3,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub enabled: bool,
    pub target: UploadTarget,
    pub bucket: Option<String>,
    pub prefix: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub directory: Option<String>,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub queue_capacity: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target: UploadTarget::S3,
            bucket: None,
            prefix: "captures".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            directory: None,
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub frame_interval_ms: u64,
    pub max_consecutive_failures: u32,
    pub monitor_every_frames: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 10,
            max_consecutive_failures: 100,
            monitor_every_frames: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub wake_time: String,
    pub log_file: String,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            wake_time: "21:30:00".to_string(),
            log_file: "power-schedule.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub description: String,
    pub unit_dir: String,
    pub user: Option<String>,
    pub working_directory: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "animals-detector".to_string(),
            description: "Animal Detection Service".to_string(),
            unit_dir: "/etc/systemd/system".to_string(),
            user: None,
            working_directory: None,
        }
    }
}

impl ServiceConfig {
    pub fn unit_name(&self) -> String {
        format!("{}.service", self.name)
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex"))
}

impl AppConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            DetectorError::config(format!(
                "Cannot read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// 檔案不存在時使用預設值
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(
                "Config file '{}' not found, using defaults",
                path.as_ref().display()
            );
            Ok(Self::default())
        }
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);
        Ok(toml::from_str(&processed_content)?)
    }

    /// 替換環境變數 (例如 ${S3_BUCKET})，未設定的變數保留原樣
    fn substitute_env_vars(content: &str) -> String {
        env_var_pattern()
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_positive_number("camera.width", self.camera.width as usize, 1)?;
        validation::validate_positive_number("camera.height", self.camera.height as usize, 1)?;
        match self.camera.source {
            CameraSourceKind::Command => {
                if self.camera.command.is_empty() {
                    return Err(DetectorError::MissingConfigError {
                        field: "camera.command".to_string(),
                    });
                }
            }
            CameraSourceKind::Directory => {
                let dir = validation::validate_required_field(
                    "camera.frames_dir",
                    &self.camera.frames_dir,
                )?;
                validation::validate_path("camera.frames_dir", dir)?;
            }
            CameraSourceKind::Synthetic => {}
        }

        validation::validate_positive_number(
            "detector.min_area",
            self.detector.min_area as usize,
            1,
        )?;
        validation::validate_range("detector.threshold", self.detector.threshold, 0, 255)?;
        validation::validate_range("detector.blur_size", self.detector.blur_size, 1, 255)?;
        validation::validate_range("detector.dilate_iterations", self.detector.dilate_iterations, 0, 50)?;
        if !(self.detector.learning_rate > 0.0 && self.detector.learning_rate <= 1.0) {
            return Err(DetectorError::InvalidConfigValueError {
                field: "detector.learning_rate".to_string(),
                value: self.detector.learning_rate.to_string(),
                reason: "Value must be in (0, 1]".to_string(),
            });
        }

        validation::validate_range("tracking.iou_threshold", self.tracking.iou_threshold, 0.0, 1.0)?;

        validation::validate_path("storage.base_path", &self.storage.base_path)?;
        if self.storage.max_storage_gb <= 0.0 {
            return Err(DetectorError::InvalidConfigValueError {
                field: "storage.max_storage_gb".to_string(),
                value: self.storage.max_storage_gb.to_string(),
                reason: "Value must be positive".to_string(),
            });
        }
        validation::validate_positive_number(
            "storage.days_to_keep",
            self.storage.days_to_keep.max(0) as usize,
            1,
        )?;

        if self.upload.enabled {
            self.validate_upload()?;
        }

        validation::validate_time_of_day("power.wake_time", &self.power.wake_time)?;
        validation::validate_path("power.log_file", &self.power.log_file)?;

        validation::validate_non_empty_string("service.name", &self.service.name)?;
        validation::validate_path("service.unit_dir", &self.service.unit_dir)?;

        Ok(())
    }

    fn validate_upload(&self) -> Result<()> {
        let upload = &self.upload;
        match upload.target {
            UploadTarget::S3 => {
                let bucket = validation::validate_required_field("upload.bucket", &upload.bucket)?;
                validation::validate_s3_bucket_name("upload.bucket", bucket)?;
                validation::validate_aws_region("upload.region", &upload.region)?;
                if let Some(endpoint) = &upload.endpoint_url {
                    validation::validate_url("upload.endpoint_url", endpoint)?;
                }
            }
            UploadTarget::Directory => {
                let dir =
                    validation::validate_required_field("upload.directory", &upload.directory)?;
                validation::validate_path("upload.directory", dir)?;
            }
        }
        validation::validate_positive_number("upload.max_attempts", upload.max_attempts as usize, 1)?;
        validation::validate_positive_number("upload.queue_capacity", upload.queue_capacity, 1)?;
        if upload.max_backoff_ms < upload.initial_backoff_ms {
            return Err(DetectorError::ConfigValidationError {
                field: "upload.max_backoff_ms".to_string(),
                message: "must not be smaller than upload.initial_backoff_ms".to_string(),
            });
        }
        Ok(())
    }

    pub fn wake_time(&self) -> Result<chrono::NaiveTime> {
        validation::parse_time_of_day(&self.power.wake_time).ok_or_else(|| {
            DetectorError::InvalidConfigValueError {
                field: "power.wake_time".to_string(),
                value: self.power.wake_time.clone(),
                reason: "Expected HH:MM or HH:MM:SS".to_string(),
            }
        })
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();

        assert_eq!(config.camera.camera_id, 0);
        assert_eq!((config.camera.width, config.camera.height), (640, 480));
        assert_eq!(config.detector.min_area, 500);
        assert_eq!(config.detector.threshold, 30);
        assert_eq!(config.detector.blur_size, 21);
        assert_eq!(config.storage.min_save_interval_secs, 10);
        assert_eq!(config.power.wake_time, "21:30:00");
        assert_eq!(config.service.unit_name(), "animals-detector.service");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sections() {
        let toml_content = r#"
[camera]
source = "directory"
frames_dir = "./frames"
loop_frames = true

[detector]
min_area = 200
threshold = 25

[upload]
enabled = true
target = "directory"
directory = "./mirror"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.camera.source, CameraSourceKind::Directory);
        assert_eq!(config.camera.frames_dir.as_deref(), Some("./frames"));
        assert_eq!(config.detector.min_area, 200);
        assert_eq!(config.detector.blur_size, 21);
        assert_eq!(config.upload.target, UploadTarget::Directory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("ANIMALS_TEST_BUCKET", "wildlife-captures");

        let toml_content = r#"
[upload]
enabled = true
bucket = "${ANIMALS_TEST_BUCKET}"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.upload.bucket.as_deref(), Some("wildlife-captures"));
        assert!(config.validate().is_ok());

        std::env::remove_var("ANIMALS_TEST_BUCKET");
    }

    #[test]
    fn test_upload_without_bucket_is_rejected() {
        let config = AppConfig::from_toml_str("[upload]\nenabled = true\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(DetectorError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = AppConfig::from_toml_str("[detector]\nthreshold = 300\n").unwrap();
        assert!(config.validate().is_err());

        let config = AppConfig::from_toml_str("[power]\nwake_time = \"half past nine\"\n").unwrap();
        assert!(config.validate().is_err());

        let config = AppConfig::from_toml_str("[camera]\nsource = \"directory\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let result = AppConfig::from_toml_str("[camera\nwidth = 1");
        assert!(matches!(
            result,
            Err(DetectorError::ConfigValidationError { .. })
        ));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[storage]\nbase_path = \"/var/lib/animals\"\n")
            .unwrap();

        let config = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.storage.base_path, "/var/lib/animals");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::from_file_or_default("/nonexistent/animals.toml").unwrap();
        assert_eq!(config.storage.base_path, "storage");
    }
}
