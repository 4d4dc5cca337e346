use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV index error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Capture error: {message}")]
    CaptureError { message: String },

    #[error("Image format error: {message}")]
    ImageFormatError { message: String },

    #[error("Detection error: {message}")]
    DetectionError { message: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Upload of '{key}' failed: {message}")]
    UploadError { key: String, message: String },

    #[error("Command '{command}' failed: {message}")]
    CommandError { command: String, message: String },

    #[error("Permission denied: {message}")]
    PermissionError { message: String },
}

pub type Result<T> = std::result::Result<T, DetectorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Capture,
    Processing,
    Storage,
    Network,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl DetectorError {
    pub fn capture(message: impl Into<String>) -> Self {
        Self::CaptureError {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
            Self::CaptureError { .. } => ErrorCategory::Capture,
            Self::ImageFormatError { .. }
            | Self::DetectionError { .. }
            | Self::SerializationError(_) => ErrorCategory::Processing,
            Self::IoError(_) | Self::CsvError(_) | Self::StorageError { .. } => {
                ErrorCategory::Storage
            }
            Self::UploadError { .. } => ErrorCategory::Network,
            Self::CommandError { .. } | Self::PermissionError { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // 上傳失敗的檔案會留在本地，下次 sync 再補傳
            Self::UploadError { .. } => ErrorSeverity::Medium,
            Self::CaptureError { .. } => ErrorSeverity::Medium,
            Self::ImageFormatError { .. } | Self::DetectionError { .. } => ErrorSeverity::High,
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. }
            | Self::PermissionError { .. }
            | Self::CommandError { .. }
            | Self::SerializationError(_) => ErrorSeverity::High,
            Self::IoError(_) | Self::CsvError(_) | Self::StorageError { .. } => {
                ErrorSeverity::Critical
            }
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check config.toml against the documented sections and re-run `check-config`"
            }
            ErrorCategory::Capture => {
                "Make sure the camera is connected and the capture command works on its own"
            }
            ErrorCategory::Processing => "Inspect the offending frame or metadata file",
            ErrorCategory::Storage => "Check free disk space and permissions of the storage directory",
            ErrorCategory::Network => "Check network connectivity and S3 credentials, then run `sync`",
            ErrorCategory::System => "Run the command as root and make sure systemd tools are installed",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::PermissionError { message } => message.clone(),
            Self::MissingConfigError { field } => {
                format!("Configuration is missing '{}'", field)
            }
            Self::InvalidConfigValueError { field, reason, .. } => {
                format!("Invalid configuration for '{}': {}", field, reason)
            }
            other => other.to_string(),
        }
    }

    /// 對應 CLI 結束碼
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

impl From<toml::de::Error> for DetectorError {
    fn from(e: toml::de::Error) -> Self {
        Self::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        }
    }
}
