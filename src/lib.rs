pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{Cli, Command};

pub use config::AppConfig;
pub use core::{DetectionEngine, MotionDetector, ObjectTracker, RunSummary};
pub use utils::error::{DetectorError, Result};
