pub mod detector;
pub mod draw;
pub mod engine;
pub mod image_ops;
pub mod tracker;
pub mod upload;

pub use detector::MotionDetector;
pub use engine::{DetectionEngine, RunSummary};
pub use tracker::ObjectTracker;
pub use upload::{UploadQueue, Uploader};
