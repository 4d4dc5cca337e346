pub mod detect;
pub mod power;
pub mod service;

pub use detect::{cleanup, run_detection, sync_pending, RunOptions, SyncReport};
pub use power::{PowerAction, PowerScheduler, WakeOutcome};
pub use service::ServiceInstaller;
