use crate::domain::model::{CommandOutput, Frame};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// 影像來源 (攝影機、影格目錄、合成畫面)
#[async_trait]
pub trait FrameSource: Send {
    async fn initialize(&mut self) -> Result<()>;
    /// `Ok(None)` 表示來源已結束 (例如影格目錄播放完畢)
    async fn capture_frame(&mut self) -> Result<Option<Frame>>;
    async fn release(&mut self);
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()>;

    /// 供日誌顯示的目的地描述
    fn describe(&self) -> String;
}

/// 執行外部指令 (systemctl, rtcwake, id ...)
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

pub trait DiskSpace: Send + Sync {
    /// Free bytes on the filesystem holding `path`.
    fn available_bytes(&self, path: &Path) -> Result<u64>;
}
