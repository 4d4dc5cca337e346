use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 一張 RGB24 影格，`data` 長度為 `width * height * 3`
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub captured_at: DateTime<Local>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
            captured_at: Local::now(),
        }
    }

    /// 單色填滿的影格
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self::new(width, height, data)
    }

    /// `width * height * 3`，溢位時回傳 `None`
    pub fn expected_len(width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(3)
    }

    pub fn size(&self) -> FrameSize {
        FrameSize {
            width: self.width,
            height: self.height,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        self.data[i..i + 3].copy_from_slice(&rgb);
    }

    /// 填滿矩形區域，超出畫面的部分忽略
    pub fn fill_rect(&mut self, bbox: BoundingBox, rgb: [u8; 3]) {
        let x_end = (bbox.x + bbox.width).min(self.width);
        let y_end = (bbox.y + bbox.height).min(self.height);
        for y in bbox.y..y_end {
            for x in bbox.x..x_end {
                self.set_pixel(x, y, rgb);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn intersection(&self, other: &BoundingBox) -> u64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        if x2 <= x1 || y2 <= y1 {
            return 0;
        }
        (x2 - x1) as u64 * (y2 - y1) as u64
    }

    /// Intersection over union, 0.0 for disjoint boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union == 0 {
            return 0.0;
        }
        inter as f32 / union as f32
    }
}

/// 偵測到的移動區域，`area` 為區域像素數
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub area: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    pub id: u64,
    pub bbox: BoundingBox,
    pub first_seen: DateTime<Local>,
    pub last_seen: DateTime<Local>,
    pub missed: u32,
    /// 已經存過快照
    pub saved: bool,
}

/// 每張快照旁邊的 JSON 描述檔
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub object_id: String,
    pub timestamp: DateTime<Local>,
    pub bbox: BoundingBox,
    pub frame_size: FrameSize,
    #[serde(default)]
    pub track_id: Option<u64>,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredCapture {
    pub image_path: PathBuf,
    pub metadata_path: PathBuf,
    pub metadata: CaptureMetadata,
}

impl StoredCapture {
    /// 快照所在的日期目錄名稱 (`YYYY-MM-DD`)
    pub fn date_dir(&self) -> String {
        self.metadata.timestamp.format("%Y-%m-%d").to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}
