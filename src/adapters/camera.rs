use crate::adapters::ppm;
use crate::config::toml_config::{CameraConfig, CameraSourceKind};
use crate::domain::model::{BoundingBox, Frame};
use crate::domain::ports::FrameSource;
use crate::utils::error::{DetectorError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

/// 依設定建立影像來源
pub fn from_config(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    Ok(match config.source {
        CameraSourceKind::Command => Box::new(CommandCamera::new(config)),
        CameraSourceKind::Directory => {
            let dir = config.frames_dir.as_ref().ok_or_else(|| DetectorError::MissingConfigError {
                field: "camera.frames_dir".to_string(),
            })?;
            Box::new(
                PpmDirectorySource::new(dir, config.loop_frames)
                    .with_resolution(config.width, config.height),
            )
        }
        CameraSourceKind::Synthetic => Box::new(SyntheticSource::new(
            config.width,
            config.height,
            SyntheticScene::default(),
        )),
    })
}

/// Camera driven by an external capture command that writes raw RGB24
/// frames to stdout (ffmpeg / v4l2 by default).
pub struct CommandCamera {
    program: String,
    args: Vec<String>,
    width: u32,
    height: u32,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
}

impl CommandCamera {
    pub fn new(config: &CameraConfig) -> Self {
        let expanded: Vec<String> = config
            .command
            .iter()
            .map(|arg| {
                arg.replace("{id}", &config.camera_id.to_string())
                    .replace("{width}", &config.width.to_string())
                    .replace("{height}", &config.height.to_string())
            })
            .collect();
        let (program, args) = match expanded.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self {
            program,
            args,
            width: config.width,
            height: config.height,
            child: None,
            stdout: None,
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl FrameSource for CommandCamera {
    async fn initialize(&mut self) -> Result<()> {
        if self.program.is_empty() {
            return Err(DetectorError::capture("capture command is empty"));
        }
        tracing::debug!("Spawning capture command: {}", self.command_line());

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DetectorError::capture(format!("Failed to open camera ({}): {}", self.program, e))
            })?;

        self.stdout = child.stdout.take();
        self.child = Some(child);
        tracing::info!(
            "Camera initialized successfully ({}x{})",
            self.width,
            self.height
        );
        Ok(())
    }

    async fn capture_frame(&mut self) -> Result<Option<Frame>> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| DetectorError::capture("Camera is not initialized"))?;

        let len = Frame::expected_len(self.width, self.height).ok_or_else(|| {
            DetectorError::capture(format!(
                "configured resolution {}x{} is too large",
                self.width, self.height
            ))
        })?;
        let mut data = vec![0u8; len];
        match stdout.read_exact(&mut data).await {
            Ok(_) => Ok(Some(Frame::new(self.width, self.height, data))),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
                DetectorError::capture("capture command closed its output"),
            ),
            Err(e) => Err(DetectorError::capture(format!("Failed to capture frame: {}", e))),
        }
    }

    async fn release(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to stop capture command: {}", e);
            }
            tracing::info!("Camera released");
        }
    }
}

/// 依檔名順序重播目錄中的 `*.ppm` 影格
pub struct PpmDirectorySource {
    dir: PathBuf,
    loop_frames: bool,
    resolution: Option<(u32, u32)>,
    files: Vec<PathBuf>,
    position: usize,
    initialized: bool,
}

impl PpmDirectorySource {
    pub fn new(dir: impl Into<PathBuf>, loop_frames: bool) -> Self {
        Self {
            dir: dir.into(),
            loop_frames,
            resolution: None,
            files: Vec::new(),
            position: 0,
            initialized: false,
        }
    }

    /// 影格尺寸必須與設定相符
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some((width, height));
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl FrameSource for PpmDirectorySource {
    async fn initialize(&mut self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            DetectorError::capture(format!(
                "Cannot open frames directory '{}': {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("ppm") {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(DetectorError::capture(format!(
                "No .ppm frames found in '{}'",
                self.dir.display()
            )));
        }

        tracing::info!(
            "Replaying {} frame(s) from {}",
            files.len(),
            self.dir.display()
        );
        self.files = files;
        self.position = 0;
        self.initialized = true;
        Ok(())
    }

    async fn capture_frame(&mut self) -> Result<Option<Frame>> {
        if !self.initialized {
            return Err(DetectorError::capture("Frame source is not initialized"));
        }
        if self.position >= self.files.len() {
            if !self.loop_frames {
                return Ok(None);
            }
            self.position = 0;
        }
        let path = &self.files[self.position];
        self.position += 1;

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            DetectorError::capture(format!("Failed to read frame '{}': {}", path.display(), e))
        })?;
        let frame = ppm::decode(&bytes)?;
        if let Some((width, height)) = self.resolution {
            if (frame.width, frame.height) != (width, height) {
                return Err(DetectorError::capture(format!(
                    "frame '{}' is {}x{}, expected {}x{}",
                    path.display(),
                    frame.width,
                    frame.height,
                    width,
                    height
                )));
            }
        }
        Ok(Some(frame))
    }

    async fn release(&mut self) {
        self.initialized = false;
    }
}

/// Deterministic scene: flat background with a square that appears after
/// `appear_after` frames and moves `step` pixels per frame.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub background: [u8; 3],
    pub object: [u8; 3],
    pub object_side: u32,
    pub appear_after: u64,
    pub step: u32,
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticScene {
    fn default() -> Self {
        Self {
            background: [60, 90, 60],
            object: [200, 160, 120],
            object_side: 40,
            appear_after: 30,
            step: 4,
            frame_limit: None,
        }
    }
}

pub struct SyntheticSource {
    width: u32,
    height: u32,
    scene: SyntheticScene,
    frame_index: u64,
    initialized: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, scene: SyntheticScene) -> Self {
        Self {
            width,
            height,
            scene,
            frame_index: 0,
            initialized: false,
        }
    }

    /// 第 `index` 張影格中物件的位置
    pub fn object_at(&self, index: u64) -> Option<BoundingBox> {
        if index < self.scene.appear_after {
            return None;
        }
        let side = self.scene.object_side.min(self.width).min(self.height);
        let travel = (self.width - side).max(1) as u64;
        let offset = ((index - self.scene.appear_after) * self.scene.step as u64) % travel;
        Some(BoundingBox::new(
            offset as u32,
            (self.height - side) / 2,
            side,
            side,
        ))
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn initialize(&mut self) -> Result<()> {
        self.frame_index = 0;
        self.initialized = true;
        Ok(())
    }

    async fn capture_frame(&mut self) -> Result<Option<Frame>> {
        if !self.initialized {
            return Err(DetectorError::capture("Camera is not initialized"));
        }
        if let Some(limit) = self.scene.frame_limit {
            if self.frame_index >= limit {
                return Ok(None);
            }
        }
        let mut frame = Frame::filled(self.width, self.height, self.scene.background);
        if let Some(bbox) = self.object_at(self.frame_index) {
            frame.fill_rect(bbox, self.scene.object);
        }
        self.frame_index += 1;
        Ok(Some(frame))
    }

    async fn release(&mut self) {
        self.initialized = false;
    }
}
