use crate::config::toml_config::DetectorConfig;
use crate::core::image_ops;
use crate::domain::model::{Detection, Frame};
use crate::utils::error::{DetectorError, Result};

/// Motion detector based on a running-average background model.
pub struct MotionDetector {
    config: DetectorConfig,
    background: Option<Vec<f32>>,
    size: Option<(u32, u32)>,
}

impl MotionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            background: None,
            size: None,
        }
    }

    pub fn has_background(&self) -> bool {
        self.background.is_some()
    }

    /// 重新建立背景模型 (例如攝影機重新連線後)
    pub fn reset(&mut self) {
        self.background = None;
        self.size = None;
    }

    /// 回傳此影格中的移動區域；第一張影格只用來建立背景
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let expected = Frame::expected_len(frame.width, frame.height);
        if expected != Some(frame.data.len()) {
            return Err(DetectorError::DetectionError {
                message: format!(
                    "frame buffer has {} bytes, expected {:?} for {}x{}",
                    frame.data.len(),
                    expected,
                    frame.width,
                    frame.height
                ),
            });
        }

        let gray = image_ops::to_gray(frame);
        let blurred = image_ops::gaussian_blur(&gray, self.config.blur_size);

        if let Some(size) = self.size {
            if size != (frame.width, frame.height) {
                return Err(DetectorError::DetectionError {
                    message: format!(
                        "frame size changed from {}x{} to {}x{}",
                        size.0, size.1, frame.width, frame.height
                    ),
                });
            }
        }

        let Some(background) = self.background.as_mut() else {
            self.background = Some(blurred.data.iter().map(|&v| v as f32).collect());
            self.size = Some((frame.width, frame.height));
            tracing::info!("Background model initialized");
            return Ok(Vec::new());
        };

        let delta = image_ops::abs_diff_background(background, &blurred);
        let thresh = image_ops::threshold(&delta, self.config.threshold.min(255) as u8);
        let dilated = image_ops::dilate(&thresh, self.config.dilate_iterations);

        let detections: Vec<Detection> = image_ops::connected_regions(&dilated)
            .into_iter()
            .filter(|d| d.area >= self.config.min_area)
            .collect();

        // 偵測完才更新背景
        let alpha = self.config.learning_rate;
        for (bg, &px) in background.iter_mut().zip(&blurred.data) {
            *bg = (1.0 - alpha) * *bg + alpha * px as f32;
        }

        if !detections.is_empty() {
            tracing::debug!("Detected {} moving region(s)", detections.len());
        }
        Ok(detections)
    }
}
