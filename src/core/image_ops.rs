//! Pixel operations used by the motion detector.
//!
//! Everything works on single channel 8-bit images except the background
//! model, which is kept in `f32` so the running average does not drift from
//! rounding.

use crate::domain::model::{BoundingBox, Detection, Frame, GrayImage};

/// RGB → luma (ITU-R BT.601 weights)
pub fn to_gray(frame: &Frame) -> GrayImage {
    let data = frame
        .data
        .chunks_exact(3)
        .map(|px| {
            let y = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
            y.round().clamp(0.0, 255.0) as u8
        })
        .collect();
    GrayImage {
        width: frame.width,
        height: frame.height,
        data,
    }
}

/// 偶數核大小往上補成奇數
pub fn odd_kernel_size(size: u32) -> u32 {
    if size % 2 == 0 {
        size + 1
    } else {
        size.max(1)
    }
}

/// Normalised 1-D Gaussian kernel, sigma derived from the size the same
/// way OpenCV does when sigma is 0.
pub fn gaussian_kernel(size: u32) -> Vec<f32> {
    let size = odd_kernel_size(size) as i64;
    let sigma = 0.3 * ((size - 1) as f32 * 0.5 - 1.0) + 0.8;
    let center = size / 2;
    let mut kernel: Vec<f32> = (0..size)
        .map(|i| {
            let d = (i - center) as f32;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

pub fn gaussian_blur(image: &GrayImage, size: u32) -> GrayImage {
    let kernel = gaussian_kernel(size);
    if kernel.len() == 1 || image.data.is_empty() {
        return image.clone();
    }
    let radius = (kernel.len() / 2) as i64;
    let w = image.width as i64;
    let h = image.height as i64;

    // 邊界複製 (replicate)
    let mut horizontal = vec![0f32; image.data.len()];
    for y in 0..h {
        let row = (y * w) as usize;
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = (x + k as i64 - radius).clamp(0, w - 1);
                acc += weight * image.data[row + sx as usize] as f32;
            }
            horizontal[row + x as usize] = acc;
        }
    }

    let mut data = vec![0u8; image.data.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = (y + k as i64 - radius).clamp(0, h - 1);
                acc += weight * horizontal[(sy * w + x) as usize];
            }
            data[(y * w + x) as usize] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }

    GrayImage {
        width: image.width,
        height: image.height,
        data,
    }
}

/// `|round(background) - image|`, saturating like `convertScaleAbs`
pub fn abs_diff_background(background: &[f32], image: &GrayImage) -> GrayImage {
    let data = background
        .iter()
        .zip(&image.data)
        .map(|(bg, px)| {
            let bg = bg.round().clamp(0.0, 255.0) as u8;
            bg.abs_diff(*px)
        })
        .collect();
    GrayImage {
        width: image.width,
        height: image.height,
        data,
    }
}

/// Binary threshold: values strictly above `threshold` become 255.
pub fn threshold(image: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage {
        width: image.width,
        height: image.height,
        data: image
            .data
            .iter()
            .map(|&v| if v > threshold { 255 } else { 0 })
            .collect(),
    }
}

/// 3x3 dilation repeated `iterations` times.
pub fn dilate(image: &GrayImage, iterations: u32) -> GrayImage {
    let mut current = image.clone();
    let w = image.width as i64;
    let h = image.height as i64;
    for _ in 0..iterations {
        let mut next = current.data.clone();
        for y in 0..h {
            for x in 0..w {
                let mut max = 0u8;
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let nx = x + dx;
                        let ny = y + dy;
                        if nx < 0 || ny < 0 || nx >= w || ny >= h {
                            continue;
                        }
                        max = max.max(current.data[(ny * w + nx) as usize]);
                    }
                }
                next[(y * w + x) as usize] = max;
            }
        }
        current.data = next;
    }
    current
}

/// 8-connected foreground regions of a binary mask, sorted by (y, x).
///
/// Each region reports its bounding box and its pixel count. Holes do not
/// split a region, so this yields one entry per external outline.
pub fn connected_regions(mask: &GrayImage) -> Vec<Detection> {
    let w = mask.width as i64;
    let h = mask.height as i64;
    let mut visited = vec![false; mask.data.len()];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for start in 0..mask.data.len() {
        if visited[start] || mask.data[start] == 0 {
            continue;
        }
        visited[start] = true;
        stack.push(start);

        let (mut min_x, mut min_y) = (i64::MAX, i64::MAX);
        let (mut max_x, mut max_y) = (i64::MIN, i64::MIN);
        let mut area = 0u64;

        while let Some(idx) = stack.pop() {
            let x = idx as i64 % w;
            let y = idx as i64 / w;
            area += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            for dy in -1..=1 {
                for dx in -1..=1 {
                    let nx = x + dx;
                    let ny = y + dy;
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    let n = (ny * w + nx) as usize;
                    if !visited[n] && mask.data[n] != 0 {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        regions.push(Detection {
            bbox: BoundingBox::new(
                min_x as u32,
                min_y as u32,
                (max_x - min_x + 1) as u32,
                (max_y - min_y + 1) as u32,
            ),
            area,
        });
    }

    regions.sort_by_key(|d| (d.bbox.y, d.bbox.x));
    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> GrayImage {
        let height = rows.len() as u32;
        let width = rows[0].len() as u32;
        let data = rows
            .iter()
            .flat_map(|r| r.chars().map(|c| if c == '#' { 255 } else { 0 }))
            .collect();
        GrayImage {
            width,
            height,
            data,
        }
    }

    #[test]
    fn test_to_gray_weights() {
        let frame = Frame::new(2, 1, vec![255, 0, 0, 255, 255, 255]);
        let gray = to_gray(&frame);
        assert_eq!(gray.data, vec![76, 255]);
    }

    #[test]
    fn test_gaussian_kernel_is_normalised_and_symmetric() {
        let kernel = gaussian_kernel(21);
        assert_eq!(kernel.len(), 21);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!((kernel[0] - kernel[20]).abs() < 1e-7);
        assert!(kernel[10] > kernel[9]);
        assert_eq!(gaussian_kernel(4).len(), 5);
    }

    #[test]
    fn test_blur_keeps_flat_image_flat() {
        let image = GrayImage {
            width: 8,
            height: 6,
            data: vec![90; 48],
        };
        assert_eq!(gaussian_blur(&image, 5).data, vec![90; 48]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let image = GrayImage {
            width: 3,
            height: 1,
            data: vec![29, 30, 31],
        };
        assert_eq!(threshold(&image, 30).data, vec![0, 0, 255]);
    }

    #[test]
    fn test_dilate_grows_single_pixel() {
        let mask = mask_from(&[".....", ".....", "..#..", ".....", "....."]);
        let grown = dilate(&mask, 1);
        assert_eq!(grown.data.iter().filter(|&&v| v == 255).count(), 9);
        let grown = dilate(&mask, 2);
        assert_eq!(grown.data.iter().filter(|&&v| v == 255).count(), 25);
        assert_eq!(dilate(&mask, 0), mask);
    }

    #[test]
    fn test_connected_regions_diagonal_and_separate() {
        let mask = mask_from(&[
            "##......",
            "..#.....",
            "........",
            ".....###",
            ".....#.#",
            ".....###",
        ]);
        let regions = connected_regions(&mask);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].bbox, BoundingBox::new(0, 0, 3, 2));
        assert_eq!(regions[0].area, 3);
        // 中間的洞不會切開區域
        assert_eq!(regions[1].bbox, BoundingBox::new(5, 3, 3, 3));
        assert_eq!(regions[1].area, 8);
    }
}
