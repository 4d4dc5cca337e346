//! Annotation helpers for saved snapshots.

use crate::domain::model::{BoundingBox, Frame};

pub const GREEN: [u8; 3] = [0, 255, 0];

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

/// 5x7 點陣字，只涵蓋時間戳需要的字元
fn glyph(c: char) -> [u8; 7] {
    match c {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        _ => [0x00; 7],
    }
}

/// Rectangle outline, clipped to the frame. Thickness grows inwards.
pub fn draw_box(frame: &mut Frame, bbox: BoundingBox, color: [u8; 3], thickness: u32) {
    if bbox.width == 0 || bbox.height == 0 {
        return;
    }
    let x0 = bbox.x;
    let y0 = bbox.y;
    let x1 = bbox.x + bbox.width - 1;
    let y1 = bbox.y + bbox.height - 1;

    for t in 0..thickness {
        if x0 + t > x1.saturating_sub(t) || y0 + t > y1.saturating_sub(t) {
            break;
        }
        let (left, right) = (x0 + t, x1 - t);
        let (top, bottom) = (y0 + t, y1 - t);
        for x in left..=right {
            frame.set_pixel(x, top, color);
            frame.set_pixel(x, bottom, color);
        }
        for y in top..=bottom {
            frame.set_pixel(left, y, color);
            frame.set_pixel(right, y, color);
        }
    }
}

/// Stamps `text` with its top-left corner at (`x`, `y`). Returns the width
/// in pixels that was used.
pub fn draw_text(frame: &mut Frame, text: &str, x: u32, y: u32, scale: u32, color: [u8; 3]) -> u32 {
    let scale = scale.max(1);
    let advance = (GLYPH_WIDTH + 1) * scale;
    let mut cursor = x;

    for c in text.chars() {
        let rows = glyph(c);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                for sy in 0..scale {
                    for sx in 0..scale {
                        frame.set_pixel(
                            cursor + col * scale + sx,
                            y + row as u32 * scale + sy,
                            color,
                        );
                    }
                }
            }
        }
        cursor += advance;
    }

    cursor - x
}

pub fn text_height(scale: u32) -> u32 {
    GLYPH_HEIGHT * scale.max(1)
}
