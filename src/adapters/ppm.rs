//! Binary PPM (P6) codec for snapshots and replayed frames.

use crate::domain::model::Frame;
use crate::utils::error::{DetectorError, Result};

pub const CONTENT_TYPE: &str = "image/x-portable-pixmap";

pub fn encode(frame: &Frame) -> Vec<u8> {
    let header = format!("P6\n{} {}\n255\n", frame.width, frame.height);
    let mut out = Vec::with_capacity(header.len() + frame.data.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&frame.data);
    out
}

fn format_error(message: impl Into<String>) -> DetectorError {
    DetectorError::ImageFormatError {
        message: message.into(),
    }
}

struct HeaderReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> HeaderReader<'a> {
    fn skip_whitespace_and_comments(&mut self) {
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            if b == b'#' {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
            } else if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn token(&mut self) -> Result<&'a str> {
        self.skip_whitespace_and_comments();
        let start = self.pos;
        while self.pos < self.bytes.len() && !self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(format_error("unexpected end of PPM header"));
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| format_error("PPM header is not ASCII"))
    }

    fn number(&mut self, what: &str) -> Result<u32> {
        let token = self.token()?;
        token
            .parse()
            .map_err(|_| format_error(format!("invalid PPM {}: '{}'", what, token)))
    }
}

pub fn decode(bytes: &[u8]) -> Result<Frame> {
    let mut reader = HeaderReader { bytes, pos: 0 };
    let magic = reader.token()?;
    if magic != "P6" {
        return Err(format_error(format!(
            "unsupported PPM magic '{}', expected P6",
            magic
        )));
    }
    let width = reader.number("width")?;
    let height = reader.number("height")?;
    let max_value = reader.number("max value")?;
    if max_value != 255 {
        return Err(format_error(format!(
            "only 8-bit PPM is supported (max value {})",
            max_value
        )));
    }
    // 標頭後恰好一個空白字元
    let data_start = reader.pos + 1;
    let expected = Frame::expected_len(width, height).ok_or_else(|| {
        format_error(format!("PPM dimensions {}x{} are too large", width, height))
    })?;
    let data_end = data_start
        .checked_add(expected)
        .ok_or_else(|| format_error("PPM pixel data length overflows".to_string()))?;
    let data = bytes
        .get(data_start..data_end)
        .ok_or_else(|| {
            format_error(format!(
                "PPM pixel data truncated: expected {} bytes",
                expected
            ))
        })?
        .to_vec();

    Ok(Frame::new(width, height, data))
}
