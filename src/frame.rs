//! Decoded frames.
//!
//! Every source produces packed 8-bit RGB frames. A frame is validated before
//! it reaches the detector; a malformed frame skips the cycle for its room.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::time::SystemTime;

/// Channels per pixel for every frame the ingest layer produces.
pub const RGB_CHANNELS: u32 = 3;

/// Default JPEG quality for frame snapshots served to API consumers.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// `(height, width, channels)`, serialized as a three-element array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameShape {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl Serialize for FrameShape {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.height, self.width, self.channels).serialize(serializer)
    }
}

/// Where a frame came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Decoded from the room's backing source; `index` is the position within
    /// the current loop.
    Source { index: u64 },
    /// Synthesized because the backing source could not be opened.
    Placeholder { room_id: String },
}

/// A decoded RGB frame.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub origin: FrameOrigin,
    pub captured_at: SystemTime,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, origin: FrameOrigin) -> Self {
        Self {
            data,
            width,
            height,
            origin,
            captured_at: SystemTime::now(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn shape(&self) -> FrameShape {
        FrameShape {
            height: self.height,
            width: self.width,
            channels: RGB_CHANNELS,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.origin, FrameOrigin::Placeholder { .. })
    }

    /// Room id a placeholder frame is tagged with.
    pub fn placeholder_room(&self) -> Option<&str> {
        match &self.origin {
            FrameOrigin::Placeholder { room_id } => Some(room_id),
            FrameOrigin::Source { .. } => None,
        }
    }

    /// Check that dimensions and buffer length agree.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("empty frame {}x{}", self.width, self.height));
        }
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS as usize))
            .ok_or_else(|| "frame dimensions overflow".to_string())?;
        if self.data.len() != expected {
            return Err(format!(
                "expected {} RGB bytes for {}x{}, found {}",
                expected,
                self.width,
                self.height,
                self.data.len()
            ));
        }
        Ok(())
    }

    /// SHA-256 over dimensions and pixels.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.width.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        hasher.update(&self.data);
        hasher.finalize().into()
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }

    /// Mean luminance (BT.601) in 0..=255.
    pub fn mean_luma(&self) -> f32 {
        let pixels = self.data.len() / RGB_CHANNELS as usize;
        if pixels == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .data
            .chunks_exact(RGB_CHANNELS as usize)
            .map(|px| 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64)
            .sum();
        (sum / pixels as f64) as f32
    }

    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        self.validate().map_err(anyhow::Error::msg)?;
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode(&self.data, self.width, self.height, ExtendedColorType::Rgb8)
            .context("encode frame as JPEG")?;
        Ok(out)
    }
}
