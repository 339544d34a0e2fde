use frame_sentry_common::frame::{Frame, FrameCursor};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, ImageResult};
use std::io::Cursor;
use tracing::{debug, warn};

use crate::watcher::FrameHandle;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to read frame {seq}: {reason}")]
    Read { seq: u64, reason: String },
    #[error("frame {seq} is not a decodable image: {reason}")]
    Corrupt { seq: u64, reason: String },
    #[error("frame {seq} ({width}x{height}) is too small to downsample by {scale}")]
    TooSmall {
        seq: u64,
        width: u32,
        height: u32,
        scale: u32,
    },
}

/// Turns frame files into downsampled in-memory frames, consuming the file.
pub struct FrameProcessor {
    scale: u32,
}

impl FrameProcessor {
    pub fn new(scale: u32) -> Self {
        Self {
            scale: scale.max(1),
        }
    }

    /// Load the frame behind `handle`, shrink it by the scale factor, delete
    /// the file and advance `cursor`.
    ///
    /// The file is deleted and the cursor advanced whether or not decoding
    /// succeeds, so a bad frame can never stall the sequence.
    pub async fn load_and_scale(
        &self,
        handle: &FrameHandle,
        cursor: &mut FrameCursor,
    ) -> Result<Frame, ProcessError> {
        let result = self.load(handle).await;

        if let Err(e) = tokio::fs::remove_file(&handle.path).await {
            warn!(seq = handle.seq, error = %e, "failed to delete consumed frame");
        }
        cursor.advance();

        result
    }

    async fn load(&self, handle: &FrameHandle) -> Result<Frame, ProcessError> {
        let bytes = tokio::fs::read(&handle.path)
            .await
            .map_err(|e| ProcessError::Read {
                seq: handle.seq,
                reason: e.to_string(),
            })?;

        let img = decode_lenient(&bytes).map_err(|e| ProcessError::Corrupt {
            seq: handle.seq,
            reason: e.to_string(),
        })?;

        let frame = self.downsample(handle.seq, img)?;
        debug!(
            seq = frame.seq,
            width = frame.width(),
            height = frame.height(),
            "frame loaded"
        );
        Ok(frame)
    }

    fn downsample(&self, seq: u64, img: DynamicImage) -> Result<Frame, ProcessError> {
        let (width, height) = (img.width(), img.height());
        let (scaled_w, scaled_h) = (width / self.scale, height / self.scale);
        if scaled_w == 0 || scaled_h == 0 {
            return Err(ProcessError::TooSmall {
                seq,
                width,
                height,
                scale: self.scale,
            });
        }

        let rgb = img.to_rgb8();
        let image = if self.scale == 1 {
            rgb
        } else {
            image::imageops::resize(&rgb, scaled_w, scaled_h, FilterType::CatmullRom)
        };
        Ok(Frame::new(seq, image))
    }
}

/// Decode an image, tolerating a JPEG that was cut off before its end marker.
///
/// The producer writes files while we poll for them, so a frame may be picked
/// up before ffmpeg has flushed the trailing bytes.
pub fn decode_lenient(bytes: &[u8]) -> ImageResult<DynamicImage> {
    match decode(bytes) {
        Ok(img) => Ok(img),
        Err(first) if bytes.starts_with(&JPEG_SOI) && !bytes.ends_with(&JPEG_EOI) => {
            let mut repaired = Vec::with_capacity(bytes.len() + JPEG_EOI.len());
            repaired.extend_from_slice(bytes);
            repaired.extend_from_slice(&JPEG_EOI);
            match decode(&repaired) {
                Ok(img) => {
                    debug!(bytes = bytes.len(), "decoded truncated JPEG");
                    Ok(img)
                }
                Err(_) => Err(first),
            }
        }
        Err(e) => Err(e),
    }
}

fn decode(bytes: &[u8]) -> ImageResult<DynamicImage> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()
}
