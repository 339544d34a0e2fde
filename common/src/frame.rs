use image::RgbImage;
use std::path::{Path, PathBuf};

const FRAME_PREFIX: &str = "frame";
const FRAME_EXT: &str = ".jpg";

/// File name the producer writes for a sequence number, e.g. `frame00042.jpg`.
///
/// Matches ffmpeg's `frame%05d.jpg` output pattern. Numbers past 99999 simply
/// widen, as ffmpeg does.
pub fn frame_file_name(seq: u64) -> String {
    format!("{FRAME_PREFIX}{seq:05}{FRAME_EXT}")
}

/// Full path of the frame file for `seq` inside `dir`.
pub fn frame_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(frame_file_name(seq))
}

/// The ffmpeg output pattern producing [`frame_file_name`] names.
pub fn frame_pattern(dir: &Path) -> PathBuf {
    dir.join(format!("{FRAME_PREFIX}%05d{FRAME_EXT}"))
}

/// Parse the sequence number back out of a frame file name.
pub fn parse_frame_seq(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(FRAME_PREFIX)?.strip_suffix(FRAME_EXT)?;
    if digits.len() < 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// A decoded, downsampled camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(seq: u64, image: RgbImage) -> Self {
        Self { seq, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Next sequence number the detector expects from the producer.
///
/// Advances by exactly one per consumed file and only moves backwards
/// through [`FrameCursor::reset`], which the supervisor calls on restart.
#[derive(Debug, Clone)]
pub struct FrameCursor {
    first: u64,
    next: u64,
}

impl FrameCursor {
    pub fn new(first: u64) -> Self {
        Self { first, next: first }
    }

    pub fn expected(&self) -> u64 {
        self.next
    }

    pub fn advance(&mut self) {
        self.next += 1;
    }

    pub fn reset(&mut self) {
        self.next = self.first;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_zero_padded() {
        assert_eq!(frame_file_name(1), "frame00001.jpg");
        assert_eq!(frame_file_name(12345), "frame12345.jpg");
        assert_eq!(frame_file_name(123456), "frame123456.jpg");
    }

    #[test]
    fn pattern_matches_ffmpeg_syntax() {
        let pattern = frame_pattern(Path::new("frames"));
        assert_eq!(pattern, PathBuf::from("frames/frame%05d.jpg"));
    }

    #[test]
    fn parse_accepts_producer_names_only() {
        assert_eq!(parse_frame_seq("frame00042.jpg"), Some(42));
        assert_eq!(parse_frame_seq(&frame_file_name(100001)), Some(100001));
        assert_eq!(parse_frame_seq("frame42.jpg"), None);
        assert_eq!(parse_frame_seq("frame0004a.jpg"), None);
        assert_eq!(parse_frame_seq("full_color.jpg"), None);
    }

    #[test]
    fn cursor_advances_and_resets() {
        let mut cursor = FrameCursor::new(1);
        assert_eq!(cursor.expected(), 1);
        cursor.advance();
        cursor.advance();
        assert_eq!(cursor.expected(), 3);
        cursor.reset();
        assert_eq!(cursor.expected(), 1);
    }

    #[test]
    fn frame_exposes_dimensions() {
        let frame = Frame::new(7, RgbImage::new(4, 3));
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 3);
    }
}
