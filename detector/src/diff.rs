use frame_sentry_common::frame::Frame;
use image::{GrayImage, Luma, Rgb, RgbImage};

/// Thresholded grayscale difference between two frames.
#[derive(Debug, Clone)]
pub struct Difference {
    /// Absolute luminance difference with every pixel at or below the
    /// threshold zeroed.
    pub image: GrayImage,
    /// Fraction of pixels whose difference exceeds the threshold, in [0, 1].
    pub change_ratio: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("frame {prev_seq} is {prev_w}x{prev_h} but frame {curr_seq} is {curr_w}x{curr_h}")]
    DimensionMismatch {
        prev_seq: u64,
        prev_w: u32,
        prev_h: u32,
        curr_seq: u64,
        curr_w: u32,
        curr_h: u32,
    },
}

/// ITU-R 601 luma in integer arithmetic: `(299 R + 587 G + 114 B) / 1000`.
fn luma(Rgb([r, g, b]): Rgb<u8>) -> u8 {
    let weighted = u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114;
    (weighted / 1000) as u8
}

fn grayscale(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([luma(*image.get_pixel(x, y))])
    })
}

/// Compare two frames by grayscale absolute difference.
///
/// A pixel counts as changed when `|luma(prev) - luma(curr)| > threshold`.
/// Empty frames have a change ratio of zero.
pub fn difference(prev: &Frame, curr: &Frame, threshold: u8) -> Result<Difference, DiffError> {
    if prev.image.dimensions() != curr.image.dimensions() {
        return Err(DiffError::DimensionMismatch {
            prev_seq: prev.seq,
            prev_w: prev.width(),
            prev_h: prev.height(),
            curr_seq: curr.seq,
            curr_w: curr.width(),
            curr_h: curr.height(),
        });
    }

    let a = grayscale(&prev.image);
    let b = grayscale(&curr.image);

    let mut changed: u64 = 0;
    let mut out = GrayImage::new(a.width(), a.height());
    for ((pa, pb), po) in a.pixels().zip(b.pixels()).zip(out.pixels_mut()) {
        let delta = pa.0[0].abs_diff(pb.0[0]);
        if delta > threshold {
            changed += 1;
            *po = Luma([delta]);
        }
    }

    let total = u64::from(a.width()) * u64::from(a.height());
    let change_ratio = if total == 0 {
        0.0
    } else {
        changed as f64 / total as f64
    };

    Ok(Difference {
        image: out,
        change_ratio,
    })
}
