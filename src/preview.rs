//! PNG preview of a cutout stack.

use std::path::Path;

use image::{GrayImage, Luma};
use tracing::{debug, info};

use crate::cutout::CutoutStack;
use crate::error::{EllieError, Result};

/// Screen pixels per cutout pixel.
const UPSCALE: u32 = 32;

/// 1st / 99th percentile of the finite values.
fn stretch_limits(values: &[f32]) -> Option<(f32, f32)> {
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f32::total_cmp);
    let lo = sorted[sorted.len() / 100];
    let hi = sorted[(sorted.len() * 99 / 100).min(sorted.len() - 1)];
    Some((lo, hi))
}

/// Render one frame with a percentile sqrt stretch, row 0 at the bottom.
pub fn render_frame(stack: &CutoutStack, frame: usize) -> GrayImage {
    let (w, h) = (stack.width as u32, stack.height as u32);
    let flux = &stack.frames[frame].flux;
    let (lo, hi) = stretch_limits(flux).unwrap_or((0.0, 0.0));
    let range = hi - lo;
    debug!("preview stretch: lo={:.1}, hi={:.1}", lo, hi);

    let mut img = GrayImage::new(w * UPSCALE, h * UPSCALE);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let col = x / UPSCALE;
        let row = h - 1 - y / UPSCALE;
        let v = flux[(row * w + col) as usize];
        let normed = if range > 0.0 && v.is_finite() {
            ((v - lo) / range).clamp(0.0, 1.0)
        } else {
            0.0
        };
        *pixel = Luma([(normed.sqrt() * 255.0) as u8]);
    }
    img
}

/// Write the first frame of `stack` as a PNG.
pub fn save_first_frame_png<P: AsRef<Path>>(stack: &CutoutStack, path: P) -> Result<()> {
    let path = path.as_ref();
    if stack.is_empty() {
        return Err(EllieError::NoFrames);
    }
    render_frame(stack, 0)
        .save(path)
        .map_err(|source| EllieError::Preview {
            path: path.to_path_buf(),
            source,
        })?;
    info!("Saved preview {}", path.display());
    Ok(())
}
