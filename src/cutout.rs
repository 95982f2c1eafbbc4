//! Fixed-size cutouts around a pixel position, one per frame.
//!
//! The window is placed once from the corrected center and reused for every
//! frame:
//!
//! ```text
//! col0 = floor(center.x) - floor(width / 2)
//! row0 = floor(center.y) - floor(height / 2)
//! ```
//!
//! The center is read in zero-based array coordinates, so the pixel holding
//! it sits at `(width / 2, height / 2)` of the window. Every frame is checked
//! against the window before any pixel data is read, so a window that leaves
//! any one frame produces an error and no stack at all.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::assemble::FrameFile;
use crate::error::{EllieError, Result};
use crate::fits::{FitsReader, Hdu};
use crate::pointing::CorrectedPixel;

/// Cutout dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoutSize {
    pub width: usize,
    pub height: usize,
}

impl Default for CutoutSize {
    fn default() -> Self {
        Self {
            width: 9,
            height: 9,
        }
    }
}

/// The cutout of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CutoutFrame {
    pub path: PathBuf,
    pub token: u64,
    /// Mid-exposure time, `(TSTART + TSTOP) / 2`, when the frame header has both.
    pub time: Option<f64>,
    /// `width * height` values, row-major.
    pub flux: Vec<f32>,
}

/// Time-ordered cutouts sharing one window.
#[derive(Debug, Clone, PartialEq)]
pub struct CutoutStack {
    pub width: usize,
    pub height: usize,
    /// Zero-based array column of the window's first pixel.
    pub col0: usize,
    /// Zero-based array row of the window's first pixel.
    pub row0: usize,
    pub center: CorrectedPixel,
    pub frames: Vec<CutoutFrame>,
}

impl CutoutStack {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Value at `(col, row)` of the window in frame `frame`.
    pub fn value(&self, frame: usize, col: usize, row: usize) -> f32 {
        self.frames[frame].flux[row * self.width + col]
    }
}

/// Window origin for a center, before any bounds check.
pub fn window_origin(center: CorrectedPixel, size: CutoutSize) -> (i64, i64) {
    let col0 = center.x.floor() as i64 - (size.width / 2) as i64;
    let row0 = center.y.floor() as i64 - (size.height / 2) as i64;
    (col0, row0)
}

/// `(TSTART + TSTOP) / 2` from the image HDU, else from the primary HDU.
fn mid_exposure(fits: &mut FitsReader, image: &Hdu) -> Result<Option<f64>> {
    let from = |fits: &mut FitsReader, hdu: &Hdu| {
        let start = fits.key::<f64>(hdu, "TSTART")?;
        let stop = fits.key::<f64>(hdu, "TSTOP")?;
        Some((start + stop) / 2.0)
    };
    if let Some(t) = from(fits, image) {
        return Ok(Some(t));
    }
    let primary = fits.primary()?;
    Ok(from(fits, &primary))
}

/// Cut a `size` window around `center` out of every frame, keeping their order.
pub fn extract(frames: &[FrameFile], center: CorrectedPixel, size: CutoutSize) -> Result<CutoutStack> {
    if frames.is_empty() {
        return Err(EllieError::NoFrames);
    }
    let (col0, row0) = window_origin(center, size);
    info!(
        "Extracting {}x{} cutouts at (col {}, row {}) from {} frames",
        size.width,
        size.height,
        col0,
        row0,
        frames.len()
    );

    // Header pass: every frame must hold the whole window.
    for frame in frames {
        let mut fits = FitsReader::open(&frame.path)?;
        let (frame_width, frame_height) = fits.image_hdu()?.image_size();
        let fits_inside = col0 >= 0
            && row0 >= 0
            && col0 as usize + size.width <= frame_width
            && row0 as usize + size.height <= frame_height;
        if !fits_inside {
            return Err(EllieError::BoundsExceeded {
                path: frame.path.clone(),
                col0,
                row0,
                width: size.width,
                height: size.height,
                frame_width,
                frame_height,
            });
        }
    }
    let (col0, row0) = (col0 as usize, row0 as usize);

    let mut cutouts = Vec::with_capacity(frames.len());
    for frame in frames {
        let mut fits = FitsReader::open(&frame.path)?;
        let hdu = fits.image_hdu()?;
        let flux = fits.read_window(&hdu, col0, row0, size.width, size.height)?;
        let time = mid_exposure(&mut fits, &hdu)?;
        debug!("{}: cutout read, time {:?}", frame.path.display(), time);
        cutouts.push(CutoutFrame {
            path: frame.path.clone(),
            token: frame.token,
            time,
            flux,
        });
    }

    Ok(CutoutStack {
        width: size.width,
        height: size.height,
        col0,
        row0,
        center,
        frames: cutouts,
    })
}
