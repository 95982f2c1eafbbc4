//! Target pixel file: the cutout stack plus the metadata that identifies it.
//!
//! On disk it is a FITS file with two HDUs:
//!
//! | HDU | Content |
//! |-----|---------|
//! | primary | `BITPIX = -32` cube, `NAXIS1 = width`, `NAXIS2 = height`, `NAXIS3 = frames` |
//! | `TIME`  | `BITPIX = -64` vector of mid-exposure times (NaN when unknown) |
//!
//! Primary header keywords:
//!
//! - `PROVIDER`: catalog the product was requested from (`tic` or `gaia`)
//! - `TIC_ID` or `GAIA_ID`: identifier the product was requested with. When the
//!   crossmatch ran against the other catalog, its match is stored under that
//!   catalog's keyword too, so a TIC product crossmatched with Gaia carries both.
//! - `XM_ID`, `XM_SERV`: crossmatch result and the service asked (`XM_ID` only when a match was found)
//! - `XM_SEP`, `XM_MAG`: separation in arcseconds and magnitude of the match
//! - `CEN_RA`, `CEN_DEC`: sky position of the source
//! - `CEN_X`, `CEN_Y`: pixel position from the locator, *before* the pointing correction
//! - `COR_X`, `COR_Y`: corrected position the window was placed on
//! - `CUT_X0`, `CUT_Y0`: zero-based array origin of the window
//! - `CAMERA`, `CHIP`: sensor cell
//!
//! The `TIME` header also records each frame's filename (`FILEnnnn`) and
//! token (`TOKnnnnn`) so the stack can be traced back to its sources.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::catalog::CatalogProvider;
use crate::cutout::{CutoutFrame, CutoutStack};
use crate::error::{EllieError, Result};
use crate::fits::{write_fits, FitsReader, Header, ImageData, ImageHdu};
use crate::locate::RawPixel;
use crate::pointing::CorrectedPixel;
use crate::sensor_grid::SensorCell;
use crate::sky::SkyPosition;

const TIME_EXTNAME: &str = "TIME";

/// What the cutout is of, and where it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct CutoutMetadata {
    pub provider: CatalogProvider,
    pub catalog_id: u64,
    /// Identifier of the crossmatch counterpart, when one was found.
    pub crossmatch_id: Option<String>,
    pub crossmatch_service: String,
    pub crossmatch_separation_arcsec: Option<f64>,
    pub crossmatch_magnitude: Option<f64>,
    pub center: SkyPosition,
    /// Raw locator output; the window itself was placed on the corrected position.
    pub center_pixel: RawPixel,
}

impl CutoutMetadata {
    /// The crossmatch counterpart as an identifier of the catalog behind the
    /// service, when that is not the catalog of the request.
    pub fn crossmatch_catalog_id(&self) -> Option<(CatalogProvider, i64)> {
        let other = CatalogProvider::for_crossmatch_service(&self.crossmatch_service)?;
        if other == self.provider {
            return None;
        }
        let id = self.crossmatch_id.as_deref()?.trim().parse().ok()?;
        Some((other, id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CutoutProduct {
    pub cell: SensorCell,
    pub metadata: CutoutMetadata,
    pub stack: CutoutStack,
}

fn frame_keyword(prefix: &str, index: usize) -> String {
    let width = 8 - prefix.len();
    format!("{prefix}{:0width$}", index + 1)
}

impl CutoutProduct {
    /// Frames that fit the per-frame keyword numbering of the `TIME` header.
    pub const MAX_FRAMES: usize = 9_999;

    fn primary_header(&self) -> Header {
        let m = &self.metadata;
        let mut h = Header::new();
        h.set("PROVIDER", m.provider.name());
        h.set(m.provider.id_keyword(), m.catalog_id as i64);
        if let Some((other, id)) = m.crossmatch_catalog_id() {
            h.set(other.id_keyword(), id);
        }
        if let Some(xm) = &m.crossmatch_id {
            h.set("XM_ID", xm.as_str());
        }
        h.set("XM_SERV", m.crossmatch_service.as_str());
        if let Some(sep) = m.crossmatch_separation_arcsec {
            h.set("XM_SEP", sep);
        }
        if let Some(mag) = m.crossmatch_magnitude {
            h.set("XM_MAG", mag);
        }
        h.set("CEN_RA", m.center.ra_deg);
        h.set("CEN_DEC", m.center.dec_deg);
        h.set("CEN_X", m.center_pixel.x);
        h.set("CEN_Y", m.center_pixel.y);
        h.set("COR_X", self.stack.center.x);
        h.set("COR_Y", self.stack.center.y);
        h.set("CUT_X0", self.stack.col0 as i64);
        h.set("CUT_Y0", self.stack.row0 as i64);
        h.set("CAMERA", self.cell.camera() as i64);
        h.set("CHIP", self.cell.chip() as i64);
        h
    }

    fn time_header(&self) -> Header {
        let mut h = Header::new();
        h.set("EXTNAME", TIME_EXTNAME);
        h.set("TUNIT", "d");
        for (i, frame) in self.stack.frames.iter().enumerate() {
            let name = frame
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            h.set(&frame_keyword("FILE", i), name);
            h.set(&frame_keyword("TOK", i), frame.token as i64);
        }
        h
    }

    /// Write the product to `path`, overwriting any existing file.
    pub fn write_fits<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let stack = &self.stack;
        if stack.is_empty() {
            return Err(EllieError::NoFrames);
        }
        if stack.len() > Self::MAX_FRAMES {
            return Err(EllieError::fits(
                path,
                format!("{} frames, at most {} supported", stack.len(), Self::MAX_FRAMES),
            ));
        }

        let mut cube = Vec::with_capacity(stack.width * stack.height * stack.len());
        for frame in &stack.frames {
            cube.extend_from_slice(&frame.flux);
        }
        let mut primary = ImageHdu::new(
            vec![stack.width, stack.height, stack.len()],
            ImageData::F32(cube),
        );
        primary.header = self.primary_header();

        let times = stack
            .frames
            .iter()
            .map(|f| f.time.unwrap_or(f64::NAN))
            .collect();
        let mut time = ImageHdu::new(vec![stack.len()], ImageData::F64(times));
        time.header = self.time_header();

        write_fits(path, &[primary, time])?;
        info!(
            "Wrote {} ({} frames of {}x{})",
            path.display(),
            stack.len(),
            stack.width,
            stack.height
        );
        Ok(())
    }

    /// Read back a product written by [`CutoutProduct::write_fits`].
    ///
    /// Frame paths are restored as bare filenames.
    pub fn read_fits<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut fits = FitsReader::open(path)?;
        let primary = fits.primary()?;
        let missing = |key: &str| EllieError::fits(path, format!("missing keyword {key}"));
        let mut float = |key: &str| fits.key::<f64>(&primary, key).ok_or_else(|| missing(key));
        let center = SkyPosition::new(float("CEN_RA")?, float("CEN_DEC")?);
        let center_pixel = RawPixel {
            x: float("CEN_X")?,
            y: float("CEN_Y")?,
        };
        let corrected = CorrectedPixel {
            x: float("COR_X")?,
            y: float("COR_Y")?,
        };
        let mut int = |key: &str| fits.key::<i64>(&primary, key).ok_or_else(|| missing(key));
        let camera = int("CAMERA")?;
        let chip = int("CHIP")?;
        let col0 = int("CUT_X0")?;
        let row0 = int("CUT_Y0")?;

        let provider: CatalogProvider = fits
            .key::<String>(&primary, "PROVIDER")
            .ok_or_else(|| missing("PROVIDER"))?
            .parse()?;
        let catalog_id = fits
            .key::<i64>(&primary, provider.id_keyword())
            .ok_or_else(|| missing(provider.id_keyword()))?;

        let cell = SensorCell::new(camera as u8, chip as u8)?;
        let metadata = CutoutMetadata {
            provider,
            catalog_id: catalog_id as u64,
            crossmatch_id: fits.key::<String>(&primary, "XM_ID"),
            crossmatch_service: fits.key::<String>(&primary, "XM_SERV").unwrap_or_default(),
            crossmatch_separation_arcsec: fits.key::<f64>(&primary, "XM_SEP"),
            crossmatch_magnitude: fits.key::<f64>(&primary, "XM_MAG"),
            center,
            center_pixel,
        };

        let (width, height, n) = match *primary.axes() {
            [w, rows, n] if w > 0 && rows > 0 => (w, rows, n),
            ref other => {
                return Err(EllieError::fits(
                    path,
                    format!("expected a non-empty 3-axis cube, found axes {other:?}"),
                ))
            }
        };
        let values = fits.read_all(&primary)?;

        let time_hdu = fits
            .named(TIME_EXTNAME)
            .map_err(|_| EllieError::fits(path, "no TIME extension"))?;
        let times = fits.read_all(&time_hdu)?;
        if times.len() != n {
            return Err(EllieError::fits(
                path,
                format!("{} times for {} frames", times.len(), n),
            ));
        }

        let mut frames = Vec::with_capacity(n);
        for (i, (flux, &t)) in values.chunks_exact(width * height).zip(&times).enumerate() {
            let name = fits
                .key::<String>(&time_hdu, &frame_keyword("FILE", i))
                .unwrap_or_default();
            let token = fits
                .key::<i64>(&time_hdu, &frame_keyword("TOK", i))
                .unwrap_or(0);
            frames.push(CutoutFrame {
                path: PathBuf::from(name),
                token: token as u64,
                time: (!t.is_nan()).then_some(t),
                flux: flux.iter().map(|&v| v as f32).collect(),
            });
        }

        Ok(Self {
            cell,
            metadata,
            stack: CutoutStack {
                width,
                height,
                col0: col0 as usize,
                row0: row0 as usize,
                center: corrected,
                frames,
            },
        })
    }
}
