//! Brute-force search of the sensor grid for the cell that sees a sky position.
//!
//! Every cell's reference image header is read and turned into a
//! [`PixelTransform`]; the position is projected and accepted when it lands
//! inside the image, edges included. Cells are tried camera-major, chip-minor
//! and the first acceptance wins, so a position on an edge shared by two cells
//! always resolves to the same one.

use tracing::{debug, info, warn};

use crate::error::{EllieError, Result};
use crate::fits::FitsReader;
use crate::sensor_grid::{ReferenceImage, SensorCell, SensorGrid};
use crate::sky::SkyPosition;
use crate::wcs::PixelTransform;

/// Pixel position straight out of the world→pixel transform, FITS 1-based.
///
/// `x` runs along NAXIS1 (columns), `y` along NAXIS2 (rows).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPixel {
    pub x: f64,
    pub y: f64,
}

/// The cell that contains a position, with the position in its pixel frame.
#[derive(Debug, Clone)]
pub struct SensorMatch {
    pub cell: SensorCell,
    pub raw: RawPixel,
    pub reference: ReferenceImage,
    pub transform: PixelTransform,
}

/// Locator over an immutable [`SensorGrid`].
///
/// Transforms are rebuilt from the reference headers on every call.
#[derive(Debug, Clone, Copy)]
pub struct Locator<'a> {
    grid: &'a SensorGrid,
}

impl<'a> Locator<'a> {
    pub fn new(grid: &'a SensorGrid) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> &'a SensorGrid {
        self.grid
    }

    /// Find the first cell whose reference image contains `position`.
    ///
    /// `Ok(None)` means the position is on no sensor. A reference image that
    /// is missing or unreadable aborts the search; a header that does not
    /// yield a usable transform only skips its cell.
    pub fn locate(&self, position: &SkyPosition) -> Result<Option<SensorMatch>> {
        for cell in self.grid.cells() {
            let reference = self.grid.reference_image(cell);
            let transform = match self.transform_for(&reference)? {
                Some(t) => t,
                None => continue,
            };

            let Some((x, y)) = transform.world_to_pixel(position) else {
                debug!("{}: {} is behind the tangent plane", cell, position);
                continue;
            };
            debug!("{}: {} projects to ({:.3}, {:.3})", cell, position, x, y);

            if transform.contains(x, y) {
                info!(
                    "{} found on {} at pixel ({:.3}, {:.3})",
                    position, cell, x, y
                );
                return Ok(Some(SensorMatch {
                    cell,
                    raw: RawPixel { x, y },
                    reference,
                    transform,
                }));
            }
        }
        info!("{} is not on any sensor", position);
        Ok(None)
    }

    /// Read the reference header of a cell and build its transform.
    ///
    /// `Ok(None)` when the header does not describe a usable transform.
    fn transform_for(&self, reference: &ReferenceImage) -> Result<Option<PixelTransform>> {
        let cell = reference.cell;
        let wrap = |source: EllieError| EllieError::ReferenceImage {
            cell,
            path: reference.file.clone(),
            source: Box::new(source),
        };
        let mut fits = FitsReader::open(&reference.file).map_err(wrap)?;
        let hdu = fits.image_hdu().map_err(wrap)?;

        match PixelTransform::from_keywords(&mut fits.keywords(&hdu)) {
            Ok(t) => Ok(Some(t)),
            Err(e) => {
                let err = EllieError::TransformConstruction {
                    cell,
                    path: reference.file.clone(),
                    reason: e.to_string(),
                };
                warn!("skipping cell: {}", err);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        synthetic_grid, write_raw_header, write_reference, GRID_HEIGHT, GRID_WIDTH,
    };
    use nalgebra::Matrix2;

    fn init_logging() {
        let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();
    }

    #[test]
    fn every_cell_center_is_located() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let (grid, transforms) = synthetic_grid(dir.path());
        let locator = Locator::new(&grid);

        for (cell, t) in &transforms {
            let center = t.pixel_to_world(GRID_WIDTH as f64 / 2.0, GRID_HEIGHT as f64 / 2.0);
            let m = locator.locate(&center).unwrap().expect("center must be on grid");
            assert_eq!(m.cell, *cell);
            assert!((m.raw.x - GRID_WIDTH as f64 / 2.0).abs() < 1e-6);
            assert!((m.raw.y - GRID_HEIGHT as f64 / 2.0).abs() < 1e-6);
            assert_eq!(m.reference, grid.reference_image(*cell));
        }
    }

    #[test]
    fn off_grid_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (grid, _) = synthetic_grid(dir.path());
        let locator = Locator::new(&grid);
        assert!(locator
            .locate(&SkyPosition::new(0.0, 85.0))
            .unwrap()
            .is_none());
        assert!(locator
            .locate(&SkyPosition::new(0.0, -89.0))
            .unwrap()
            .is_none());
    }

    fn flat(crval: SkyPosition, crpix: [f64; 2]) -> PixelTransform {
        let s = 0.01;
        PixelTransform::new(crval, crpix, Matrix2::new(-s, 0.0, 0.0, s), GRID_WIDTH, GRID_HEIGHT)
            .unwrap()
    }

    #[test]
    fn edges_are_inclusive_and_first_cell_wins() {
        let dir = tempfile::tempdir().unwrap();
        let (grid, _) = synthetic_grid(dir.path());
        let target = SkyPosition::new(200.0, 0.0);
        let c11 = SensorCell::new(1, 1).unwrap();
        let c12 = SensorCell::new(1, 2).unwrap();

        // Target on the right edge of (1, 1) and the left edge of (1, 2).
        write_reference(&grid, c11, Some(&flat(target, [GRID_WIDTH as f64, 10.0])));
        write_reference(&grid, c12, Some(&flat(target, [0.0, 10.0])));
        let m = Locator::new(&grid).locate(&target).unwrap().unwrap();
        assert_eq!(m.cell, c11);
        assert_eq!(m.raw, RawPixel { x: GRID_WIDTH as f64, y: 10.0 });

        // Just past the right edge of (1, 1): falls through to (1, 2) at x = 0.
        write_reference(&grid, c11, Some(&flat(target, [GRID_WIDTH as f64 + 1e-3, 10.0])));
        let m = Locator::new(&grid).locate(&target).unwrap().unwrap();
        assert_eq!(m.cell, c12);
        assert_eq!(m.raw, RawPixel { x: 0.0, y: 10.0 });
    }

    #[test]
    fn bad_wcs_skips_cell() {
        let dir = tempfile::tempdir().unwrap();
        let (grid, transforms) = synthetic_grid(dir.path());
        let (cell, t) = &transforms[5];
        let center = t.pixel_to_world(10.0, 10.0);

        write_reference(&grid, *cell, None);
        assert!(Locator::new(&grid).locate(&center).unwrap().is_none());

        // Cells after the broken one are still searched.
        let (later, lt) = &transforms[9];
        let p = lt.pixel_to_world(20.0, 20.0);
        assert_eq!(Locator::new(&grid).locate(&p).unwrap().unwrap().cell, *later);
    }

    #[test]
    fn missing_reference_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (grid, transforms) = synthetic_grid(dir.path());
        let (cell, t) = &transforms[2];
        std::fs::remove_file(grid.reference_image(*cell).file).unwrap();

        // Cells scanned before the gap still resolve.
        let (_, t0) = &transforms[0];
        assert!(Locator::new(&grid).locate(&t0.pixel_to_world(5.0, 5.0)).is_ok());

        match Locator::new(&grid).locate(&t.pixel_to_world(5.0, 5.0)) {
            Err(EllieError::ReferenceImage { cell: c, path, source }) => {
                assert_eq!(c, *cell);
                assert_eq!(path, grid.reference_image(*cell).file);
                assert!(matches!(*source, EllieError::Io { .. }));
            }
            other => panic!("expected ReferenceImage error, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_reference_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (grid, _) = synthetic_grid(dir.path());
        let cell = SensorCell::new(1, 1).unwrap();
        std::fs::write(grid.reference_image(cell).file, b"not a fits file").unwrap();
        let err = Locator::new(&grid)
            .locate(&SkyPosition::new(10.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, EllieError::ReferenceImage { .. }), "{err}");
    }

    #[test]
    fn oversized_reference_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (grid, _) = synthetic_grid(dir.path());
        let cell = SensorCell::new(1, 1).unwrap();
        write_raw_header(
            &grid.reference_image(cell).file,
            &[
                "SIMPLE  =                    T",
                "BITPIX  =                  -32",
                "NAXIS   =                    2",
                "NAXIS1  =        4000000000000",
                "NAXIS2  =        4000000000000",
            ],
        );
        match Locator::new(&grid).locate(&SkyPosition::new(10.0, 0.0)) {
            Err(EllieError::ReferenceImage { source, .. }) => {
                assert!(matches!(*source, EllieError::Fits { .. }), "{source}");
            }
            other => panic!("expected ReferenceImage error, got {other:?}"),
        }
    }
}
