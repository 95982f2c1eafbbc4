//! Synthetic sensor grids and frames for unit tests.

use std::path::Path;

use nalgebra::Matrix2;

use crate::fits::{write_fits, FitsReader, Header, ImageData, ImageHdu};
use crate::sensor_grid::{SensorCell, SensorGrid};
use crate::sky::SkyPosition;
use crate::wcs::PixelTransform;

pub const GRID_WIDTH: usize = 64;
pub const GRID_HEIGHT: usize = 48;

/// Plate scale of the synthetic sensors, degrees per pixel.
const SCALE: f64 = 0.01;

/// Cell `i` (scan order) looks at RA = 10 + 20·i on the equator, so no two
/// fields overlap.
pub fn cell_center(i: usize) -> SkyPosition {
    SkyPosition::new(10.0 + 20.0 * i as f64, 0.0)
}

/// Pixel value at `(col, row)` of the frame with the given token. Unique per
/// pixel and frame so tests can tell where a cutout came from.
pub fn pixel_value(token: u64, col: usize, row: usize) -> f32 {
    (token % 1000) as f32 * 10_000.0 + (row * GRID_WIDTH + col) as f32
}

/// Write a reference image for `cell`, with `transform` as its WCS or with no
/// WCS at all.
pub fn write_reference(grid: &SensorGrid, cell: SensorCell, transform: Option<&PixelTransform>) {
    let path = grid.reference_image(cell).file;
    let mut header = Header::new();
    if let Some(t) = transform {
        t.write_header(&mut header);
    }
    write_image(&path, GRID_WIDTH, GRID_HEIGHT, header, |_, _| 0.0);
}

/// Write a 2-HDU file shaped like a full-frame image: empty primary, image in HDU 1.
pub fn write_image(
    path: &Path,
    width: usize,
    height: usize,
    header: Header,
    value: impl Fn(usize, usize) -> f32,
) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push(value(col, row));
        }
    }
    let mut image = ImageHdu::new(vec![width, height], ImageData::F32(data));
    image.header = header;
    write_fits(path, &[ImageHdu::empty(), image]).unwrap();
}

/// Write a non-reference frame of `cell` whose pixels follow [`pixel_value`].
pub fn write_frame(grid: &SensorGrid, cell: SensorCell, token: u64, tstart: Option<f64>) {
    let path = grid
        .directory_for(cell)
        .join(grid.frame_filename(cell, &token.to_string()));
    let mut header = Header::new();
    if let Some(t) = tstart {
        header.set("TSTART", t);
        header.set("TSTOP", t + 0.02);
    }
    write_image(&path, GRID_WIDTH, GRID_HEIGHT, header, |c, r| {
        pixel_value(token, c, r)
    });
}

/// Write a bare primary header from raw 80-column cards, END and block
/// padding added, with no data following it.
pub fn write_raw_header(path: &Path, cards: &[&str]) {
    let mut block = String::new();
    for card in cards.iter().copied().chain(std::iter::once("END")) {
        block.push_str(&format!("{card:<80}"));
    }
    let padded = block.len().div_ceil(2880) * 2880;
    let block = format!("{block:<padded$}");
    std::fs::write(path, block).unwrap();
}

/// Transform as stored in the image HDU of `path`.
pub fn read_transform(path: &Path) -> PixelTransform {
    let mut fits = FitsReader::open(path).unwrap();
    let hdu = fits.image_hdu().unwrap();
    PixelTransform::from_keywords(&mut fits.keywords(&hdu)).unwrap()
}

/// A complete 16-cell grid under `root`, with the transforms written into
/// each reference image (scan order). The returned transforms are read back
/// from the files.
pub fn synthetic_grid(root: &Path) -> (SensorGrid, Vec<(SensorCell, PixelTransform)>) {
    let grid = SensorGrid::new(root);
    let cd = Matrix2::new(-SCALE, 0.0, 0.0, SCALE);
    let crpix = [GRID_WIDTH as f64 / 2.0, GRID_HEIGHT as f64 / 2.0];
    let transforms: Vec<_> = grid
        .cells()
        .enumerate()
        .map(|(i, cell)| {
            let t = PixelTransform::new(cell_center(i), crpix, cd, GRID_WIDTH, GRID_HEIGHT).unwrap();
            write_reference(&grid, cell, Some(&t));
            (cell, read_transform(&grid.reference_image(cell).file))
        })
        .collect();
    (grid, transforms)
}
