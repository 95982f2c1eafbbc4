//! Synthetic TESS-like data tree shared by the integration tests.
//!
//! Four cameras spaced 18° apart in declination, each with a 2x2 mosaic of
//! small CCDs at 21"/px. Camera 2 carries SIP distortion. Every cell gets a
//! reference frame laid out like a real sector-16 full-frame image: empty
//! primary HDU, image + WCS + TSTART/TSTOP in HDU 1.

#![allow(dead_code)]

use std::path::Path;

use ellie::fits::{write_fits, FitsReader, Header, ImageData, ImageHdu};
use ellie::wcs::{inverse_tan_project, Sip, SipPolynomial};
use ellie::{PixelTransform, SensorCell, SensorGrid, SkyPosition};
use nalgebra::{Matrix2, Rotation2, Vector2};

pub const WIDTH: usize = 200;
pub const HEIGHT: usize = 180;
pub const SCALE_DEG: f64 = 21.0 / 3600.0;

/// Tangent-plane offset of each chip center from its camera boresight, degrees.
const CHIP_OFFSET_DEG: f64 = 0.65;

pub struct SyntheticSky {
    pub grid: SensorGrid,
    /// Transforms in scan order, as read back from the reference frames.
    pub transforms: Vec<(SensorCell, PixelTransform)>,
}

impl SyntheticSky {
    pub fn transform(&self, camera: u8, chip: u8) -> &PixelTransform {
        let cell = SensorCell::new(camera, chip).unwrap();
        &self
            .transforms
            .iter()
            .find(|(c, _)| *c == cell)
            .unwrap()
            .1
    }
}

fn camera_boresight(camera: u8) -> SkyPosition {
    SkyPosition::new(290.0, -18.0 - 18.0 * (camera as f64 - 1.0))
}

fn camera_roll_deg(camera: u8) -> f64 {
    7.5 * camera as f64
}

fn sip_for(camera: u8) -> Option<Sip> {
    if camera != 2 {
        return None;
    }
    let poly = |terms: Vec<(u32, u32, f64)>| SipPolynomial { order: 2, terms };
    Some(Sip {
        a: poly(vec![(2, 0, 2.0e-6), (0, 2, -1.0e-6)]),
        b: poly(vec![(1, 1, 1.5e-6)]),
        ap: None,
        bp: None,
    })
}

/// WCS of `cell`: chips sit on a rotated 2x2 pattern around the boresight.
pub fn cell_transform(cell: SensorCell) -> PixelTransform {
    let camera = cell.camera();
    let chip = cell.chip() as usize - 1;
    let roll = Rotation2::new(camera_roll_deg(camera).to_radians());
    let quadrant = Vector2::new(
        if chip % 2 == 0 { -1.0 } else { 1.0 },
        if chip < 2 { 1.0 } else { -1.0 },
    ) * CHIP_OFFSET_DEG;
    let offset = roll * quadrant;

    let boresight = camera_boresight(camera);
    let (ra, dec) = inverse_tan_project(
        offset.x.to_radians(),
        offset.y.to_radians(),
        boresight.ra_rad(),
        boresight.dec_rad(),
    );
    let crval = SkyPosition::new(ra.to_degrees().rem_euclid(360.0), dec.to_degrees());
    let cd = roll.matrix() * Matrix2::new(-SCALE_DEG, 0.0, 0.0, SCALE_DEG);
    let crpix = [WIDTH as f64 / 2.0 + 0.5, HEIGHT as f64 / 2.0 + 0.5];

    let t = PixelTransform::new(crval, crpix, cd, WIDTH, HEIGHT).unwrap();
    match sip_for(camera) {
        Some(sip) => t.with_sip(sip),
        None => t,
    }
}

/// Pixel value of frame `token` at zero-based `(col, row)`.
pub fn pixel_value(token: u64, col: usize, row: usize) -> f32 {
    (token % 100) as f32 * 100_000.0 + (row * WIDTH + col) as f32
}

/// Mid-exposure time written for a token.
pub fn frame_time(token: u64) -> f64 {
    1600.0 + (token % 100_000) as f64 / 1000.0
}

/// Write one full-frame image of `cell` with timestamp `token`.
pub fn write_ffi(grid: &SensorGrid, cell: SensorCell, token: u64, transform: &PixelTransform) {
    let path = grid
        .directory_for(cell)
        .join(grid.frame_filename(cell, &token.to_string()));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();

    let mut primary = ImageHdu::empty();
    primary.header.set("TELESCOP", "TESS");
    primary.header.set("CAMERA", cell.camera() as i64);
    primary.header.set("CCD", cell.chip() as i64);

    let mut data = Vec::with_capacity(WIDTH * HEIGHT);
    for row in 0..HEIGHT {
        for col in 0..WIDTH {
            data.push(pixel_value(token, col, row));
        }
    }
    let mut header = Header::new();
    transform.write_header(&mut header);
    let t = frame_time(token);
    header.set("TSTART", t - 0.01);
    header.set("TSTOP", t + 0.01);
    let mut image = ImageHdu::new(vec![WIDTH, HEIGHT], ImageData::F32(data));
    image.header = header;

    write_fits(&path, &[primary, image]).unwrap();
}

/// Transform stored in the image HDU of `path`.
pub fn read_transform(path: &Path) -> PixelTransform {
    let mut fits = FitsReader::open(path).unwrap();
    let hdu = fits.image_hdu().unwrap();
    PixelTransform::from_keywords(&mut fits.keywords(&hdu)).unwrap()
}

/// Build the full grid with reference frames under `root`, plus an identity
/// pointing model for every cell.
pub fn build(root: &Path) -> SyntheticSky {
    let grid = SensorGrid::new(root);
    let transforms: Vec<_> = grid
        .cells()
        .map(|cell| {
            let t = cell_transform(cell);
            let reference = grid.reference_image(cell);
            let token = reference
                .file
                .file_name()
                .and_then(|n| ellie::assemble::parse_frame_token(n.to_str()?))
                .unwrap();
            write_ffi(&grid, cell, token, &t);
            write_pointing_model(&grid, cell, 0.0, 0.0, 0.0);
            (cell, read_transform(&reference.file))
        })
        .collect();
    SyntheticSky { grid, transforms }
}

pub fn write_pointing_model(grid: &SensorGrid, cell: SensorCell, theta_deg: f64, dx: f64, dy: f64) {
    let text = format!(
        "epoch theta dx dy\n0 {theta_deg} {dx} {dy}\n1 {} {} {}\n",
        theta_deg * 2.0,
        dx * 2.0,
        dy * 2.0
    );
    std::fs::write(grid.pointing_model_for(cell), text).unwrap();
}
