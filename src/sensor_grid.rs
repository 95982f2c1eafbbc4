//! The camera/chip grid and the file layout of its full-frame images.
//!
//! The instrument has 4 cameras with 4 chips each. Every cell owns one
//! directory of full-frame images, one of which is the *reference* image whose
//! WCS header the locator uses. Reference images share a single observation
//! timestamp, except for a small, table-driven list of cells whose canonical
//! frame was taken at a different epoch.
//!
//! Default layout (sector 16, the layout the tool was built around):
//!
//! ```text
//! <root>/2019/2019_1_{camera}-{chip}/ffis/tess2019132000826-{camera}-{chip}-0016-s_ffic.fits
//! <root>/pointingModel_{camera}-{chip}.txt
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{EllieError, Result};

/// Number of cameras (and of chips per camera).
pub const GRID_SIZE: u8 = 4;

/// One sensor of the grid: `camera` and `chip`, both in `1..=4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorCell {
    camera: u8,
    chip: u8,
}

impl SensorCell {
    pub fn new(camera: u8, chip: u8) -> Result<Self> {
        if !(1..=GRID_SIZE).contains(&camera) || !(1..=GRID_SIZE).contains(&chip) {
            return Err(EllieError::InvalidSensorCell { camera, chip });
        }
        Ok(Self { camera, chip })
    }

    pub fn camera(&self) -> u8 {
        self.camera
    }

    pub fn chip(&self) -> u8 {
        self.chip
    }
}

impl fmt::Display for SensorCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "camera {} chip {}", self.camera, self.chip)
    }
}

/// All cells in scan order: camera-major, chip-minor.
pub const ALL_CELLS: [SensorCell; 16] = {
    let mut cells = [SensorCell { camera: 1, chip: 1 }; 16];
    let mut i = 0;
    while i < 16 {
        cells[i] = SensorCell {
            camera: (i / 4) as u8 + 1,
            chip: (i % 4) as u8 + 1,
        };
        i += 1;
    }
    cells
};

/// A cell whose reference frame was captured at a different timestamp than the
/// rest of the grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochException {
    pub camera: u8,
    pub chip: u8,
    /// Filename timestamp of the reference frame, `YYYYDDDHHMMSS`.
    pub timestamp: String,
}

/// Where a cell's reference image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub cell: SensorCell,
    /// Directory holding all frames of the cell.
    pub directory: PathBuf,
    /// Full path of the reference frame.
    pub file: PathBuf,
    /// Whether the reference frame comes from an [`EpochException`].
    pub alternate_epoch: bool,
}

/// Immutable description of the sensor grid on disk.
///
/// Build one per run and share it read-only; nothing in the crate mutates it.
#[derive(Debug, Clone)]
pub struct SensorGrid {
    /// Root of the data tree.
    pub root: PathBuf,
    /// Observation year, used in the directory names.
    pub year: u16,
    /// Orbit segment number in the directory names (`2019_{segment}_...`).
    pub segment: u8,
    /// Sector number, zero-padded to 4 digits in the filenames.
    pub sector: u16,
    /// Timestamp of the reference frame for every cell without an exception.
    pub reference_timestamp: String,
    /// Cells whose reference frame uses a different timestamp.
    pub epoch_exceptions: Vec<EpochException>,
    /// Directory holding the `pointingModel_{camera}-{chip}.txt` tables.
    pub pointing_model_dir: PathBuf,
}

impl SensorGrid {
    /// Default sector-16 layout rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            pointing_model_dir: root.clone(),
            root,
            year: 2019,
            segment: 1,
            sector: 16,
            reference_timestamp: "2019132000826".to_string(),
            epoch_exceptions: vec![
                EpochException {
                    camera: 3,
                    chip: 2,
                    timestamp: "2019130000826".to_string(),
                },
                EpochException {
                    camera: 3,
                    chip: 3,
                    timestamp: "2019130000826".to_string(),
                },
            ],
        }
    }

    /// Iterate the grid in scan order (camera-major, chip-minor).
    pub fn cells(&self) -> impl Iterator<Item = SensorCell> {
        ALL_CELLS.into_iter()
    }

    /// Directory holding every frame of `cell`.
    pub fn directory_for(&self, cell: SensorCell) -> PathBuf {
        self.root
            .join(self.year.to_string())
            .join(format!(
                "{}_{}_{}-{}",
                self.year, self.segment, cell.camera, cell.chip
            ))
            .join("ffis")
    }

    fn exception_for(&self, cell: SensorCell) -> Option<&EpochException> {
        self.epoch_exceptions
            .iter()
            .find(|e| e.camera == cell.camera && e.chip == cell.chip)
    }

    /// Filename of a full-frame image of `cell` taken at `timestamp`.
    pub fn frame_filename(&self, cell: SensorCell, timestamp: &str) -> String {
        format!(
            "tess{}-{}-{}-{:04}-s_ffic.fits",
            timestamp, cell.camera, cell.chip, self.sector
        )
    }

    /// Reference image of an already validated cell.
    pub fn reference_image(&self, cell: SensorCell) -> ReferenceImage {
        let exception = self.exception_for(cell);
        let timestamp = exception
            .map(|e| e.timestamp.as_str())
            .unwrap_or(&self.reference_timestamp);
        let directory = self.directory_for(cell);
        let file = directory.join(self.frame_filename(cell, timestamp));
        ReferenceImage {
            cell,
            directory,
            file,
            alternate_epoch: exception.is_some(),
        }
    }

    /// Reference image for `(camera, chip)`; fails for cells off the grid.
    pub fn reference_image_for(&self, camera: u8, chip: u8) -> Result<ReferenceImage> {
        let cell = SensorCell::new(camera, chip)?;
        Ok(self.reference_image(cell))
    }

    /// Path of the pointing-model table of `cell`.
    pub fn pointing_model_for(&self, cell: SensorCell) -> PathBuf {
        self.pointing_model_dir
            .join(format!("pointingModel_{}-{}.txt", cell.camera, cell.chip))
    }
}
