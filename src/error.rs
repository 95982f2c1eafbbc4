//! Error type shared by every stage of the pipeline.
//!
//! A position that lands on no sensor is *not* an error: the locator reports it
//! as `Ok(None)` and the pipeline as [`TpfOutcome::NotOnGrid`](crate::TpfOutcome).

use std::path::PathBuf;

use thiserror::Error;

use crate::sensor_grid::SensorCell;

pub type Result<T> = std::result::Result<T, EllieError>;

#[derive(Error, Debug)]
pub enum EllieError {
    /// Camera or chip outside `1..=4`.
    #[error("invalid sensor cell: camera {camera}, chip {chip} (both must be in 1..=4)")]
    InvalidSensorCell { camera: u8, chip: u8 },

    /// The WCS header of a reference image could not be turned into a transform.
    /// The locator skips the cell and keeps scanning.
    #[error("cannot build pixel transform for {cell} from {}: {reason}", path.display())]
    TransformConstruction {
        cell: SensorCell,
        path: PathBuf,
        reason: String,
    },

    /// A reference image of the grid is missing or unreadable.
    #[error("reference image for {cell} unavailable ({}): {source}", path.display())]
    ReferenceImage {
        cell: SensorCell,
        path: PathBuf,
        #[source]
        source: Box<EllieError>,
    },

    #[error("pointing model for {cell} unusable ({}): {reason}", path.display())]
    MissingCalibration {
        cell: SensorCell,
        path: PathBuf,
        reason: String,
    },

    /// Requested cutout window does not fit inside a frame.
    #[error(
        "cutout window {width}x{height} at (col {col0}, row {row0}) exceeds frame {} of size {frame_width}x{frame_height}",
        path.display()
    )]
    BoundsExceeded {
        path: PathBuf,
        col0: i64,
        row0: i64,
        width: usize,
        height: usize,
        frame_width: usize,
        frame_height: usize,
    },

    #[error("no frame files to extract cutouts from")]
    NoFrames,

    #[error("{service} failed: {reason}")]
    ExternalService { service: String, reason: String },

    #[error("unknown catalog provider '{0}' (expected 'tic' or 'gaia')")]
    UnknownProvider(String),

    /// A line of a batch source list is not `<id> <provider>`.
    #[error("{}:{line}: {reason}", path.display())]
    SourceList {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("FITS error in {}: {reason}", path.display())]
    Fits { path: PathBuf, reason: String },

    #[cfg(feature = "image")]
    #[error("cannot write preview {}: {source}", path.display())]
    Preview {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EllieError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EllieError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn fits(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        EllieError::Fits {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn external(service: impl Into<String>, reason: impl Into<String>) -> Self {
        EllieError::ExternalService {
            service: service.into(),
            reason: reason.into(),
        }
    }
}
