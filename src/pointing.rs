//! Per-sensor pointing model: a small rigid rotation + translation that moves
//! a WCS-derived pixel position onto the true spacecraft pointing.
//!
//! The calibration table is plain whitespace-separated text, one header row
//! followed by rows of `epoch θ dx dy` (θ in degrees, offsets in pixels):
//!
//! ```text
//! epoch  theta  dx  dy
//! 0  0.0123  0.41  -0.27
//! 1  0.0119  0.40  -0.29
//! ```
//!
//! Only the first data row is applied. The model assumes that epoch is
//! representative of the whole series being cut out.

use std::path::Path;

use nalgebra::{Rotation2, Vector2};
use thiserror::Error;
use tracing::debug;

use crate::error::{EllieError, Result};
use crate::locate::RawPixel;
use crate::sensor_grid::{SensorCell, SensorGrid};

/// Pixel position after the pointing correction; this is the cutout center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectedPixel {
    pub x: f64,
    pub y: f64,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PointingModelError {
    #[error("table has no data rows")]
    NoDataRows,
    #[error("line {line}: {reason}")]
    BadRow { line: usize, reason: String },
}

/// One row of the calibration table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointingEpoch {
    pub epoch: f64,
    /// Rotation angle in degrees.
    pub theta_deg: f64,
    /// Translation in pixels, subtracted after the rotation.
    pub dx: f64,
    pub dy: f64,
}

impl PointingEpoch {
    /// Rotate by θ about the pixel origin, then subtract `(dx, dy)`:
    ///
    /// ```text
    /// x' = x cosθ − y sinθ − dx
    /// y' = x sinθ + y cosθ − dy
    /// ```
    pub fn apply(&self, raw: RawPixel) -> CorrectedPixel {
        let rotated = Rotation2::new(self.theta_deg.to_radians()) * Vector2::new(raw.x, raw.y);
        CorrectedPixel {
            x: rotated.x - self.dx,
            y: rotated.y - self.dy,
        }
    }
}

/// Time series of pointing corrections for one sensor. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct PointingModel {
    epochs: Vec<PointingEpoch>,
}

impl PointingModel {
    /// Parse the table text. The first non-comment line is the header row.
    pub fn parse(text: &str) -> std::result::Result<Self, PointingModelError> {
        let mut epochs = Vec::new();
        let mut header_seen = false;
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if !header_seen {
                header_seen = true;
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return Err(PointingModelError::BadRow {
                    line: i + 1,
                    reason: format!("expected 4 columns, found {}", fields.len()),
                });
            }
            let mut values = [0.0f64; 4];
            for (value, field) in values.iter_mut().zip(&fields) {
                *value = field.parse().map_err(|_| PointingModelError::BadRow {
                    line: i + 1,
                    reason: format!("'{field}' is not a number"),
                })?;
            }
            epochs.push(PointingEpoch {
                epoch: values[0],
                theta_deg: values[1],
                dx: values[2],
                dy: values[3],
            });
        }
        if epochs.is_empty() {
            return Err(PointingModelError::NoDataRows);
        }
        Ok(Self { epochs })
    }

    /// Load the table of `cell` from `path`. Any problem is a
    /// [`EllieError::MissingCalibration`]: there is no uncorrected fallback.
    pub fn load<P: AsRef<Path>>(path: P, cell: SensorCell) -> Result<Self> {
        let path = path.as_ref();
        let missing = |reason: String| EllieError::MissingCalibration {
            cell,
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| missing(e.to_string()))?;
        Self::parse(&text).map_err(|e| missing(e.to_string()))
    }

    pub fn epochs(&self) -> &[PointingEpoch] {
        &self.epochs
    }

    /// The epoch the correction uses.
    pub fn first_epoch(&self) -> &PointingEpoch {
        &self.epochs[0]
    }

    pub fn correct(&self, raw: RawPixel) -> CorrectedPixel {
        self.first_epoch().apply(raw)
    }
}

/// Load `cell`'s pointing model from the grid layout and correct `raw`.
pub fn correct(grid: &SensorGrid, cell: SensorCell, raw: RawPixel) -> Result<CorrectedPixel> {
    let path = grid.pointing_model_for(cell);
    let model = PointingModel::load(&path, cell)?;
    let corrected = model.correct(raw);
    let e = model.first_epoch();
    debug!(
        "{}: pointing epoch {} (θ={}°, dx={}, dy={}) moves ({:.3}, {:.3}) to ({:.3}, {:.3})",
        cell, e.epoch, e.theta_deg, e.dx, e.dy, raw.x, raw.y, corrected.x, corrected.y
    );
    Ok(corrected)
}
