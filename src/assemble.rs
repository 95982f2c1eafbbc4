//! Chronological ordering of a sensor's full-frame images.
//!
//! Frame filenames embed their observation time right after the `tess` prefix,
//! as `YYYYDDDHHMMSS`: `tess2019132000826-1-4-0016-s_ffic.fits`. Being fixed
//! width, the digit run sorts chronologically as a plain integer.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{EllieError, Result};

const PREFIX: &str = "tess";
const EXTENSION: &str = ".fits";

/// A frame file and its sortable timestamp token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFile {
    pub path: PathBuf,
    pub token: u64,
}

/// Timestamp token of a frame filename: the digits between the `tess` prefix
/// and the first `-`.
pub fn parse_frame_token(name: &str) -> Option<u64> {
    let rest = name.strip_prefix(PREFIX)?;
    let digits = rest.split('-').next()?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Keep the `.fits` paths with a parseable token and sort them by
/// `(token, filename)`.
///
/// Other extensions (including compressed `.fits.gz`) are ignored silently;
/// `.fits` names without a token are skipped with a warning.
pub fn order_frames<I>(paths: I) -> Vec<FrameFile>
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut frames: Vec<FrameFile> = paths
        .into_iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            if !name.ends_with(EXTENSION) {
                return None;
            }
            match parse_frame_token(name) {
                Some(token) => Some(FrameFile { path, token }),
                None => {
                    warn!("skipping {}: no timestamp token in filename", path.display());
                    None
                }
            }
        })
        .collect();
    frames.sort_by(|a, b| {
        a.token
            .cmp(&b.token)
            .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
    });
    frames
}

/// List `directory` and return its frames in chronological order.
pub fn list_ordered<P: AsRef<Path>>(directory: P) -> Result<Vec<FrameFile>> {
    let directory = directory.as_ref();
    let entries = std::fs::read_dir(directory).map_err(|e| EllieError::io(directory, e))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| EllieError::io(directory, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| EllieError::io(entry.path(), e))?;
        if !file_type.is_dir() {
            paths.push(entry.path());
        }
    }

    let frames = order_frames(paths);
    debug!("{} frames in {}", frames.len(), directory.display());
    Ok(frames)
}
