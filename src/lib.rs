//! # ellie
//!
//! Target pixel files from TESS full-frame images.
//!
//! Given a catalog identifier, `ellie` finds the camera and CCD whose field of
//! view holds the source, refines its pixel position with the sensor's pointing
//! model, and cuts a small, time-ordered stack of postage stamps around it out
//! of every full-frame image of that sensor.
//!
//! ## Example
//!
//! ```no_run
//! use ellie::{CatalogProvider, CsvCatalog, Pipeline, PipelineConfig, SensorGrid, TpfOutcome};
//!
//! let mut catalog = CsvCatalog::new();
//! catalog.load(CatalogProvider::Tic, "catalogs/tic.csv").unwrap();
//! catalog.load(CatalogProvider::Gaia, "catalogs/gaia.csv").unwrap();
//!
//! let grid = SensorGrid::new("/data/tess");
//! let config = PipelineConfig {
//!     output_dir: "tpfs".into(),
//!     ..Default::default()
//! };
//! let pipeline = Pipeline::new(grid, config, catalog.clone(), catalog);
//!
//! match pipeline.create_tpf(198593129, "tic").unwrap() {
//!     TpfOutcome::Created { path, product } => {
//!         println!("{} frames on {} -> {}", product.stack.len(), product.cell, path.display());
//!     }
//!     TpfOutcome::NotOnGrid { position } => println!("{position} is not on any sensor"),
//! }
//! ```
//!
//! ## Stages
//!
//! 1. **Resolve** the identifier to a sky position ([`CatalogResolver`])
//! 2. **Locate**: project the position through the WCS of every sensor's
//!    reference image, camera-major, chip-minor, and take the first that
//!    contains it ([`Locator`])
//! 3. **Correct** the pixel position with the first epoch of the sensor's
//!    pointing model ([`pointing::correct`])
//! 4. **Assemble** the sensor's frames in chronological order
//!    ([`assemble::list_ordered`])
//! 5. **Extract** a fixed window around the corrected position from every
//!    frame ([`cutout::extract`]) and write it with its metadata
//!    ([`CutoutProduct`])
//!
//! Each stage can be used on its own.
//!

pub mod assemble;
pub mod catalog;
pub mod cutout;
mod error;
pub mod fits;
pub mod locate;
pub mod pipeline;
pub mod pointing;
#[cfg(feature = "image")]
pub mod preview;
pub mod product;
pub mod sensor_grid;
mod sky;
pub mod wcs;

#[cfg(test)]
mod test_support;

pub use assemble::FrameFile;
pub use catalog::{
    Astrometry, CatalogProvider, CatalogResolver, CrossmatchRecord, CrossmatchService, CsvCatalog,
    ResolvedSource,
};
pub use cutout::{CutoutFrame, CutoutSize, CutoutStack};
pub use error::{EllieError, Result};
pub use locate::{Locator, RawPixel, SensorMatch};
pub use pipeline::{read_source_list, Pipeline, PipelineConfig, TpfOutcome};
pub use pointing::{CorrectedPixel, PointingEpoch, PointingModel};
pub use product::{CutoutMetadata, CutoutProduct};
pub use sensor_grid::{EpochException, ReferenceImage, SensorCell, SensorGrid};
pub use sky::SkyPosition;
pub use wcs::PixelTransform;
