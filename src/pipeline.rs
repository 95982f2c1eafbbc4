//! End-to-end target pixel file creation.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::assemble::list_ordered;
use crate::catalog::{CatalogProvider, CatalogResolver, CrossmatchService};
use crate::cutout::{extract, CutoutSize};
use crate::error::{EllieError, Result};
use crate::locate::Locator;
use crate::pointing;
use crate::product::{CutoutMetadata, CutoutProduct};
use crate::sensor_grid::SensorGrid;
use crate::sky::SkyPosition;

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Cutout width in pixels (default 9).
    pub cutout_width: usize,
    /// Cutout height in pixels (default 9).
    pub cutout_height: usize,
    /// Crossmatch search radius in arcseconds (default 1.0).
    pub crossmatch_radius_arcsec: f64,
    /// Crossmatch service name (default `Mast.GaiaDR2.Crossmatch`).
    pub crossmatch_service: String,
    /// Directory the products are written to (default: current directory).
    pub output_dir: PathBuf,
    /// Also write a PNG of the first cutout (needs the `image` feature).
    pub write_preview: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cutout_width: 9,
            cutout_height: 9,
            crossmatch_radius_arcsec: 1.0,
            crossmatch_service: "Mast.GaiaDR2.Crossmatch".to_string(),
            output_dir: PathBuf::from("."),
            write_preview: false,
        }
    }
}

impl PipelineConfig {
    pub fn cutout_size(&self) -> CutoutSize {
        CutoutSize {
            width: self.cutout_width,
            height: self.cutout_height,
        }
    }
}

/// Result of [`Pipeline::create_tpf`].
#[derive(Debug, Clone)]
pub enum TpfOutcome {
    /// Product written to `path`.
    Created {
        path: PathBuf,
        product: CutoutProduct,
    },
    /// The source is on none of the sensors; nothing was written.
    NotOnGrid { position: SkyPosition },
}

/// Resolve → locate → correct → assemble → extract → write.
pub struct Pipeline<R, X> {
    pub grid: SensorGrid,
    pub config: PipelineConfig,
    resolver: R,
    crossmatch: X,
}

impl<R: CatalogResolver, X: CrossmatchService> Pipeline<R, X> {
    pub fn new(grid: SensorGrid, config: PipelineConfig, resolver: R, crossmatch: X) -> Self {
        Self {
            grid,
            config,
            resolver,
            crossmatch,
        }
    }

    /// Output path of the product of `id`.
    pub fn product_path(&self, id: u64) -> PathBuf {
        self.config.output_dir.join(format!("{id}_tpf.fits"))
    }

    /// Build the target pixel file of catalog source `id`.
    ///
    /// `provider_name` selects the catalog (`tic` or `gaia`). A failed
    /// crossmatch is logged and leaves the product without `XM_ID`; every
    /// other failure aborts the run.
    pub fn create_tpf(&self, id: u64, provider_name: &str) -> Result<TpfOutcome> {
        let provider: CatalogProvider = provider_name.parse()?;
        let source = self.resolver.resolve(provider, id)?;
        info!("{} {} is at {}", provider, id, source.position);

        let Some(found) = Locator::new(&self.grid).locate(&source.position)? else {
            info!("{} {} is not on any sensor, no product written", provider, id);
            return Ok(TpfOutcome::NotOnGrid {
                position: source.position,
            });
        };

        let corrected = pointing::correct(&self.grid, found.cell, found.raw)?;
        let frames = list_ordered(&found.reference.directory)?;
        info!(
            "{} frames for {} in {}",
            frames.len(),
            found.cell,
            found.reference.directory.display()
        );
        let stack = extract(&frames, corrected, self.config.cutout_size())?;

        let service = &self.config.crossmatch_service;
        let record = match self.crossmatch.crossmatch(
            &source.position,
            self.config.crossmatch_radius_arcsec,
            service,
        ) {
            Ok(record) => {
                info!(
                    "{}: matched {} at {:.3}\"",
                    service, record.match_id, record.separation_arcsec
                );
                Some(record)
            }
            Err(e) => {
                warn!("crossmatch of {} {} failed, continuing without: {}", provider, id, e);
                None
            }
        };

        let product = CutoutProduct {
            cell: found.cell,
            metadata: CutoutMetadata {
                provider,
                catalog_id: id,
                crossmatch_id: record.as_ref().map(|r| r.match_id.clone()),
                crossmatch_service: service.clone(),
                crossmatch_separation_arcsec: record.as_ref().map(|r| r.separation_arcsec),
                crossmatch_magnitude: record.as_ref().and_then(|r| r.magnitude()),
                center: source.position,
                center_pixel: found.raw,
            },
            stack,
        };

        std::fs::create_dir_all(&self.config.output_dir)
            .map_err(|e| EllieError::io(&self.config.output_dir, e))?;
        let path = self.product_path(id);
        product.write_fits(&path)?;
        self.maybe_write_preview(&product, &path)?;

        Ok(TpfOutcome::Created { path, product })
    }

    /// Run [`create_tpf`](Self::create_tpf) for every `(id, provider)` in
    /// order. A failing source is logged and does not stop the others.
    pub fn create_tpfs<S: AsRef<str>>(&self, sources: &[(u64, S)]) -> Vec<(u64, Result<TpfOutcome>)> {
        let mut outcomes = Vec::with_capacity(sources.len());
        let (mut created, mut off_grid, mut failed) = (0usize, 0usize, 0usize);
        for (id, provider) in sources {
            let outcome = self.create_tpf(*id, provider.as_ref());
            match &outcome {
                Ok(TpfOutcome::Created { .. }) => created += 1,
                Ok(TpfOutcome::NotOnGrid { .. }) => off_grid += 1,
                Err(e) => {
                    warn!("{} {}: {}", provider.as_ref(), id, e);
                    failed += 1;
                }
            }
            outcomes.push((*id, outcome));
        }
        info!(
            "Batch of {}: {} created, {} off the grid, {} failed",
            sources.len(),
            created,
            off_grid,
            failed
        );
        outcomes
    }

    #[cfg(feature = "image")]
    fn maybe_write_preview(&self, product: &CutoutProduct, path: &std::path::Path) -> Result<()> {
        if self.config.write_preview {
            crate::preview::save_first_frame_png(&product.stack, path.with_extension("png"))?;
        }
        Ok(())
    }

    #[cfg(not(feature = "image"))]
    fn maybe_write_preview(&self, _product: &CutoutProduct, _path: &std::path::Path) -> Result<()> {
        if self.config.write_preview {
            warn!("preview requested but ellie was built without the `image` feature");
        }
        Ok(())
    }
}

/// Read a batch source list: one `<id> <provider>` pair per line, separated
/// by whitespace. Blank lines and lines starting with `#` are skipped, as are
/// any columns after the second.
pub fn read_source_list<P: AsRef<Path>>(path: P) -> Result<Vec<(u64, String)>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| EllieError::io(path, e))?;
    let mut sources = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let bad = |reason: String| EllieError::SourceList {
            path: path.to_path_buf(),
            line: i + 1,
            reason,
        };
        let mut columns = line.split_whitespace();
        let (Some(id), Some(provider)) = (columns.next(), columns.next()) else {
            return Err(bad(format!("expected '<id> <provider>', got '{line}'")));
        };
        let id = id
            .parse::<u64>()
            .map_err(|e| bad(format!("bad identifier '{id}': {e}")))?;
        sources.push((id, provider.to_ascii_lowercase()));
    }
    info!("{} sources listed in {}", sources.len(), path.display());
    Ok(sources)
}
