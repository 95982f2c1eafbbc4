//! Catalog collaborators: identifier resolution and positional crossmatch.
//!
//! The pipeline only talks to the two traits below. [`CsvCatalog`] implements
//! both on top of local CSV extracts, one file per provider:
//!
//! ```text
//! id,ra,dec,mag,pmra,pmdec,parallax
//! 198593129,287.5121,-33.8410,9.82,,,
//! ```
//!
//! The astrometry columns are optional and only meaningful for Gaia.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, info};

use crate::error::{EllieError, Result};
use crate::sky::SkyPosition;

/// Catalog a source identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogProvider {
    /// TESS Input Catalog.
    Tic,
    /// Gaia DR2.
    Gaia,
}

impl CatalogProvider {
    pub fn name(&self) -> &'static str {
        match self {
            CatalogProvider::Tic => "tic",
            CatalogProvider::Gaia => "gaia",
        }
    }

    /// Product header keyword holding an identifier of this catalog.
    pub fn id_keyword(&self) -> &'static str {
        match self {
            CatalogProvider::Tic => "TIC_ID",
            CatalogProvider::Gaia => "GAIA_ID",
        }
    }

    /// Catalog a named crossmatch service matches against.
    pub fn for_crossmatch_service(service: &str) -> Option<Self> {
        let s = service.to_ascii_lowercase();
        if s.contains("gaia") {
            Some(CatalogProvider::Gaia)
        } else if s.contains("tic") {
            Some(CatalogProvider::Tic)
        } else {
            None
        }
    }
}

impl FromStr for CatalogProvider {
    type Err = EllieError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tic" => Ok(CatalogProvider::Tic),
            "gaia" => Ok(CatalogProvider::Gaia),
            _ => Err(EllieError::UnknownProvider(s.to_string())),
        }
    }
}

impl fmt::Display for CatalogProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Proper motion (mas/yr) and parallax (mas).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Astrometry {
    pub pmra: f64,
    pub pmdec: f64,
    pub parallax: f64,
}

/// A catalog entry found by identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    pub id: u64,
    pub position: SkyPosition,
    pub magnitude: f64,
    pub astrometry: Option<Astrometry>,
}

/// Best counterpart of a position in another catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossmatchRecord {
    pub match_id: String,
    pub separation_arcsec: f64,
    /// Remaining columns of the matched row, by name.
    pub fields: BTreeMap<String, String>,
}

impl CrossmatchRecord {
    /// Magnitude of the counterpart: `mag`, or Gaia's `phot_g_mean_mag`.
    pub fn magnitude(&self) -> Option<f64> {
        ["mag", "phot_g_mean_mag"]
            .iter()
            .find_map(|k| self.fields.get(*k)?.trim().parse().ok())
    }
}

/// Look up a source by catalog identifier.
pub trait CatalogResolver {
    fn resolve(&self, provider: CatalogProvider, id: u64) -> Result<ResolvedSource>;
}

/// Find the counterpart of a position in the catalog behind `service`.
pub trait CrossmatchService {
    fn crossmatch(
        &self,
        position: &SkyPosition,
        radius_arcsec: f64,
        service: &str,
    ) -> Result<CrossmatchRecord>;
}

/// In-memory catalog loaded from CSV, sorted by declination.
#[derive(Debug, Clone, Default)]
pub struct CsvCatalog {
    tables: HashMap<CatalogProvider, Vec<ResolvedSource>>,
}

fn column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name))
}

fn optional_f64(record: &csv::StringRecord, index: Option<usize>) -> Option<f64> {
    match record.get(index?) {
        Some(s) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

impl CsvCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the table of `provider` from `path`, replacing any earlier one.
    pub fn load<P: AsRef<Path>>(&mut self, provider: CatalogProvider, path: P) -> Result<()> {
        let path = path.as_ref();
        let service = format!("{provider} catalog {}", path.display());
        let fail = |reason: String| EllieError::external(&service, reason);

        let mut rdr = csv::Reader::from_path(path).map_err(|e| fail(e.to_string()))?;
        let headers = rdr.headers().map_err(|e| fail(e.to_string()))?.clone();
        let required = |name: &str| column(&headers, name).ok_or_else(|| fail(format!("missing column '{name}'")));
        let (id_col, ra_col, dec_col, mag_col) =
            (required("id")?, required("ra")?, required("dec")?, required("mag")?);
        let (pmra_col, pmdec_col, plx_col) = (
            column(&headers, "pmra"),
            column(&headers, "pmdec"),
            column(&headers, "parallax"),
        );

        let mut rows = Vec::new();
        for (line, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| fail(e.to_string()))?;
            let field = |i: usize, name: &str| {
                record
                    .get(i)
                    .map(str::trim)
                    .ok_or_else(|| fail(format!("row {}: missing {name}", line + 2)))
            };
            let number = |i: usize, name: &str| -> Result<f64> {
                let s = field(i, name)?;
                s.parse()
                    .map_err(|_| fail(format!("row {}: bad {name} '{s}'", line + 2)))
            };
            let id_text = field(id_col, "id")?;
            let id: u64 = id_text
                .parse()
                .map_err(|_| fail(format!("row {}: bad id '{id_text}'", line + 2)))?;
            let astrometry = match (
                optional_f64(&record, pmra_col),
                optional_f64(&record, pmdec_col),
                optional_f64(&record, plx_col),
            ) {
                (Some(pmra), Some(pmdec), Some(parallax)) => Some(Astrometry {
                    pmra,
                    pmdec,
                    parallax,
                }),
                _ => None,
            };
            rows.push(ResolvedSource {
                id,
                position: SkyPosition::new(number(ra_col, "ra")?, number(dec_col, "dec")?),
                magnitude: number(mag_col, "mag")?,
                astrometry,
            });
        }

        rows.sort_by(|a, b| a.position.dec_deg.total_cmp(&b.position.dec_deg));
        info!("Loaded {} {} sources from {}", rows.len(), provider, path.display());
        self.tables.insert(provider, rows);
        Ok(())
    }

    /// Add one source by hand.
    pub fn insert(&mut self, provider: CatalogProvider, source: ResolvedSource) {
        let rows = self.tables.entry(provider).or_default();
        let at = rows.partition_point(|r| r.position.dec_deg < source.position.dec_deg);
        rows.insert(at, source);
    }

    fn table(&self, provider: CatalogProvider, service: &str) -> Result<&[ResolvedSource]> {
        self.tables
            .get(&provider)
            .map(Vec::as_slice)
            .ok_or_else(|| EllieError::external(service, format!("no {provider} catalog loaded")))
    }

    /// Sources within `radius_deg` of `position`, nearest first, with their
    /// separations in degrees.
    pub fn cone_search(
        &self,
        provider: CatalogProvider,
        position: &SkyPosition,
        radius_deg: f64,
    ) -> Vec<(&ResolvedSource, f64)> {
        let Some(rows) = self.tables.get(&provider) else {
            return Vec::new();
        };
        let lo = rows.partition_point(|r| r.position.dec_deg < position.dec_deg - radius_deg);
        let hi = rows.partition_point(|r| r.position.dec_deg <= position.dec_deg + radius_deg);
        let mut hits: Vec<_> = rows[lo..hi]
            .iter()
            .map(|r| (r, r.position.separation_deg(position)))
            .filter(|&(_, sep)| sep <= radius_deg)
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }
}

impl CatalogResolver for CsvCatalog {
    fn resolve(&self, provider: CatalogProvider, id: u64) -> Result<ResolvedSource> {
        let service = format!("{provider} lookup");
        let source = self
            .table(provider, &service)?
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| EllieError::external(&service, format!("no source with id {id}")))?;
        debug!("{} {} resolved to {}", provider, id, source.position);
        Ok(source)
    }
}

impl CrossmatchService for CsvCatalog {
    fn crossmatch(
        &self,
        position: &SkyPosition,
        radius_arcsec: f64,
        service: &str,
    ) -> Result<CrossmatchRecord> {
        let provider = CatalogProvider::for_crossmatch_service(service)
            .ok_or_else(|| EllieError::external(service, "unsupported crossmatch service"))?;
        self.table(provider, service)?;

        let hits = self.cone_search(provider, position, radius_arcsec / 3600.0);
        let (source, sep_deg) = hits.first().ok_or_else(|| {
            EllieError::external(
                service,
                format!("no {provider} source within {radius_arcsec}\" of {position}"),
            )
        })?;

        let mut fields = BTreeMap::new();
        fields.insert("ra".to_string(), source.position.ra_deg.to_string());
        fields.insert("dec".to_string(), source.position.dec_deg.to_string());
        fields.insert("mag".to_string(), source.magnitude.to_string());
        if let Some(a) = source.astrometry {
            fields.insert("pmra".to_string(), a.pmra.to_string());
            fields.insert("pmdec".to_string(), a.pmdec.to_string());
            fields.insert("parallax".to_string(), a.parallax.to_string());
        }
        Ok(CrossmatchRecord {
            match_id: source.id.to_string(),
            separation_arcsec: sep_deg * 3600.0,
            fields,
        })
    }
}
