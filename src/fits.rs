//! FITS access on top of `fitsio`.
//!
//! [`FitsReader`] opens a file header-first; pixel data is only read on
//! request, either a whole HDU ([`FitsReader::read_all`]) or a rectangular
//! window of an image ([`FitsReader::read_window`]) so a 9x9 cutout does not
//! pull a full 2k x 2k frame into memory.
//!
//! Keywords are reached through [`Keywords`], implemented both for an HDU of
//! an open file and for the in-memory [`Header`] used to assemble new HDUs.
//!
//! Axis lengths are listed NAXIS1 first: `(width, height, ...)`.

use std::path::{Path, PathBuf};

use fitsio::hdu::FitsHdu;
use fitsio::headers::ReadsKey;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;

use crate::error::{EllieError, Result};

fn fits_error(path: &Path) -> impl Fn(fitsio::errors::Error) -> EllieError + '_ {
    move |e| EllieError::fits(path, e.to_string())
}

// ── Keywords ───────────────────────────────────────────────────────────────

/// Typed keyword lookup. A missing keyword, or one whose value does not
/// convert to the requested type, reads as `None`.
pub trait Keywords {
    fn real(&mut self, keyword: &str) -> Option<f64>;
    fn integer(&mut self, keyword: &str) -> Option<i64>;
    fn text(&mut self, keyword: &str) -> Option<String>;
}

/// A header keyword value.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        HeaderValue::Int(v)
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        HeaderValue::Float(v)
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::Str(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::Str(v)
    }
}

/// Ordered keyword cards of an HDU that is about to be written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<(String, HeaderValue)>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cards(&self) -> &[(String, HeaderValue)] {
        &self.cards
    }

    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        self.cards
            .iter()
            .find(|(k, _)| k == keyword)
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, keyword: &str) -> Option<&str> {
        match self.get(keyword)? {
            HeaderValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Set `keyword`, replacing an existing card in place.
    pub fn set(&mut self, keyword: &str, value: impl Into<HeaderValue>) {
        let keyword = keyword.to_ascii_uppercase();
        let value = value.into();
        match self.cards.iter_mut().find(|(k, _)| *k == keyword) {
            Some(card) => card.1 = value,
            None => self.cards.push((keyword, value)),
        }
    }
}

impl Keywords for Header {
    fn real(&mut self, keyword: &str) -> Option<f64> {
        match self.get(keyword)? {
            HeaderValue::Float(f) => Some(*f),
            HeaderValue::Int(i) => Some(*i as f64),
            HeaderValue::Str(_) => None,
        }
    }

    fn integer(&mut self, keyword: &str) -> Option<i64> {
        match self.get(keyword)? {
            HeaderValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn text(&mut self, keyword: &str) -> Option<String> {
        self.get_str(keyword).map(str::to_string)
    }
}

// ── Reading ────────────────────────────────────────────────────────────────

/// One HDU of an open file with its axis lengths, NAXIS1 first.
#[derive(Debug)]
pub struct Hdu {
    inner: FitsHdu,
    axes: Vec<usize>,
}

impl Hdu {
    pub fn axes(&self) -> &[usize] {
        &self.axes
    }

    /// `true` for a non-empty image of at least two axes.
    pub fn is_image(&self) -> bool {
        self.axes.len() >= 2 && self.axes.iter().all(|&n| n > 0)
    }

    /// `(NAXIS1, NAXIS2)` = `(width, height)`.
    pub fn image_size(&self) -> (usize, usize) {
        (
            self.axes.first().copied().unwrap_or(0),
            self.axes.get(1).copied().unwrap_or(0),
        )
    }

    fn len(&self) -> usize {
        if self.axes.is_empty() {
            0
        } else {
            self.axes.iter().product()
        }
    }
}

/// An open FITS file.
pub struct FitsReader {
    path: PathBuf,
    fptr: FitsFile,
}

impl FitsReader {
    /// Open `path`; a file that does not exist is an I/O error, anything
    /// cfitsio rejects is a FITS error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::metadata(&path).map_err(|e| EllieError::io(&path, e))?;
        let fptr = FitsFile::open(&path).map_err(fits_error(&path))?;
        Ok(Self { path, fptr })
    }

    /// Read NAXIS and the NAXISn lengths of `inner`, rejecting sizes that do
    /// not fit in memory arithmetic.
    fn describe(&mut self, inner: FitsHdu) -> Result<Hdu> {
        let path = &self.path;
        let length = |v: i64| usize::try_from(v).map_err(|_| EllieError::fits(path, "negative axis length"));
        let naxis = inner.read_key::<i64>(&mut self.fptr, "NAXIS").unwrap_or(0);
        let mut axes = Vec::with_capacity(length(naxis)?);
        for i in 1..=naxis {
            let n = inner
                .read_key::<i64>(&mut self.fptr, &format!("NAXIS{i}"))
                .map_err(|_| EllieError::fits(path, format!("missing NAXIS{i}")))?;
            axes.push(length(n)?);
        }
        // 8 bytes covers the widest BITPIX.
        axes.iter()
            .try_fold(8usize, |bytes, &n| bytes.checked_mul(n))
            .ok_or_else(|| EllieError::fits(path, format!("data size overflows for axes {axes:?}")))?;
        Ok(Hdu { inner, axes })
    }

    pub fn primary(&mut self) -> Result<Hdu> {
        let inner = self.fptr.primary_hdu().map_err(fits_error(&self.path))?;
        self.describe(inner)
    }

    /// HDU whose `EXTNAME` is `name`.
    pub fn named(&mut self, name: &str) -> Result<Hdu> {
        let inner = self.fptr.hdu(name).map_err(fits_error(&self.path))?;
        self.describe(inner)
    }

    /// First HDU holding a 2-D (or higher) image.
    ///
    /// TESS full-frame images keep an empty primary HDU and the image in HDU 1.
    pub fn image_hdu(&mut self) -> Result<Hdu> {
        let mut index: usize = 0;
        while let Ok(inner) = self.fptr.hdu(index) {
            let hdu = self.describe(inner)?;
            if hdu.is_image() {
                return Ok(hdu);
            }
            index += 1;
        }
        Err(EllieError::fits(&self.path, "no image HDU"))
    }

    pub fn key<T: ReadsKey>(&mut self, hdu: &Hdu, keyword: &str) -> Option<T> {
        hdu.inner.read_key(&mut self.fptr, keyword).ok()
    }

    /// Keyword view of `hdu`.
    pub fn keywords<'a>(&'a mut self, hdu: &'a Hdu) -> HduKeywords<'a> {
        HduKeywords { reader: self, hdu }
    }

    /// Whole data unit of `hdu` as physical values (BSCALE/BZERO applied).
    pub fn read_all(&mut self, hdu: &Hdu) -> Result<Vec<f64>> {
        if hdu.len() == 0 {
            return Ok(Vec::new());
        }
        hdu.inner
            .read_image(&mut self.fptr)
            .map_err(fits_error(&self.path))
    }

    /// Read a `width` x `height` window whose first array corner is
    /// `(col0, row0)` (zero-based) from the first plane of `hdu`. The window
    /// must lie inside the image.
    pub fn read_window(
        &mut self,
        hdu: &Hdu,
        col0: usize,
        row0: usize,
        width: usize,
        height: usize,
    ) -> Result<Vec<f32>> {
        let (naxis1, naxis2) = hdu.image_size();
        let inside = col0.checked_add(width).is_some_and(|end| end <= naxis1)
            && row0.checked_add(height).is_some_and(|end| end <= naxis2);
        if !inside {
            return Err(EllieError::fits(
                &self.path,
                format!("window {width}x{height} at ({col0}, {row0}) outside image {naxis1}x{naxis2}"),
            ));
        }
        let mut out = Vec::with_capacity(width * height);
        for row in row0..row0 + height {
            let start = row * naxis1 + col0;
            let values: Vec<f32> = hdu
                .inner
                .read_section(&mut self.fptr, start, start + width)
                .map_err(fits_error(&self.path))?;
            out.extend_from_slice(&values);
        }
        Ok(out)
    }
}

/// [`Keywords`] over one HDU of an open file.
pub struct HduKeywords<'a> {
    reader: &'a mut FitsReader,
    hdu: &'a Hdu,
}

impl Keywords for HduKeywords<'_> {
    fn real(&mut self, keyword: &str) -> Option<f64> {
        self.reader.key(self.hdu, keyword)
    }

    fn integer(&mut self, keyword: &str) -> Option<i64> {
        self.reader.key(self.hdu, keyword)
    }

    fn text(&mut self, keyword: &str) -> Option<String> {
        self.reader.key(self.hdu, keyword)
    }
}

// ── Writing ────────────────────────────────────────────────────────────────

/// Pixel payload of an HDU to be written.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageData {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl ImageData {
    fn image_type(&self) -> ImageType {
        match self {
            ImageData::F32(_) => ImageType::Float,
            ImageData::F64(_) => ImageType::Double,
        }
    }

    fn len(&self) -> usize {
        match self {
            ImageData::F32(v) => v.len(),
            ImageData::F64(v) => v.len(),
        }
    }
}

/// An IMAGE HDU to be written: axes (NAXIS1 first), data and extra keywords.
#[derive(Debug, Clone)]
pub struct ImageHdu {
    pub axes: Vec<usize>,
    pub data: ImageData,
    pub header: Header,
}

impl ImageHdu {
    pub fn new(axes: Vec<usize>, data: ImageData) -> Self {
        Self {
            axes,
            data,
            header: Header::new(),
        }
    }

    /// Header-only HDU (`NAXIS = 0`).
    pub fn empty() -> Self {
        Self::new(Vec::new(), ImageData::F32(Vec::new()))
    }

    fn check(&self, path: &Path) -> Result<()> {
        let expected = if self.axes.is_empty() {
            Some(0)
        } else {
            self.axes.iter().try_fold(1usize, |n, &a| n.checked_mul(a))
        };
        if expected != Some(self.data.len()) {
            return Err(EllieError::fits(
                path,
                format!("axes {:?} do not match {} values", self.axes, self.data.len()),
            ));
        }
        Ok(())
    }

    /// `fitsio` takes dimensions slowest axis first.
    fn dimensions(&self) -> Vec<usize> {
        self.axes.iter().rev().copied().collect()
    }
}

/// Keywords cfitsio maintains itself.
fn is_reserved(keyword: &str) -> bool {
    matches!(
        keyword,
        "SIMPLE" | "XTENSION" | "BITPIX" | "NAXIS" | "EXTEND" | "PCOUNT" | "GCOUNT" | "END" | "EXTNAME"
    ) || (keyword.starts_with("NAXIS") && keyword[5..].chars().all(|c| c.is_ascii_digit()))
}

fn write_payload(fptr: &mut FitsFile, hdu: &FitsHdu, source: &ImageHdu) -> fitsio::errors::Result<()> {
    match &source.data {
        ImageData::F32(v) if !v.is_empty() => hdu.write_image(fptr, v)?,
        ImageData::F64(v) if !v.is_empty() => hdu.write_image(fptr, v)?,
        _ => {}
    }
    for (keyword, value) in source.header.cards() {
        if is_reserved(keyword) {
            continue;
        }
        match value {
            HeaderValue::Int(i) => hdu.write_key(fptr, keyword, *i)?,
            HeaderValue::Float(f) => hdu.write_key(fptr, keyword, *f)?,
            HeaderValue::Str(s) => hdu.write_key(fptr, keyword, s.clone())?,
        }
    }
    Ok(())
}

/// Write `hdus` to `path`, replacing any existing file. The first becomes
/// the primary HDU; extensions are named by their `EXTNAME` card.
pub fn write_fits<P: AsRef<Path>>(path: P, hdus: &[ImageHdu]) -> Result<()> {
    let path = path.as_ref();
    let err = fits_error(path);
    let (primary, extensions) = hdus
        .split_first()
        .ok_or_else(|| EllieError::fits(path, "nothing to write"))?;
    for hdu in hdus {
        hdu.check(path)?;
    }

    let dimensions = primary.dimensions();
    let description = ImageDescription {
        data_type: primary.data.image_type(),
        dimensions: &dimensions,
    };
    let created = if primary.axes.is_empty() {
        FitsFile::create(path).overwrite().open()
    } else {
        FitsFile::create(path)
            .with_custom_primary(&description)
            .overwrite()
            .open()
    };
    let mut fptr = created.map_err(&err)?;
    let hdu = fptr.primary_hdu().map_err(&err)?;
    write_payload(&mut fptr, &hdu, primary).map_err(&err)?;

    for (i, extension) in extensions.iter().enumerate() {
        let name = extension
            .header
            .get_str("EXTNAME")
            .map(str::to_string)
            .unwrap_or_else(|| format!("HDU{}", i + 1));
        let dimensions = extension.dimensions();
        let description = ImageDescription {
            data_type: extension.data.image_type(),
            dimensions: &dimensions,
        };
        let hdu = fptr.create_image(name, &description).map_err(&err)?;
        write_payload(&mut fptr, &hdu, extension).map_err(&err)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_raw_header;

    #[test]
    fn header_set_replaces_in_place() {
        let mut h = Header::new();
        h.set("crval1", 10.0);
        h.set("CTYPE1", "RA---TAN");
        h.set("CRVAL1", 12_i64);
        assert_eq!(h.cards().len(), 2);
        assert_eq!(h.cards()[0].0, "CRVAL1");
        assert_eq!(h.real("CRVAL1"), Some(12.0));
        assert_eq!(h.integer("CRVAL1"), Some(12));
        assert_eq!(h.text("CTYPE1").as_deref(), Some("RA---TAN"));
        assert_eq!(h.real("CTYPE1"), None);
        assert_eq!(h.integer("MISSING"), None);
    }

    #[test]
    fn reserved_keywords() {
        for k in ["SIMPLE", "NAXIS", "NAXIS1", "NAXIS12", "EXTNAME", "BITPIX"] {
            assert!(is_reserved(k), "{k}");
        }
        for k in ["NAXISX", "CRVAL1", "TIC_ID"] {
            assert!(!is_reserved(k), "{k}");
        }
    }

    #[test]
    fn write_and_read_multi_hdu_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.fits");

        let (w, h, n) = (5usize, 4usize, 3usize);
        let cube: Vec<f32> = (0..w * h * n).map(|i| i as f32 * 0.5).collect();
        let mut primary = ImageHdu::new(vec![w, h, n], ImageData::F32(cube.clone()));
        primary.header.set("OBJECT", "test");
        primary.header.set("CEN_X", 12.25);
        primary.header.set("TIC_ID", 198593129_i64);
        let mut times = ImageHdu::new(vec![n], ImageData::F64(vec![1.0, 2.0, 3.5]));
        times.header.set("EXTNAME", "TIME");
        write_fits(&path, &[primary, times]).unwrap();

        let mut fits = FitsReader::open(&path).unwrap();
        let hdu0 = fits.primary().unwrap();
        assert_eq!(hdu0.axes(), &[w, h, n]);
        assert_eq!(fits.key::<String>(&hdu0, "OBJECT").as_deref(), Some("test"));
        assert_eq!(fits.key::<f64>(&hdu0, "CEN_X"), Some(12.25));
        assert_eq!(fits.key::<i64>(&hdu0, "TIC_ID"), Some(198593129));
        assert_eq!(fits.key::<i64>(&hdu0, "GAIA_ID"), None);

        let values = fits.read_all(&hdu0).unwrap();
        assert_eq!(values.len(), w * h * n);
        assert_eq!(values[7], 3.5);

        // First plane through the window path.
        let plane = fits.read_window(&hdu0, 0, 0, w, h).unwrap();
        assert_eq!(plane[..], cube[..w * h]);

        let time_hdu = fits.named("TIME").unwrap();
        assert_eq!(fits.read_all(&time_hdu).unwrap(), vec![1.0, 2.0, 3.5]);
    }

    #[test]
    fn image_in_extension_and_windowed_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ffi.fits");
        let (w, h) = (20usize, 10usize);
        let pixels: Vec<f32> = (0..w * h).map(|i| i as f32).collect();
        let mut image = ImageHdu::new(vec![w, h], ImageData::F32(pixels));
        image.header.set("TSTART", 1600.25);
        write_fits(&path, &[ImageHdu::empty(), image]).unwrap();

        let mut fits = FitsReader::open(&path).unwrap();
        assert!(!fits.primary().unwrap().is_image());
        let hdu = fits.image_hdu().unwrap();
        assert_eq!(hdu.image_size(), (w, h));
        assert_eq!(fits.keywords(&hdu).real("TSTART"), Some(1600.25));

        let win = fits.read_window(&hdu, 3, 2, 4, 3).unwrap();
        let expected: Vec<f32> = (2..5)
            .flat_map(|row| (3..7).map(move |col| (row * w + col) as f32))
            .collect();
        assert_eq!(win, expected);

        assert!(fits.read_window(&hdu, 18, 0, 4, 1).is_err());
        assert!(fits.read_window(&hdu, usize::MAX, 0, 4, 1).is_err());
    }

    #[test]
    fn mismatched_data_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.fits");
        let hdu = ImageHdu::new(vec![3, 3], ImageData::F32(vec![0.0; 8]));
        assert!(matches!(write_fits(&path, &[hdu]), Err(EllieError::Fits { .. })));
        assert!(matches!(write_fits(&path, &[]), Err(EllieError::Fits { .. })));
    }

    #[test]
    fn oversized_axes_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.fits");
        write_raw_header(
            &path,
            &[
                "SIMPLE  =                    T",
                "BITPIX  =                  -32",
                "NAXIS   =                    2",
                "NAXIS1  =        4000000000000",
                "NAXIS2  =        4000000000000",
            ],
        );
        let result = FitsReader::open(&path).and_then(|mut f| f.image_hdu());
        assert!(matches!(result, Err(EllieError::Fits { .. })), "{result:?}");
    }

    #[test]
    fn garbage_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.fits");
        std::fs::write(&path, vec![b'x'; 2880]).unwrap();
        assert!(matches!(FitsReader::open(&path), Err(EllieError::Fits { .. })));

        let missing = dir.path().join("missing.fits");
        assert!(matches!(FitsReader::open(&missing), Err(EllieError::Io { .. })));
    }
}
