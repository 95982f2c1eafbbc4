//! FITS world-coordinate transform: gnomonic (TAN) projection, linear CD
//! matrix and optional SIP distortion polynomials.
//!
//! Pixel coordinates follow the FITS convention: the center of the first
//! pixel is `(1, 1)`, x runs along NAXIS1 (columns) and y along NAXIS2 (rows).
//!
//! ```text
//! pixel → (u, v) = pixel − CRPIX → SIP: u + A(u,v), v + B(u,v) → CD → (ξ, η) → inverse TAN → (RA, Dec)
//! ```
//!
//! The reverse direction inverts SIP iteratively, seeded by the AP/BP inverse
//! polynomials when the header carries them.

use nalgebra::{Matrix2, Vector2};
use thiserror::Error;
use tracing::debug;

use crate::fits::{Header, Keywords};
use crate::sky::SkyPosition;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WcsError {
    #[error("missing keyword {0}")]
    MissingKeyword(String),
    #[error("unsupported projection {0}")]
    UnsupportedProjection(String),
    #[error("singular CD matrix")]
    SingularMatrix,
    #[error("image size NAXIS1/NAXIS2 missing or zero")]
    MissingImageSize,
}

// ── TAN projection ─────────────────────────────────────────────────────────

/// Forward gnomonic (TAN) projection, all angles in radians.
///
/// Returns `(ξ, η)` in radians, or `None` if the point is on or behind the tangent plane.
#[inline]
pub fn tan_project(ra: f64, dec: f64, crval_ra: f64, crval_dec: f64) -> Option<(f64, f64)> {
    let da = ra - crval_ra;
    let (sin_dec, cos_dec) = dec.sin_cos();
    let (sin_dec0, cos_dec0) = crval_dec.sin_cos();
    let cos_da = da.cos();

    let denom = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_da;
    if denom <= 1e-12 {
        return None;
    }

    let xi = cos_dec * da.sin() / denom;
    let eta = (sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_da) / denom;
    Some((xi, eta))
}

/// Inverse gnomonic (TAN) projection, all angles in radians.
#[inline]
pub fn inverse_tan_project(xi: f64, eta: f64, crval_ra: f64, crval_dec: f64) -> (f64, f64) {
    let (sin_dec0, cos_dec0) = crval_dec.sin_cos();
    let rho_sq = xi * xi + eta * eta;
    if rho_sq < 1e-30 {
        return (crval_ra, crval_dec);
    }

    let rho = rho_sq.sqrt();
    let c = rho.atan();
    let (sin_c, cos_c) = c.sin_cos();

    let dec = (cos_c * sin_dec0 + eta * sin_c * cos_dec0 / rho).asin();
    let ra = crval_ra + (xi * sin_c).atan2(rho * cos_dec0 * cos_c - eta * sin_dec0 * sin_c);
    (ra, dec)
}

// ── SIP polynomials ────────────────────────────────────────────────────────

/// One SIP polynomial `Σ c_pq · u^p · v^q` (keywords `{prefix}_p_q`).
#[derive(Debug, Clone, PartialEq)]
pub struct SipPolynomial {
    pub order: u32,
    /// Non-zero terms as `(p, q, coefficient)`.
    pub terms: Vec<(u32, u32, f64)>,
}

impl SipPolynomial {
    /// Read `{prefix}_ORDER` and the `{prefix}_p_q` coefficients.
    /// Returns `None` when the order keyword is absent.
    pub fn from_keywords<K: Keywords>(keys: &mut K, prefix: &str) -> Option<Self> {
        let order = keys.integer(&format!("{prefix}_ORDER"))?.clamp(0, 9) as u32;
        let mut terms = Vec::new();
        for p in 0..=order {
            for q in 0..=(order - p) {
                if let Some(c) = keys.real(&format!("{prefix}_{p}_{q}")) {
                    if c != 0.0 {
                        terms.push((p, q, c));
                    }
                }
            }
        }
        Some(Self { order, terms })
    }

    pub fn eval(&self, u: f64, v: f64) -> f64 {
        self.terms
            .iter()
            .map(|&(p, q, c)| c * u.powi(p as i32) * v.powi(q as i32))
            .sum()
    }

    pub fn write_header(&self, header: &mut Header, prefix: &str) {
        header.set(&format!("{prefix}_ORDER"), self.order as i64);
        for &(p, q, c) in &self.terms {
            header.set(&format!("{prefix}_{p}_{q}"), c);
        }
    }
}

/// SIP distortion: forward A/B and, optionally, inverse AP/BP.
#[derive(Debug, Clone, PartialEq)]
pub struct Sip {
    pub a: SipPolynomial,
    pub b: SipPolynomial,
    pub ap: Option<SipPolynomial>,
    pub bp: Option<SipPolynomial>,
}

const SIP_MAX_ITERATIONS: usize = 50;
const SIP_TOLERANCE_PX: f64 = 1e-10;

impl Sip {
    fn forward(&self, u: f64, v: f64) -> (f64, f64) {
        (u + self.a.eval(u, v), v + self.b.eval(u, v))
    }

    /// Solve `forward(u, v) = (big_u, big_v)` by fixed-point iteration.
    fn inverse(&self, big_u: f64, big_v: f64) -> (f64, f64) {
        let (mut u, mut v) = match (&self.ap, &self.bp) {
            (Some(ap), Some(bp)) => (
                big_u + ap.eval(big_u, big_v),
                big_v + bp.eval(big_u, big_v),
            ),
            _ => (big_u, big_v),
        };
        for iteration in 0..SIP_MAX_ITERATIONS {
            let nu = big_u - self.a.eval(u, v);
            let nv = big_v - self.b.eval(u, v);
            let step = (nu - u).abs().max((nv - v).abs());
            u = nu;
            v = nv;
            if step < SIP_TOLERANCE_PX {
                return (u, v);
            }
            if iteration + 1 == SIP_MAX_ITERATIONS {
                debug!(
                    "SIP inversion did not converge at ({:.3}, {:.3}), last step {:.2e} px",
                    big_u, big_v, step
                );
            }
        }
        (u, v)
    }
}

// ── Transform ──────────────────────────────────────────────────────────────

/// World ↔ pixel mapping read from an image header.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelTransform {
    /// Reference sky position (`CRVAL1`, `CRVAL2`).
    pub crval: SkyPosition,
    /// Reference pixel, 1-based (`CRPIX1`, `CRPIX2`).
    pub crpix: [f64; 2],
    /// Linear part, degrees per pixel.
    pub cd: Matrix2<f64>,
    pub sip: Option<Sip>,
    /// Image size `(NAXIS1, NAXIS2)`.
    pub width: usize,
    pub height: usize,
    cd_inv: Matrix2<f64>,
}

impl PixelTransform {
    /// Plain TAN transform without distortion.
    pub fn new(
        crval: SkyPosition,
        crpix: [f64; 2],
        cd: Matrix2<f64>,
        width: usize,
        height: usize,
    ) -> Result<Self, WcsError> {
        let cd_inv = cd.try_inverse().ok_or(WcsError::SingularMatrix)?;
        if cd_inv.iter().any(|v| !v.is_finite()) {
            return Err(WcsError::SingularMatrix);
        }
        Ok(Self {
            crval,
            crpix,
            cd,
            sip: None,
            width,
            height,
            cd_inv,
        })
    }

    pub fn with_sip(mut self, sip: Sip) -> Self {
        self.sip = Some(sip);
        self
    }

    /// Build the transform from the keywords of an image HDU.
    ///
    /// Accepts `RA---TAN` / `DEC--TAN`, with or without the `-SIP` suffix.
    /// The linear part comes from `CDi_j`, falling back to `CDELTi` with an
    /// optional `PCi_j` matrix.
    pub fn from_keywords<K: Keywords>(keys: &mut K) -> Result<Self, WcsError> {
        fn need<K: Keywords>(keys: &mut K, key: &str) -> Result<f64, WcsError> {
            keys.real(key)
                .ok_or_else(|| WcsError::MissingKeyword(key.to_string()))
        }

        let ctype1 = keys
            .text("CTYPE1")
            .ok_or_else(|| WcsError::MissingKeyword("CTYPE1".into()))?;
        let ctype2 = keys
            .text("CTYPE2")
            .ok_or_else(|| WcsError::MissingKeyword("CTYPE2".into()))?;
        let (ctype1, ctype2) = (ctype1.trim(), ctype2.trim());
        let tan = |ctype: &str, axis: &str| {
            ctype == format!("{axis}-TAN") || ctype == format!("{axis}-TAN-SIP")
        };
        if !tan(ctype1, "RA--") || !tan(ctype2, "DEC-") {
            return Err(WcsError::UnsupportedProjection(format!("{ctype1}/{ctype2}")));
        }
        let has_sip = ctype1.ends_with("-SIP") && ctype2.ends_with("-SIP");

        let size = |n: Option<i64>| n.and_then(|n| usize::try_from(n).ok()).filter(|&n| n > 0);
        let (width, height) = match (size(keys.integer("NAXIS1")), size(keys.integer("NAXIS2"))) {
            (Some(w), Some(h)) => (w, h),
            _ => return Err(WcsError::MissingImageSize),
        };

        let crval = SkyPosition::new(need(keys, "CRVAL1")?, need(keys, "CRVAL2")?);
        let crpix = [need(keys, "CRPIX1")?, need(keys, "CRPIX2")?];

        let cd_terms = ["CD1_1", "CD1_2", "CD2_1", "CD2_2"].map(|k| keys.real(k));
        let cd = if cd_terms.iter().any(Option::is_some) {
            let [c11, c12, c21, c22] = cd_terms.map(|c| c.unwrap_or(0.0));
            Matrix2::new(c11, c12, c21, c22)
        } else {
            let cdelt1 = need(keys, "CDELT1")?;
            let cdelt2 = need(keys, "CDELT2")?;
            let [p11, p12, p21, p22] = [("PC1_1", 1.0), ("PC1_2", 0.0), ("PC2_1", 0.0), ("PC2_2", 1.0)]
                .map(|(k, default)| keys.real(k).unwrap_or(default));
            Matrix2::new(cdelt1 * p11, cdelt1 * p12, cdelt2 * p21, cdelt2 * p22)
        };

        let mut transform = Self::new(crval, crpix, cd, width, height)?;
        if has_sip {
            let a = SipPolynomial::from_keywords(keys, "A")
                .ok_or_else(|| WcsError::MissingKeyword("A_ORDER".into()))?;
            let b = SipPolynomial::from_keywords(keys, "B")
                .ok_or_else(|| WcsError::MissingKeyword("B_ORDER".into()))?;
            transform.sip = Some(Sip {
                a,
                b,
                ap: SipPolynomial::from_keywords(keys, "AP"),
                bp: SipPolynomial::from_keywords(keys, "BP"),
            });
        }
        Ok(transform)
    }

    /// Write the WCS keywords (and image size) into `header`.
    pub fn write_header(&self, header: &mut Header) {
        let suffix = if self.sip.is_some() { "-SIP" } else { "" };
        header.set("NAXIS", 2_i64);
        header.set("NAXIS1", self.width as i64);
        header.set("NAXIS2", self.height as i64);
        header.set("CTYPE1", format!("RA---TAN{suffix}"));
        header.set("CTYPE2", format!("DEC--TAN{suffix}"));
        header.set("CRVAL1", self.crval.ra_deg);
        header.set("CRVAL2", self.crval.dec_deg);
        header.set("CRPIX1", self.crpix[0]);
        header.set("CRPIX2", self.crpix[1]);
        header.set("CD1_1", self.cd[(0, 0)]);
        header.set("CD1_2", self.cd[(0, 1)]);
        header.set("CD2_1", self.cd[(1, 0)]);
        header.set("CD2_2", self.cd[(1, 1)]);
        if let Some(sip) = &self.sip {
            sip.a.write_header(header, "A");
            sip.b.write_header(header, "B");
            if let Some(ap) = &sip.ap {
                ap.write_header(header, "AP");
            }
            if let Some(bp) = &sip.bp {
                bp.write_header(header, "BP");
            }
        }
    }

    /// Project a sky position to 1-based pixel coordinates.
    ///
    /// Returns `None` when the position is on or behind the tangent plane.
    pub fn world_to_pixel(&self, position: &SkyPosition) -> Option<(f64, f64)> {
        let (xi, eta) = tan_project(
            position.ra_rad(),
            position.dec_rad(),
            self.crval.ra_rad(),
            self.crval.dec_rad(),
        )?;
        let uv = self.cd_inv * Vector2::new(xi.to_degrees(), eta.to_degrees());
        let (u, v) = match &self.sip {
            Some(sip) => sip.inverse(uv.x, uv.y),
            None => (uv.x, uv.y),
        };
        Some((u + self.crpix[0], v + self.crpix[1]))
    }

    /// Sky position of a 1-based pixel coordinate.
    pub fn pixel_to_world(&self, x: f64, y: f64) -> SkyPosition {
        let u = x - self.crpix[0];
        let v = y - self.crpix[1];
        let (u, v) = match &self.sip {
            Some(sip) => sip.forward(u, v),
            None => (u, v),
        };
        let tp = self.cd * Vector2::new(u, v);
        let (ra, dec) = inverse_tan_project(
            tp.x.to_radians(),
            tp.y.to_radians(),
            self.crval.ra_rad(),
            self.crval.dec_rad(),
        );
        SkyPosition::new(ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }

    /// Inclusive bounds test: `0 <= x <= width` and `0 <= y <= height`.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        (0.0..=self.width as f64).contains(&x) && (0.0..=self.height as f64).contains(&y)
    }
}
