//! Positions on the celestial sphere.

use nalgebra::Vector3;

/// A sky position in degrees (ICRS right ascension and declination).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPosition {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

impl SkyPosition {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        Self { ra_deg, dec_deg }
    }

    pub fn ra_rad(&self) -> f64 {
        self.ra_deg.to_radians()
    }

    pub fn dec_rad(&self) -> f64 {
        self.dec_deg.to_radians()
    }

    /// Unit vector pointing to this position on the celestial sphere.
    pub fn uvec(&self) -> Vector3<f64> {
        let (rasin, racos) = self.ra_rad().sin_cos();
        let (decsin, deccos) = self.dec_rad().sin_cos();
        Vector3::new(deccos * racos, deccos * rasin, decsin)
    }

    /// Angular separation in degrees.
    ///
    /// Uses `atan2(|a×b|, a·b)`, which stays accurate for both tiny and
    /// near-antipodal separations.
    pub fn separation_deg(&self, other: &SkyPosition) -> f64 {
        let a = self.uvec();
        let b = other.uvec();
        a.cross(&b).norm().atan2(a.dot(&b)).to_degrees()
    }
}

impl std::fmt::Display for SkyPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(RA {:.6}°, Dec {:+.6}°)", self.ra_deg, self.dec_deg)
    }
}
