//! Spherical geometry and the boresight-to-focal-plane projection.
//!
//! Sky positions are (right ascension, declination) pairs in radians. The
//! focal-plane projection takes direction cosines relative to the boresight,
//! rotates them by the position angle, and scales by the angular width of one
//! detector so the result is in chip units (see [`crate::hardware::focal_plane`]).

use std::f64::consts::TAU;

use nalgebra::Vector3;
use ndarray::{Array1, ArrayView1, Zip};

use crate::hardware::CHIP_WIDTH_RAD;

/// Convert (RA, Dec) in radians to a unit vector.
pub fn radec_to_xyz(ra: f64, dec: f64) -> Vector3<f64> {
    let cos_dec = dec.cos();
    Vector3::new(cos_dec * ra.cos(), cos_dec * ra.sin(), dec.sin())
}

/// Convert a unit vector to (RA, Dec) in radians, RA in `[0, 2π)`.
pub fn xyz_to_radec(xyz: &Vector3<f64>) -> (f64, f64) {
    let mut ra = xyz.y.atan2(xyz.x);
    if ra < 0.0 {
        ra += TAU;
    }
    let dec = xyz.z.clamp(-1.0, 1.0).asin();
    (ra, dec)
}

/// Straight-line distance between two points on the unit sphere.
pub fn chord_distance(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    (a - b).norm()
}

/// Chord length subtended by a great-circle angle `theta` (radians).
pub fn chord_for_angle(theta: f64) -> f64 {
    2.0 * (theta / 2.0).sin()
}

/// Celestial pose of the telescope: boresight position and position angle, radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub ra: f64,
    pub dec: f64,
    pub pa: f64,
}

impl Pose {
    pub fn from_degrees(ra: f64, dec: f64, pa: f64) -> Self {
        Self {
            ra: ra.to_radians(),
            dec: dec.to_radians(),
            pa: pa.to_radians(),
        }
    }
}

/// Pose plus the cached trigonometry needed to project onto the focal plane.
#[derive(Debug, Clone)]
pub struct Boresight {
    pose: Pose,
    sin_dec: f64,
    cos_dec: f64,
    sin_pa: f64,
    cos_pa: f64,
    axis: Vector3<f64>,
    north: Vector3<f64>,
    east: Vector3<f64>,
}

impl Boresight {
    pub fn new(pose: Pose) -> Self {
        let (sin_ra, cos_ra) = pose.ra.sin_cos();
        let (sin_dec, cos_dec) = pose.dec.sin_cos();
        let (sin_pa, cos_pa) = pose.pa.sin_cos();
        Self {
            pose,
            sin_dec,
            cos_dec,
            sin_pa,
            cos_pa,
            axis: Vector3::new(cos_dec * cos_ra, cos_dec * sin_ra, sin_dec),
            north: Vector3::new(-sin_dec * cos_ra, -sin_dec * sin_ra, cos_dec),
            east: Vector3::new(-sin_ra, cos_ra, 0.0),
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Unit vector along the boresight
    pub fn axis(&self) -> &Vector3<f64> {
        &self.axis
    }

    #[inline]
    fn project(&self, ra: f64, dec: f64) -> (f64, f64) {
        let (sin_dec, cos_dec) = dec.sin_cos();
        let (sin_dra, cos_dra) = (self.pose.ra - ra).sin_cos();

        // Direction cosines toward north and west of the boresight
        let m_x = -self.sin_dec * cos_dec * cos_dra + self.cos_dec * sin_dec;
        let m_y = cos_dec * sin_dra;

        let x = -(self.sin_pa * m_x + self.cos_pa * m_y) / CHIP_WIDTH_RAD;
        let y = (self.cos_pa * m_x - self.sin_pa * m_y) / CHIP_WIDTH_RAD;
        (x, y)
    }

    /// Project a sky position to focal-plane chip units
    pub fn to_focal_plane(&self, ra: f64, dec: f64) -> (f64, f64) {
        self.project(ra, dec)
    }

    /// Batch form of [`to_focal_plane`](Self::to_focal_plane)
    pub fn to_focal_plane_batch(
        &self,
        ra: ArrayView1<f64>,
        dec: ArrayView1<f64>,
    ) -> (Array1<f64>, Array1<f64>) {
        let mut xs = Array1::zeros(ra.len());
        let mut ys = Array1::zeros(ra.len());
        Zip::from(&mut xs)
            .and(&mut ys)
            .and(&ra)
            .and(&dec)
            .for_each(|x, y, &ra, &dec| {
                let (px, py) = self.project(ra, dec);
                *x = px;
                *y = py;
            });
        (xs, ys)
    }

    /// Inverse projection from chip units back to the sky.
    ///
    /// Returns `None` for points outside the unit disk of direction cosines,
    /// which no sky position maps to.
    pub fn from_focal_plane(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let a = -x * CHIP_WIDTH_RAD;
        let c = y * CHIP_WIDTH_RAD;
        let m_x = self.sin_pa * a + self.cos_pa * c;
        let m_y = self.cos_pa * a - self.sin_pa * c;

        let r2 = m_x * m_x + m_y * m_y;
        if r2 > 1.0 {
            return None;
        }
        let w = (1.0 - r2).sqrt();
        let u = self.axis * w + self.north * m_x - self.east * m_y;
        Some(xyz_to_radec(&u))
    }

    /// Is the sky position on the hemisphere the telescope is looking at?
    pub fn faces(&self, ra: f64, dec: f64) -> bool {
        radec_to_xyz(ra, dec).dot(&self.axis) > 0.0
    }
}
