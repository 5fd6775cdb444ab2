//! Focal-plane detector layout and footprint tests.
//!
//! The focal plane is a mosaic of [`N_DETECTORS`] square detectors. Positions
//! in the focal plane are expressed in "chip units": one unit is the width of
//! one detector, which subtends [`CHIP_WIDTH_RAD`] on the sky.
//!
//! # Coordinate System
//! - Origin (0, 0) is the boresight
//! - X and Y are the rotated focal-plane axes produced by
//!   [`Boresight::to_focal_plane`](crate::star_math::Boresight::to_focal_plane)
//! - Detector pixels run from 0 to `n_pix` along each axis, with the detector
//!   center at `n_pix / 2`
//!
//! Each detector footprint is stored as four half-plane inequalities
//! `a * x + b * y < c`, evaluated with a small enlargement tolerance that
//! absorbs the difference between this approximate layout and the precise
//! world-coordinate solution.

use ndarray::{ArrayView1, Zip};
use once_cell::sync::Lazy;

use super::detector::{DetectorId, N_DETECTORS};

/// Angular width of one detector on the sky, in radians
pub const CHIP_WIDTH_RAD: f64 = 0.0021801102;

/// Pixels along each detector axis
pub const DEFAULT_PIXELS: usize = 4088;

/// Default footprint enlargement, in chip units
pub const DEFAULT_CHIP_ENLARGE: f64 = 0.01;

/// Physical pixel pitch in millimeters
pub const PIXEL_PITCH_MM: f64 = 0.010;

/// Physical width of one detector in millimeters
pub const CHIP_WIDTH_MM: f64 = DEFAULT_PIXELS as f64 * PIXEL_PITCH_MM;

/// Detector centers in the focal plane, millimeters from the boresight.
///
/// Row `i` is detector id `i + 1`. Detectors 1-9 form the left half of the
/// mosaic, 10-18 mirror them on the right.
const DETECTOR_CENTERS_MM: [(f64, f64); N_DETECTORS] = [
    (-22.14, 12.15),
    (-22.29, -36.80),
    (-22.44, -82.79),
    (-66.42, 20.04),
    (-66.92, -28.76),
    (-67.42, -74.62),
    (-110.70, 42.36),
    (-111.48, -6.25),
    (-112.27, -51.87),
    (22.14, 12.15),
    (22.29, -36.80),
    (22.44, -82.79),
    (66.42, 20.04),
    (66.92, -28.76),
    (67.42, -74.62),
    (110.70, 42.36),
    (111.48, -6.25),
    (112.27, -51.87),
];

/// One edge of a detector footprint: points with `a * x + b * y < c` are inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfPlane {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl HalfPlane {
    #[inline]
    fn admits(&self, x: f64, y: f64, enlarge: f64) -> bool {
        self.a * x + self.b * y < self.c + enlarge
    }
}

/// Footprint of a single detector in chip units.
#[derive(Debug, Clone, PartialEq)]
pub struct Footprint {
    /// The four bounding half-planes
    pub edges: [HalfPlane; 4],
    /// Detector center in chip units
    pub center: (f64, f64),
    /// Detector center in millimeters
    pub center_mm: (f64, f64),
}

impl Footprint {
    fn square(center_mm: (f64, f64)) -> Self {
        let cx = center_mm.0 / CHIP_WIDTH_MM;
        let cy = center_mm.1 / CHIP_WIDTH_MM;
        Self {
            edges: [
                HalfPlane { a: 1.0, b: 0.0, c: cx + 0.5 },
                HalfPlane { a: -1.0, b: 0.0, c: 0.5 - cx },
                HalfPlane { a: 0.0, b: 1.0, c: cy + 0.5 },
                HalfPlane { a: 0.0, b: -1.0, c: 0.5 - cy },
            ],
            center: (cx, cy),
            center_mm,
        }
    }
}

static FOOTPRINTS: Lazy<Vec<Footprint>> = Lazy::new(|| {
    DETECTOR_CENTERS_MM
        .iter()
        .map(|&center| Footprint::square(center))
        .collect()
});

/// Static per-detector footprints plus the pixel-scale constants.
///
/// Read-only after construction; cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct GeometryTable {
    footprints: &'static [Footprint],
    enlarge: f64,
    n_pix: usize,
}

impl Default for GeometryTable {
    fn default() -> Self {
        Self::new(DEFAULT_CHIP_ENLARGE, DEFAULT_PIXELS)
    }
}

impl GeometryTable {
    /// Build the table with a footprint tolerance (chip units) and pixel count per axis
    pub fn new(enlarge: f64, n_pix: usize) -> Self {
        Self {
            footprints: FOOTPRINTS.as_slice(),
            enlarge,
            n_pix,
        }
    }

    pub fn footprint(&self, detector: DetectorId) -> &Footprint {
        // A DetectorId always indexes a physical detector; anything else is a bug.
        assert!(
            detector.index() < self.footprints.len(),
            "detector {detector} missing from geometry table"
        );
        &self.footprints[detector.index()]
    }

    pub fn enlarge(&self) -> f64 {
        self.enlarge
    }

    pub fn n_pix(&self) -> usize {
        self.n_pix
    }

    /// Half the detector width in pixels
    pub fn half_size(&self) -> f64 {
        self.n_pix as f64 / 2.0
    }

    /// Radians of sky per detector pixel
    pub fn pixel_scale_rad(&self) -> f64 {
        CHIP_WIDTH_RAD / self.n_pix as f64
    }

    /// Arcseconds of sky per detector pixel
    pub fn pixel_scale_arcsec(&self) -> f64 {
        self.pixel_scale_rad().to_degrees() * 3600.0
    }

    /// Does the focal-plane point `(x, y)` (chip units) fall on `detector`?
    pub fn contains(&self, detector: DetectorId, x: f64, y: f64) -> bool {
        let enlarge = self.enlarge;
        self.footprint(detector)
            .edges
            .iter()
            .all(|edge| edge.admits(x, y, enlarge))
    }

    /// Batch form of [`contains`](Self::contains): indices of the points on `detector`.
    pub fn contains_batch(
        &self,
        detector: DetectorId,
        xs: ArrayView1<f64>,
        ys: ArrayView1<f64>,
    ) -> Vec<usize> {
        let edges = self.footprint(detector).edges;
        let enlarge = self.enlarge;
        let mask = Zip::from(&xs)
            .and(&ys)
            .map_collect(|&x, &y| edges.iter().all(|edge| edge.admits(x, y, enlarge)));
        mask.iter()
            .enumerate()
            .filter_map(|(i, &inside)| inside.then_some(i))
            .collect()
    }

    /// Focal-plane chip units to detector pixel coordinates
    pub fn chip_to_pixel(&self, detector: DetectorId, x: f64, y: f64) -> (f64, f64) {
        let (cx, cy) = self.footprint(detector).center;
        let n = self.n_pix as f64;
        ((x - cx) * n + n / 2.0, (y - cy) * n + n / 2.0)
    }

    /// Detector pixel coordinates to focal-plane chip units
    pub fn pixel_to_chip(&self, detector: DetectorId, px: f64, py: f64) -> (f64, f64) {
        let (cx, cy) = self.footprint(detector).center;
        let n = self.n_pix as f64;
        ((px - n / 2.0) / n + cx, (py - n / 2.0) / n + cy)
    }

    /// Vertical focal-plane offset of the detector center, in millimeters.
    ///
    /// Used as the geometric lever arm for the focal-plane aberration gradient.
    pub fn gradient_offset_mm(&self, detector: DetectorId) -> f64 {
        self.footprint(detector).center_mm.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn det(id: u8) -> DetectorId {
        DetectorId::new(id).unwrap()
    }

    #[test]
    fn test_one_footprint_per_detector() {
        let table = GeometryTable::default();
        for id in DetectorId::all() {
            let fp = table.footprint(id);
            assert!(table.contains(id, fp.center.0, fp.center.1));
        }
    }

    #[test]
    fn test_footprints_do_not_overlap_at_centers() {
        let table = GeometryTable::default();
        for a in DetectorId::all() {
            let (x, y) = table.footprint(a).center;
            let hits: Vec<DetectorId> = DetectorId::all()
                .filter(|&b| table.contains(b, x, y))
                .collect();
            assert_eq!(hits, vec![a]);
        }
    }

    #[test]
    fn test_enlarge_tolerance_at_edges() {
        let table = GeometryTable::new(0.01, 4088);
        let (cx, cy) = table.footprint(det(3)).center;

        // Exactly on the edge is inside thanks to the tolerance
        assert!(table.contains(det(3), cx + 0.5, cy));
        assert!(table.contains(det(3), cx + 0.5 + 0.009, cy));
        assert!(!table.contains(det(3), cx + 0.5 + 0.011, cy));
        assert!(!table.contains(det(3), cx, cy - 0.5 - 0.011));

        let strict = GeometryTable::new(0.0, 4088);
        assert!(!strict.contains(det(3), cx + 0.5, cy));
    }

    #[test]
    fn test_batch_matches_scalar() {
        let table = GeometryTable::default();
        let (cx, cy) = table.footprint(det(10)).center;
        let xs = array![cx, cx + 0.2, cx + 0.7, cx - 0.49, 0.0];
        let ys = array![cy, cy - 0.3, cy, cy + 0.49, 0.0];

        let batch = table.contains_batch(det(10), xs.view(), ys.view());
        let scalar: Vec<usize> = (0..xs.len())
            .filter(|&i| table.contains(det(10), xs[i], ys[i]))
            .collect();
        assert_eq!(batch, scalar);
        assert_eq!(batch, vec![0, 1, 3]);
    }

    #[test]
    fn test_pixel_roundtrip() {
        let table = GeometryTable::new(0.0, 512);
        let (cx, cy) = table.footprint(det(7)).center;
        let (px, py) = table.chip_to_pixel(det(7), cx, cy);
        assert_relative_eq!(px, 256.0, epsilon = 1e-9);
        assert_relative_eq!(py, 256.0, epsilon = 1e-9);

        let (x, y) = table.pixel_to_chip(det(7), 10.0, 500.0);
        let (px, py) = table.chip_to_pixel(det(7), x, y);
        assert_relative_eq!(px, 10.0, epsilon = 1e-9);
        assert_relative_eq!(py, 500.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pixel_scale() {
        let table = GeometryTable::default();
        // Roughly 0.11 arcsec per pixel at full resolution
        assert_relative_eq!(table.pixel_scale_arcsec(), 0.11, epsilon = 1e-3);
    }
}
