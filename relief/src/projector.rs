//! Geographic to millimeter mapping.
//!
//! Every part of one model is placed through the same [`Transform`],
//! so a single projection step happens once per run and the result
//! is passed by reference to every later stage.

use crate::{ReliefError, C};
use geo::geometry::{Coord, Rect};

/// Mean earth radius in meters.
pub const MEAN_EARTH_RADIUS: C = 6_371_008.8;

/// Uniform, letterboxed mapping from lon/lat degrees to a square
/// millimeter footprint with its origin at the south-west corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Geographic point the local plane is centred on.
    center: Coord<C>,

    /// Meters per degree along each axis at `center`.
    m_per_deg: Coord<C>,

    scale_mm_per_m: C,

    footprint_mm: C,

    /// Part of the footprint covered by the margin-expanded bbox.
    data_rect: Rect<C>,
}

pub struct CoordinateProjector;

impl CoordinateProjector {
    /// Fits `bbox`, expanded by `margin` times its span on each side,
    /// into a `footprint_mm` square.
    ///
    /// The longer axis fills the footprint exactly; the shorter one is
    /// centred.
    pub fn project(bbox: Rect<C>, margin: C, footprint_mm: C) -> Result<Transform, ReliefError> {
        let (width, height) = (bbox.width(), bbox.height());
        if !(width.is_finite() && height.is_finite()) || width <= 0.0 || height <= 0.0 {
            return Err(ReliefError::InvalidExtent(format!(
                "bounding box {:?} has no area",
                bbox
            )));
        }
        if !margin.is_finite() || margin < 0.0 {
            return Err(ReliefError::InvalidExtent(format!(
                "margin {margin} is negative"
            )));
        }
        if !footprint_mm.is_finite() || footprint_mm <= 0.0 {
            return Err(ReliefError::InvalidExtent(format!(
                "footprint {footprint_mm} mm is not positive"
            )));
        }

        let center = bbox.center();
        let m_per_deg_lat = MEAN_EARTH_RADIUS * C::to_radians(1.0);
        let m_per_deg = Coord {
            x: m_per_deg_lat * center.y.to_radians().cos(),
            y: m_per_deg_lat,
        };
        let expand = 1.0 + 2.0 * margin;
        let width_m = width * expand * m_per_deg.x;
        let height_m = height * expand * m_per_deg.y;
        let scale_mm_per_m = footprint_mm / width_m.max(height_m);

        let half = Coord {
            x: width_m * scale_mm_per_m / 2.0,
            y: height_m * scale_mm_per_m / 2.0,
        };
        let middle = Coord {
            x: footprint_mm / 2.0,
            y: footprint_mm / 2.0,
        };
        Ok(Transform {
            center,
            m_per_deg,
            scale_mm_per_m,
            footprint_mm,
            data_rect: Rect::new(middle - half, middle + half),
        })
    }
}

impl Transform {
    /// Maps lon/lat degrees to footprint millimeters.
    pub fn to_mm(&self, coord: Coord<C>) -> Coord<C> {
        let s = self.scale_mm_per_m;
        Coord {
            x: (coord.x - self.center.x) * self.m_per_deg.x * s + self.footprint_mm / 2.0,
            y: (coord.y - self.center.y) * self.m_per_deg.y * s + self.footprint_mm / 2.0,
        }
    }

    /// Inverse of [`Self::to_mm`].
    pub fn to_geo(&self, mm: Coord<C>) -> Coord<C> {
        let s = self.scale_mm_per_m;
        Coord {
            x: (mm.x - self.footprint_mm / 2.0) / (s * self.m_per_deg.x) + self.center.x,
            y: (mm.y - self.footprint_mm / 2.0) / (s * self.m_per_deg.y) + self.center.y,
        }
    }

    pub fn scale_mm_per_m(&self) -> C {
        self.scale_mm_per_m
    }

    pub fn footprint_mm(&self) -> C {
        self.footprint_mm
    }

    /// Region of the footprint backed by elevation data; the rest is
    /// letterbox margin.
    pub fn data_rect_mm(&self) -> Rect<C> {
        self.data_rect
    }

    /// Geographic bounds of the footprint, letterbox included.
    pub fn footprint_geo(&self) -> Rect<C> {
        Rect::new(
            self.to_geo(Coord { x: 0.0, y: 0.0 }),
            self.to_geo(Coord {
                x: self.footprint_mm,
                y: self.footprint_mm,
            }),
        )
    }

    /// Height above the base plane of terrain at `elevation_m`, where
    /// `base_m` sits at zero.
    pub fn elevation_to_mm(&self, elevation_m: C, base_m: C, vertical_scale: C) -> C {
        (elevation_m - base_m) * self.scale_mm_per_m * vertical_scale
    }
}

#[cfg(test)]
mod tests {
    use super::CoordinateProjector;
    use crate::ReliefError;
    use approx::assert_abs_diff_eq;
    use geo::geometry::{Coord, Rect};

    #[test]
    fn test_longer_axis_fills_footprint() {
        // About 2 km by 1 km at 45°N.
        let bbox = Rect::new(
            Coord { x: 7.0, y: 45.0 },
            Coord {
                x: 7.0 + 2000.0 / 78_710.0,
                y: 45.0 + 1000.0 / 111_195.0,
            },
        );
        let transform = CoordinateProjector::project(bbox, 0.2, 120.0).unwrap();
        let data = transform.data_rect_mm();
        assert_abs_diff_eq!(data.width(), 120.0, epsilon = 1e-9);
        assert!(data.height() < 70.0 && data.height() > 50.0);
        // Letterboxed around the middle.
        assert_abs_diff_eq!(data.min().y + data.max().y, 120.0, epsilon = 1e-9);

        let sw = transform.to_mm(bbox.min());
        let ne = transform.to_mm(bbox.max());
        assert_abs_diff_eq!(ne.x - sw.x, 120.0 / 1.4, epsilon = 1e-9);
        // Uniform scale: aspect ratio is preserved.
        let ratio_mm = (ne.y - sw.y) / (ne.x - sw.x);
        assert_abs_diff_eq!(ratio_mm, 0.5, epsilon = 0.01);
    }

    #[test]
    fn test_to_geo_inverts_to_mm() {
        let bbox = Rect::new(Coord { x: -72.0, y: 44.0 }, Coord { x: -71.9, y: 44.3 });
        let transform = CoordinateProjector::project(bbox, 0.1, 40.0).unwrap();
        let data = transform.data_rect_mm();
        assert_abs_diff_eq!(data.height(), 40.0, epsilon = 1e-9);
        for mm in [Coord { x: 0.0, y: 0.0 }, Coord { x: 13.5, y: 39.0 }] {
            let back = transform.to_mm(transform.to_geo(mm));
            assert_abs_diff_eq!(back.x, mm.x, epsilon = 1e-9);
            assert_abs_diff_eq!(back.y, mm.y, epsilon = 1e-9);
        }
        assert_abs_diff_eq!(
            transform.elevation_to_mm(1100.0, 100.0, 2.0),
            2000.0 * transform.scale_mm_per_m(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_invalid_extent() {
        let point = Rect::new(Coord { x: 1.0, y: 1.0 }, Coord { x: 1.0, y: 2.0 });
        assert!(matches!(
            CoordinateProjector::project(point, 0.1, 120.0),
            Err(ReliefError::InvalidExtent(_))
        ));
        let bbox = Rect::new(Coord { x: 1.0, y: 1.0 }, Coord { x: 2.0, y: 2.0 });
        assert!(CoordinateProjector::project(bbox, -0.1, 120.0).is_err());
        assert!(CoordinateProjector::project(bbox, 0.1, 0.0).is_err());
    }
}
