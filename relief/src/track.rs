//! Geographic track to a millimeter ribbon lying on the base.

use crate::{lattice::HeightLattice, projector::Transform, ReliefError, C};
use geo::geometry::Coord;
use log::debug;
use nalgebra::Point3;

/// Segments shorter than this (mm) are dropped.
const MIN_SEGMENT_MM: C = 1e-6;

/// An ordered, non-empty run of millimeter points.
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline3D {
    points: Vec<Point3<C>>,
}

impl Polyline3D {
    pub fn new(points: Vec<Point3<C>>) -> Result<Self, ReliefError> {
        if points.is_empty() {
            return Err(ReliefError::Input("polyline has no points".into()));
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point3<C>] {
        &self.points
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Total 3D arc length.
    pub fn length(&self) -> C {
        self.points.windows(2).map(|w| (w[1] - w[0]).norm()).sum()
    }

    /// Longest segment measured in plan.
    pub fn max_segment_xy(&self) -> C {
        self.points
            .windows(2)
            .map(|w| (w[1] - w[0]).xy().norm())
            .fold(0.0, C::max)
    }
}

/// Places a geographic track on the base surface.
pub struct TrackProjector<'a> {
    transform: &'a Transform,
    lattice: &'a HeightLattice,
    step_mm: C,
}

impl<'a> TrackProjector<'a> {
    pub fn new(transform: &'a Transform, lattice: &'a HeightLattice, step_mm: C) -> Self {
        Self {
            transform,
            lattice,
            step_mm,
        }
    }

    /// Projects `track` (lon/lat) into the footprint.
    ///
    /// The result has no segment longer than the step in plan, and
    /// every point sits exactly on the base's top surface. Points
    /// outside the footprint are dropped and the gaps they leave are
    /// bridged with evenly spaced points.
    pub fn project(&self, track: &[Coord<C>]) -> Result<Polyline3D, ReliefError> {
        let footprint = self.transform.footprint_mm();
        let mut plan: Vec<Coord<C>> = Vec::with_capacity(track.len());
        for coord in track {
            let mm = self.transform.to_mm(*coord);
            if !(mm.x.is_finite() && mm.y.is_finite()) {
                return Err(ReliefError::Input(format!("track point {coord:?} is not finite")));
            }
            plan.push(mm);
        }

        let inside = |c: &Coord<C>| (0.0..=footprint).contains(&c.x) && (0.0..=footprint).contains(&c.y);
        let dropped = plan.len();
        plan.retain(inside);
        let dropped = dropped - plan.len();
        if dropped > 0 {
            debug!("clipped {dropped} track points outside the footprint");
        }
        plan.dedup_by(|b, a| distance(*a, *b) <= MIN_SEGMENT_MM);

        let resampled = resample(&plan, self.step_mm);
        if resampled.len() < 2 {
            return Err(ReliefError::Input(format!(
                "{} track points remain inside the footprint, need at least 2",
                resampled.len()
            )));
        }
        let points = resampled
            .into_iter()
            .map(|c| Point3::new(c.x, c.y, self.lattice.surface_z(c.x, c.y)))
            .collect();
        Polyline3D::new(points)
    }
}

fn distance(a: Coord<C>, b: Coord<C>) -> C {
    (b.x - a.x).hypot(b.y - a.y)
}

/// Splits every segment into equal parts no longer than `step`,
/// keeping the original vertices.
fn resample(plan: &[Coord<C>], step: C) -> Vec<Coord<C>> {
    let mut out = Vec::with_capacity(plan.len());
    for pair in plan.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let parts = (distance(a, b) / step).ceil().max(1.0) as usize;
        for k in 0..parts {
            #[allow(clippy::cast_precision_loss)]
            let t = k as C / parts as C;
            out.push(a + (b - a) * t);
        }
    }
    if let Some(last) = plan.last() {
        out.push(*last);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{resample, TrackProjector};
    use crate::{lattice::HeightLattice, projector::CoordinateProjector, ReliefError};
    use approx::assert_abs_diff_eq;
    use geo::geometry::{Coord, Rect};

    #[test]
    fn test_resample_bounds_segments() {
        let plan = [Coord { x: 0.0, y: 0.0 }, Coord { x: 3.5, y: 0.0 }, Coord { x: 3.5, y: 0.2 }];
        let out = resample(&plan, 1.0);
        // Four parts on the first segment, one on the second.
        assert_eq!(out.len(), 6);
        assert_abs_diff_eq!(out[1].x, 0.875);
        assert_eq!(out[4], plan[1]);
        assert_eq!(out[5], plan[2]);
    }

    #[test]
    fn test_clip_and_drape() {
        let bbox = Rect::new(Coord { x: 6.0, y: 46.0 }, Coord { x: 6.01, y: 46.01 });
        let transform = CoordinateProjector::project(bbox, 0.0, 40.0).unwrap();
        let lattice = HeightLattice::from_fn(40.0, 40, |x, y| 0.1 * x + 0.05 * y);
        let projector = TrackProjector::new(&transform, &lattice, 1.0);

        // West to east across the middle, starting and ending outside,
        // with a duplicate point.
        let track = [
            Coord { x: 5.99, y: 46.005 },
            Coord { x: 6.002, y: 46.005 },
            Coord { x: 6.002, y: 46.005 },
            Coord { x: 6.008, y: 46.005 },
            Coord { x: 6.03, y: 46.005 },
        ];
        let ribbon = projector.project(&track).unwrap();
        assert!(ribbon.max_segment_xy() <= 1.0 + 1e-9);
        for p in ribbon.points() {
            assert!((0.0..=40.0).contains(&p.x));
            assert_abs_diff_eq!(p.z, 0.1 * p.x + 0.05 * p.y, epsilon = 1e-9);
        }
        let first = ribbon.points()[0];
        let last = ribbon.points()[ribbon.len() - 1];
        assert!(last.x - first.x > 15.0);

        assert!(matches!(
            projector.project(&[Coord { x: 5.0, y: 46.0 }, Coord { x: 6.005, y: 46.005 }]),
            Err(ReliefError::Input(_))
        ));
    }

    #[test]
    fn test_gap_is_bridged() {
        let bbox = Rect::new(Coord { x: 6.0, y: 46.0 }, Coord { x: 6.01, y: 46.01 });
        let transform = CoordinateProjector::project(bbox, 0.0, 40.0).unwrap();
        let lattice = HeightLattice::from_fn(40.0, 20, |_, _| 0.0);
        let projector = TrackProjector::new(&transform, &lattice, 1.0);
        // Leaves the footprint to the north and comes back.
        let track = [
            Coord { x: 6.001, y: 46.009 },
            Coord { x: 6.005, y: 46.05 },
            Coord { x: 6.009, y: 46.009 },
        ];
        let ribbon = projector.project(&track).unwrap();
        assert!(ribbon.len() > 20);
        assert!(ribbon.max_segment_xy() <= 1.0 + 1e-9);
    }
}
