//! Carving the track channel into the base.

use crate::{
    backend::BooleanEngine,
    config::GrooveProfile,
    layers::stroke,
    sweep::{sweep, Stations},
    ReliefError, C,
};
use geo::{
    geometry::{Coord, LineString, MultiPolygon},
    Simplify,
};
use log::{debug, warn};
use nalgebra::Point3;
use printmesh::{defect_vertices, inspect, Rgba, Solid};
use std::time::Instant;

/// Section scale used for the single relaxed retry.
pub const RETRY_SHRINK: C = 0.9;

/// Material that must remain between the groove floor and the base
/// bottom (mm).
pub const MIN_FLOOR_MM: C = 0.4;

/// Extra height of the groove section above the inlay's top.
const HEADROOM_MM: C = 1.0;

const GROOVE_COLOR: Rgba = Rgba::opaque(255, 0, 255);

/// Groove cross-section in `(r, u)`, counter-clockwise.
///
/// Reaches `headroom` above the surface so the cut opens to air.
pub fn section(profile: &GrooveProfile, headroom: C) -> Vec<Coord<C>> {
    let top = profile.width() / 2.0;
    let floor = top - profile.chamfer();
    let depth = profile.depth();
    vec![
        Coord { x: -floor, y: -depth },
        Coord { x: floor, y: -depth },
        Coord { x: top, y: 0.0 },
        Coord { x: top, y: headroom },
        Coord { x: -top, y: headroom },
        Coord { x: -top, y: 0.0 },
    ]
}

/// Result of a successful carve.
#[derive(Debug, Clone)]
pub struct Carved {
    /// The base with the groove removed.
    pub base: Solid,

    /// The volume that was subtracted.
    pub groove: Solid,

    /// Profile actually cut; smaller than requested after a retry.
    pub profile: GrooveProfile,
}

impl Carved {
    /// Plan area within `margin` of the cut along `stations`.
    ///
    /// The heightfield cut can spill a cell diagonal past the tool,
    /// and a tilted section leans sideways, so callers pass about two
    /// lattice steps.
    pub fn footprint(&self, stations: &Stations, margin: C) -> MultiPolygon<C> {
        let centerline: LineString<C> = stations
            .points()
            .iter()
            .map(|p| Coord { x: p.x, y: p.y })
            .collect();
        stroke(&centerline.simplify(&0.05), self.profile.width() / 2.0 + margin)
    }
}

pub struct GrooveCarver<'a> {
    profile: GrooveProfile,
    headroom: C,
    engine: &'a dyn BooleanEngine,
}

impl<'a> GrooveCarver<'a> {
    /// `relief` is how far the inlay will stand above the surface.
    pub fn new(profile: GrooveProfile, relief: C, engine: &'a dyn BooleanEngine) -> Self {
        Self {
            profile,
            headroom: relief + HEADROOM_MM,
            engine,
        }
    }

    /// Sweeps the groove along `stations` and removes it from `base`.
    ///
    /// A result that is not printable, or that leaves less than
    /// [`MIN_FLOOR_MM`] of floor, is retried once with the section
    /// shrunk by [`RETRY_SHRINK`].
    pub fn carve(&self, base: &Solid, stations: &Stations) -> Result<Carved, ReliefError> {
        let bounds = base
            .bounds()
            .ok_or_else(|| ReliefError::geometry("groove", "base has no vertices"))?;
        let floor_limit = bounds.min.z + MIN_FLOOR_MM;

        let mut failure = None;
        for factor in [1.0, RETRY_SHRINK] {
            let now = Instant::now();
            let profile = self.profile.scaled(factor)?;
            let mut groove = sweep(stations, &section(&profile, self.headroom), "groove", GROOVE_COLOR);
            // Keep the tool inside the base's footprint and above its
            // bottom; above the surface it only ever meets air.
            for v in &mut groove.vertices {
                *v = Point3::new(
                    v.x.clamp(bounds.min.x, bounds.max.x),
                    v.y.clamp(bounds.min.y, bounds.max.y),
                    v.z.max(bounds.min.z),
                );
            }
            let carved = self.engine.subtract(base, &groove)?;
            match check(&carved, floor_limit) {
                Ok(()) => {
                    debug!(
                        "groove; engine: {}, scale: {factor}, exec: {:?}",
                        self.engine.name(),
                        now.elapsed()
                    );
                    return Ok(Carved {
                        base: carved,
                        groove,
                        profile,
                    });
                }
                Err((reason, at)) => {
                    warn!("groove at scale {factor} unusable: {reason}");
                    failure = Some((reason, at));
                }
            }
        }

        let (reason, at) = failure.unwrap_or_default();
        Err(ReliefError::Geometry {
            stage: "groove",
            position_mm: at.map(|p| stations.nearest_arc(p)),
            reason,
        })
    }
}

/// Returns why `carved` cannot be printed and a point near the
/// problem.
fn check(carved: &Solid, floor_limit: C) -> Result<(), (String, Option<Point3<C>>)> {
    let lowest_top = carved
        .faces
        .iter()
        .enumerate()
        .filter(|(idx, _)| carved.face_normal(*idx).z > 0.0)
        .flat_map(|(_, face)| face.iter())
        .map(|v| carved.vertices[*v as usize])
        .min_by(|a, b| a.z.total_cmp(&b.z));

    if let Some(defect) = inspect(carved).defect() {
        let at = defect_vertices(carved)
            .first()
            .map(|v| carved.vertices[*v as usize])
            .or(lowest_top);
        return Err((defect, at));
    }
    match lowest_top {
        Some(p) if p.z < floor_limit => Err((
            format!("floor is {:.2} mm thick", p.z - floor_limit + MIN_FLOOR_MM),
            Some(p),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::{section, GrooveCarver, RETRY_SHRINK};
    use crate::{
        backend::{BackendError, BooleanEngine, HeightfieldEngine},
        config::GrooveProfile,
        lattice::HeightLattice,
        sweep::{signed_area2, Stations},
        terrain::mesh_slab,
        track::Polyline3D,
        ReliefError,
    };
    use approx::assert_abs_diff_eq;
    use geo::{geometry::Coord, Contains};
    use printmesh::{inspect, Point3, Solid};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stations(lattice: &HeightLattice) -> Stations {
        let points = (4..=36)
            .map(|k| {
                let x = f64::from(k);
                let y = 20.0 + 8.0 * (x / 6.0).sin();
                Point3::new(x, y, lattice.surface_z(x, y))
            })
            .collect();
        Stations::along(&Polyline3D::new(points).unwrap()).unwrap()
    }

    #[test]
    fn test_section_shape() {
        let profile = GrooveProfile::new(2.6, 1.6, 0.4).unwrap();
        let section = section(&profile, 1.6);
        assert!(signed_area2(&section) > 0.0);
        assert_abs_diff_eq!(section[1].x - section[0].x, 1.8);
        assert_abs_diff_eq!(section[2].x - section[5].x, 2.6);
    }

    #[test]
    fn test_carve_is_contained_and_printable() {
        let lattice = HeightLattice::from_fn(40.0, 100, |x, y| 2.0 + 0.05 * x + 0.02 * y);
        let base = mesh_slab(&lattice, 4.0);
        let stations = stations(&lattice);
        let engine = HeightfieldEngine::default();
        let profile = GrooveProfile::default();
        let carved = GrooveCarver::new(profile, 0.6, &engine)
            .carve(&base, &stations)
            .unwrap();

        assert_eq!(carved.profile, profile);
        let bounds = base.bounds().unwrap();
        let groove = carved.groove.bounds().unwrap();
        for axis in 0..2 {
            assert!(groove.min[axis] >= bounds.min[axis] && groove.max[axis] <= bounds.max[axis]);
        }
        assert!(groove.min.z >= bounds.min.z);
        assert!(inspect(&carved.groove).is_printable());
        let report = inspect(&carved.base);
        assert!(report.is_printable(), "{report:?}");

        // The vertex closest to a station sits on the groove floor.
        let station = stations.points()[16];
        let nearest = carved
            .base
            .vertices
            .iter()
            .filter(|v| v.z > -1.0)
            .min_by(|a, b| {
                let da = (*a - station).xy().norm();
                let db = (*b - station).xy().norm();
                da.total_cmp(&db)
            })
            .unwrap();
        assert_abs_diff_eq!(nearest.z, lattice.surface_z(nearest.x, nearest.y) - 1.6, epsilon = 0.1);

        // Every lowered vertex lies inside the reported footprint.
        let footprint = carved.footprint(&stations, 2.0 * lattice.step());
        for (before, after) in base.vertices.iter().zip(&carved.base.vertices) {
            if after.z < before.z {
                assert!(footprint.contains(&Coord { x: after.x, y: after.y }), "{after:?}");
            }
        }
    }

    /// Punches a hole on the first call only.
    struct FlakyEngine {
        calls: AtomicUsize,
    }

    impl BooleanEngine for FlakyEngine {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn subtract(&self, target: &Solid, tool: &Solid) -> Result<Solid, BackendError> {
            let mut out = HeightfieldEngine::default().subtract(target, tool)?;
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                out.faces.pop();
            }
            Ok(out)
        }
    }

    #[test]
    fn test_retry_shrinks_once() {
        let lattice = HeightLattice::from_fn(40.0, 80, |_, _| 3.0);
        let base = mesh_slab(&lattice, 4.0);
        let engine = FlakyEngine {
            calls: AtomicUsize::new(0),
        };
        let carved = GrooveCarver::new(GrooveProfile::default(), 0.6, &engine)
            .carve(&base, &stations(&lattice))
            .unwrap();
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
        assert_abs_diff_eq!(carved.profile.width(), 2.6 * RETRY_SHRINK, epsilon = 1e-12);
    }

    #[test]
    fn test_floor_puncture_is_located() {
        // Base too thin for the groove at any scale.
        let lattice = HeightLattice::from_fn(40.0, 80, |_, _| 0.5);
        let base = mesh_slab(&lattice, 1.0);
        let engine = HeightfieldEngine::default();
        let err = GrooveCarver::new(GrooveProfile::default(), 0.6, &engine)
            .carve(&base, &stations(&lattice))
            .unwrap_err();
        match err {
            ReliefError::Geometry {
                stage: "groove",
                position_mm: Some(at),
                ..
            } => assert!(at >= 0.0 && at <= stations(&lattice).length()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
