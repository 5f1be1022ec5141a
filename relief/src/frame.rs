//! The recessed border frame the finished model drops into.

use crate::{config::FrameProfile, drape::RegionMesher, ReliefError, C};
use geo::{
    geometry::{Coord, LineString, MultiPolygon, Polygon, Rect},
    BooleanOps,
};
use log::debug;
use printmesh::{Rgba, Solid};
use std::{f64::consts::TAU, time::Instant};

pub const FRAME_COLOR: Rgba = Rgba::opaque(160, 160, 165);

/// Horizontal run of the step down from the lip to the seat (mm).
const WALL_RUN: C = 0.05;

/// Material the lead-in chamfer must leave under the seat's inner
/// edge (mm).
const MIN_EDGE: C = 0.4;

/// Segments per notch circle.
const NOTCH_SEGMENTS: usize = 32;

/// Notch centers along each inner side, as fractions of its length.
const NOTCH_AT: [C; 2] = [0.35, 0.65];

/// Spacing of the points laid along the profile's break lines (mm).
const GUIDE_SPACING: C = 1.0;

/// Builds the square `frame` solid.
///
/// Seen from outside in, the ring is a lip at full height that is half
/// the rim wide, a short vertical step down by `recess`, a flat seat,
/// and a 45° lead-in chamfer at the seat's inner edge. Finger notches
/// cut through the full height.
#[derive(Debug, Clone, Copy)]
pub struct FrameBuilder {
    footprint: C,
    thickness: C,
    profile: FrameProfile,
}

/// Cross-section of the ring as a function of the distance from the
/// outer edge.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Profile {
    thickness: C,
    seat: C,
    lip: C,
    chamfer: C,
    rim: C,
}

impl Profile {
    fn height(&self, inset: C) -> C {
        if inset <= self.lip {
            self.thickness
        } else if inset < self.lip + WALL_RUN {
            self.thickness + (self.seat - self.thickness) * (inset - self.lip) / WALL_RUN
        } else if inset <= self.rim - self.chamfer {
            self.seat
        } else {
            self.seat - (inset - (self.rim - self.chamfer))
        }
    }

    /// Distances from the outer edge where the height changes slope.
    fn breaks(&self) -> Vec<C> {
        let mut breaks = vec![self.lip, self.lip + WALL_RUN];
        if self.chamfer > 0.0 {
            breaks.push(self.rim - self.chamfer);
        }
        breaks
    }
}

impl FrameBuilder {
    pub fn new(footprint: C, thickness: C, profile: FrameProfile) -> Self {
        Self {
            footprint,
            thickness,
            profile,
        }
    }

    pub fn build(&self) -> Result<Solid, ReliefError> {
        let now = Instant::now();
        let profile = self.profile()?;
        let region = self.region(&profile);

        let footprint = self.footprint;
        let inset = |c: Coord<C>| c.x.min(c.y).min(footprint - c.x).min(footprint - c.y);
        let mut mesher = RegionMesher::new();
        for d in profile.breaks() {
            mesher = mesher.guide(square_loop(footprint, d));
        }
        // Corner diagonals, where the inset changes axis.
        let mut stops = vec![0.0];
        stops.extend(profile.breaks());
        stops.push(profile.rim);
        for (east, north) in [(false, false), (true, false), (true, true), (false, true)] {
            let corner = |d: C| Coord {
                x: if east { footprint - d } else { d },
                y: if north { footprint - d } else { d },
            };
            mesher = mesher.guide(stops.iter().map(|d| corner(*d)).collect());
        }

        let solid = mesher.mesh(
            &region,
            |c| profile.height(inset(c)),
            |_| 0.0,
            "frame",
            FRAME_COLOR,
        )?;
        debug!(
            "frame; footprint: {footprint}, rim: {}, faces: {}, exec: {:?}",
            profile.rim,
            solid.faces.len(),
            now.elapsed()
        );
        Ok(solid)
    }
}

/// Private API
impl FrameBuilder {
    fn profile(&self) -> Result<Profile, ReliefError> {
        let rim = self.profile.rim();
        let recess = self.profile.recess();
        let notch = self.profile.finger_notch_radius();
        let fail = |reason: String| -> Result<Profile, ReliefError> {
            Err(ReliefError::geometry("frame", reason))
        };
        if recess >= self.thickness {
            return fail(format!(
                "recess {recess} mm is not shallower than the {} mm frame",
                self.thickness
            ));
        }
        if rim <= 0.0 || rim >= self.footprint / 2.0 {
            return fail(format!(
                "rim {rim} mm does not fit a {} mm footprint",
                self.footprint
            ));
        }
        if notch >= rim {
            return fail(format!("finger notch radius {notch} mm severs the {rim} mm rim"));
        }

        let lip = rim / 2.0;
        let seat = self.thickness - recess;
        let chamfer = self
            .profile
            .lead_in()
            .min(rim - lip - 2.0 * WALL_RUN)
            .min(seat - MIN_EDGE)
            .max(0.0);
        Ok(Profile {
            thickness: self.thickness,
            seat,
            lip,
            chamfer,
            rim,
        })
    }

    /// The ring with its notches cut away.
    fn region(&self, profile: &Profile) -> MultiPolygon<C> {
        let f = self.footprint;
        let outer = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: f, y: f }).to_polygon();
        let inner = Rect::new(
            Coord {
                x: profile.rim,
                y: profile.rim,
            },
            Coord {
                x: f - profile.rim,
                y: f - profile.rim,
            },
        )
        .to_polygon();
        let mut holes = MultiPolygon(vec![inner]);

        let radius = self.profile.finger_notch_radius();
        if radius > 0.0 {
            let side = f - 2.0 * profile.rim;
            for at in NOTCH_AT {
                let along = profile.rim + at * side;
                for center in [
                    Coord { x: along, y: profile.rim },
                    Coord {
                        x: f - profile.rim,
                        y: along,
                    },
                    Coord {
                        x: along,
                        y: f - profile.rim,
                    },
                    Coord { x: profile.rim, y: along },
                ] {
                    holes = holes.union(&MultiPolygon(vec![circle(center, radius)]));
                }
            }
        }
        MultiPolygon(vec![outer]).difference(&holes)
    }
}

fn circle(center: Coord<C>, radius: C) -> Polygon<C> {
    let ring: LineString<C> = (0..=NOTCH_SEGMENTS)
        .map(|k| {
            #[allow(clippy::cast_precision_loss)]
            let angle = TAU * (k % NOTCH_SEGMENTS) as C / NOTCH_SEGMENTS as C;
            Coord {
                x: center.x + radius * angle.cos(),
                y: center.y + radius * angle.sin(),
            }
        })
        .collect();
    Polygon::new(ring, vec![])
}

/// Closed square loop `inset` in from the footprint edge, with points
/// at most [`GUIDE_SPACING`] apart.
fn square_loop(footprint: C, inset: C) -> LineString<C> {
    let (lo, hi) = (inset, footprint - inset);
    let corners = [(lo, lo), (hi, lo), (hi, hi), (lo, hi), (lo, lo)];
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let steps = ((hi - lo) / GUIDE_SPACING).ceil().max(1.0) as usize;
    let mut points = Vec::with_capacity(4 * steps + 1);
    for pair in corners.windows(2) {
        let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
        for k in 0..steps {
            #[allow(clippy::cast_precision_loss)]
            let t = k as C / steps as C;
            points.push(Coord {
                x: x0 + (x1 - x0) * t,
                y: y0 + (y1 - y0) * t,
            });
        }
    }
    points.push(Coord { x: lo, y: lo });
    points.into()
}

#[cfg(test)]
mod tests {
    use super::{FrameBuilder, Profile, WALL_RUN};
    use crate::{config::FrameProfile, ReliefError};
    use approx::assert_abs_diff_eq;
    use printmesh::inspect;

    /// Exact volume of an un-notched frame: the height is linear in
    /// the inset between breaks and the band perimeter is linear too,
    /// so Simpson's rule is exact per band.
    fn band_volume(footprint: f64, profile: &Profile) -> f64 {
        let mut stops = vec![0.0];
        stops.extend(profile.breaks());
        stops.push(profile.rim);
        stops
            .windows(2)
            .map(|w| {
                let (a, b) = (w[0], w[1]);
                let m = (a + b) / 2.0;
                let f = |d: f64| profile.height(d) * 4.0 * (footprint - 2.0 * d);
                // Evaluate just inside the band so the ends do not pick
                // up the neighbor's slope.
                let eps = 1e-12;
                (b - a) / 6.0 * (f(a + eps) + 4.0 * f(m) + f(b - eps))
            })
            .sum()
    }

    #[test]
    fn test_profile_shape() {
        let frame = FrameBuilder::new(120.0, 8.0, FrameProfile::default());
        let profile = frame.profile().unwrap();
        assert_abs_diff_eq!(profile.height(0.0), 8.0);
        assert_abs_diff_eq!(profile.height(5.0), 8.0);
        assert_abs_diff_eq!(profile.height(5.0 + WALL_RUN), 6.5);
        assert_abs_diff_eq!(profile.height(8.0), 6.5);
        assert_abs_diff_eq!(profile.height(10.0), 5.5, epsilon = 1e-12);
    }

    #[test]
    fn test_frame_without_notches() {
        let profile = FrameProfile::new(1.5, 1.0, 0.0, 10.0).unwrap();
        let frame = FrameBuilder::new(60.0, 8.0, profile);
        let solid = frame.build().unwrap();
        let report = inspect(&solid);
        assert!(report.is_printable(), "{report:?}");
        assert_eq!(solid.name, "frame");

        let bounds = solid.bounds().unwrap();
        assert_abs_diff_eq!(bounds.size().x, 60.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bounds.size().y, 60.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bounds.max.z, 8.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bounds.min.z, 0.0, epsilon = 1e-9);

        let expected = band_volume(60.0, &frame.profile().unwrap());
        assert_abs_diff_eq!(solid.signed_volume(), expected, epsilon = 1e-6);
    }

    #[test]
    fn test_notches_remove_material() {
        let plain = FrameBuilder::new(80.0, 8.0, FrameProfile::new(1.5, 1.0, 0.0, 10.0).unwrap())
            .build()
            .unwrap();
        let notched = FrameBuilder::new(80.0, 8.0, FrameProfile::default()).build().unwrap();
        let report = inspect(&notched);
        assert!(report.is_printable(), "{report:?}");
        assert!(notched.signed_volume() < plain.signed_volume() - 1.0);
    }

    #[test]
    fn test_lead_in_is_clamped() {
        // A shallow seat leaves little height for the chamfer.
        let profile = FrameProfile::new(2.5, 5.0, 0.0, 10.0).unwrap();
        let profile = FrameBuilder::new(100.0, 3.0, profile).profile().unwrap();
        assert_abs_diff_eq!(profile.chamfer, 0.5 - 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_frames() {
        let cases = [
            (120.0, 1.5, FrameProfile::default()),
            (120.0, 8.0, FrameProfile::new(1.5, 1.0, 0.0, 0.0).unwrap()),
            (20.0, 8.0, FrameProfile::default()),
            (120.0, 8.0, FrameProfile::new(1.5, 1.0, 10.0, 10.0).unwrap()),
        ];
        for (footprint, thickness, profile) in cases {
            let err = FrameBuilder::new(footprint, thickness, profile).build().unwrap_err();
            assert!(
                matches!(err, ReliefError::Geometry { stage: "frame", .. }),
                "{err}"
            );
        }
    }
}
