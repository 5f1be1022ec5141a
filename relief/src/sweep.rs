//! Sweeping a planar cross-section along a ribbon.
//!
//! A cross-section is a counter-clockwise polygon in `(r, u)`
//! coordinates: `r` runs to the right of the direction of travel,
//! `u` straight up. Both the groove and the inlay are swept through
//! the same [`Stations`], which is what makes them fit.

use crate::{track::Polyline3D, ReliefError, C};
use geo::geometry::Coord;
use nalgebra::{Point3, Vector3};
use printmesh::{Rgba, Solid};

/// Upper bound on how far a bend may stretch a section sideways.
pub const MAX_MITER: C = 2.0;

/// Orientation of the section plane at one station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub tangent: Vector3<C>,

    /// Horizontal, perpendicular to the bisector of the adjacent
    /// segments.
    pub right: Vector3<C>,

    pub up: Vector3<C>,

    /// Lateral stretch keeping walls parallel through a bend.
    pub miter: C,
}

/// Section placements along a ribbon, one per ribbon point.
#[derive(Debug, Clone, PartialEq)]
pub struct Stations {
    points: Vec<Point3<C>>,
    frames: Vec<Frame>,
    /// Cumulative arc length at each station.
    arc: Vec<C>,
}

impl Stations {
    pub fn along(ribbon: &Polyline3D) -> Result<Self, ReliefError> {
        let points = ribbon.points().to_vec();
        if points.len() < 2 {
            return Err(ReliefError::Input("a sweep needs at least two points".into()));
        }

        let mut tangents = Vec::with_capacity(points.len() - 1);
        let mut headings = Vec::with_capacity(points.len() - 1);
        for (k, pair) in points.windows(2).enumerate() {
            let d = pair[1] - pair[0];
            let heading = Vector3::new(d.x, d.y, 0.0)
                .try_normalize(1e-9)
                .ok_or_else(|| ReliefError::Input(format!("ribbon segment {k} is vertical")))?;
            tangents.push(d.normalize());
            headings.push(heading);
        }

        let up = Vector3::z();
        let right_of = |h: Vector3<C>| Vector3::new(h.y, -h.x, 0.0);
        let last = points.len() - 1;
        let mut frames: Vec<Frame> = Vec::with_capacity(points.len());
        for i in 0..points.len() {
            let frame = if i == 0 || i == last {
                let k = if i == 0 { 0 } else { last - 1 };
                Frame {
                    tangent: tangents[k],
                    right: right_of(headings[k]),
                    up,
                    miter: 1.0,
                }
            } else {
                let (before, after) = (headings[i - 1], headings[i]);
                let tangent = (tangents[i - 1] + tangents[i])
                    .try_normalize(1e-9)
                    .unwrap_or(tangents[i]);
                match (before + after).try_normalize(1e-9) {
                    Some(bisector) => Frame {
                        tangent,
                        right: right_of(bisector),
                        up,
                        miter: (1.0 / bisector.dot(&after)).min(MAX_MITER),
                    },
                    // The track doubles back on itself.
                    None => Frame {
                        tangent,
                        miter: 1.0,
                        ..frames[i - 1]
                    },
                }
            };
            frames.push(frame);
        }

        let mut arc = Vec::with_capacity(points.len());
        let mut total = 0.0;
        arc.push(total);
        for pair in points.windows(2) {
            total += (pair[1] - pair[0]).norm();
            arc.push(total);
        }

        Ok(Self {
            points,
            frames,
            arc,
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point3<C>] {
        &self.points
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Arc length of the ribbon the stations were placed on.
    pub fn length(&self) -> C {
        self.arc.last().copied().unwrap_or_default()
    }

    /// Arc length at the station closest in plan to `p`.
    pub fn nearest_arc(&self, p: Point3<C>) -> C {
        self.points
            .iter()
            .zip(&self.arc)
            .map(|(station, arc)| ((station - p).xy().norm_squared(), *arc))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map_or(0.0, |(_, arc)| arc)
    }

    /// Places section point `(r, u)` at station `i`.
    pub fn place(&self, i: usize, offset: Coord<C>) -> Point3<C> {
        let frame = &self.frames[i];
        self.points[i] + frame.right * (offset.x * frame.miter) + frame.up * offset.y
    }

    /// Section coordinates of `p` relative to station `i`.
    pub fn local(&self, i: usize, p: Point3<C>) -> Coord<C> {
        let frame = &self.frames[i];
        let d = p - self.points[i];
        Coord {
            x: d.dot(&frame.right) / frame.miter,
            y: d.dot(&frame.up),
        }
    }
}

/// Twice the signed area; positive for counter-clockwise polygons.
pub(crate) fn signed_area2(polygon: &[Coord<C>]) -> C {
    (0..polygon.len())
        .map(|k| {
            let (a, b) = (polygon[k], polygon[(k + 1) % polygon.len()]);
            a.x * b.y - b.x * a.y
        })
        .sum()
}

/// Sweeps `section` through every station into a closed solid.
///
/// `section` must be convex; each end is capped with a fan from its
/// first point.
pub fn sweep(stations: &Stations, section: &[Coord<C>], name: &str, color: Rgba) -> Solid {
    let mut section = section.to_vec();
    if signed_area2(&section) < 0.0 {
        section.reverse();
    }
    let m = section.len();
    let n = stations.len();
    let mut solid = Solid::new(name, color);
    solid.vertices.reserve(n * m);
    solid.faces.reserve(2 * n * m);

    for i in 0..n {
        for offset in &section {
            solid.push_vertex(stations.place(i, *offset));
        }
    }
    #[allow(clippy::cast_possible_truncation)]
    let at = |i: usize, k: usize| (i * m + k % m) as u32;
    for i in 0..n - 1 {
        for k in 0..m {
            solid.push_quad([at(i, k + 1), at(i, k), at(i + 1, k), at(i + 1, k + 1)]);
        }
    }
    for k in 1..m - 1 {
        solid.push_face([at(0, 0), at(0, k), at(0, k + 1)]);
        solid.push_face([at(n - 1, 0), at(n - 1, k + 1), at(n - 1, k)]);
    }
    if solid.signed_volume() < 0.0 {
        solid.flip();
    }
    solid
}
