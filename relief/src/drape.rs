//! Closed solids over plan-view regions.
//!
//! A region is triangulated once with a constrained Delaunay
//! triangulation; the same triangles are lifted twice, to a top and a
//! bottom height function, and the region's outline is stitched
//! between the two with vertical walls.

use crate::{lattice::HeightLattice, ReliefError, C};
use geo::{
    geometry::{Coord, LineString, MultiPolygon, Point, Polygon},
    Contains, Densify, EuclideanDistance, Intersects,
};
use itertools::Itertools;
use log::debug;
use printmesh::{Point3, Rgba, Solid};
use spade::{
    ConstrainedDelaunayTriangulation, InsertionError, Point2 as SpadePoint2, Triangulation,
};
use std::{
    collections::{HashMap, HashSet},
    time::Instant,
};

/// Thinnest wall the solid may have anywhere (mm).
const MIN_THICKNESS: C = 0.01;

/// Triangles thinner than this (twice their area, mm²) are dropped.
const SLIVER: C = 1e-12;

type Cdt = ConstrainedDelaunayTriangulation<SpadePoint2<C>>;

/// Triangulated region: plan vertices and counter-clockwise faces.
struct Plan {
    vertices: Vec<Coord<C>>,
    faces: Vec<[u32; 3]>,
}

#[derive(Debug, Clone, Default)]
pub struct RegionMesher {
    spacing: Option<C>,
    guides: Vec<LineString<C>>,
}

impl RegionMesher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills the interior with points `spacing` apart and densifies
    /// outlines to the same spacing.
    #[must_use]
    pub fn grid(mut self, spacing: C) -> Self {
        self.spacing = Some(spacing);
        self
    }

    /// Forces triangle edges between consecutive points of `line`
    /// wherever both lie in the region. Points on the outline should
    /// coincide with outline vertices.
    #[must_use]
    pub fn guide(mut self, line: LineString<C>) -> Self {
        self.guides.push(line);
        self
    }

    /// Builds one closed solid over every polygon in `region`.
    pub fn mesh<T, B>(
        &self,
        region: &MultiPolygon<C>,
        top: T,
        bottom: B,
        name: &str,
        color: Rgba,
    ) -> Result<Solid, ReliefError>
    where
        T: Fn(Coord<C>) -> C,
        B: Fn(Coord<C>) -> C,
    {
        let now = Instant::now();
        let mut solid = Solid::new(name, color);
        for polygon in region {
            let plan = self.triangulate(polygon)?;
            lift(&mut solid, &plan, &top, &bottom);
        }
        debug!(
            "region mesh; name: {name}, polygons: {}, faces: {}, exec: {:?}",
            region.0.len(),
            solid.faces.len(),
            now.elapsed()
        );
        Ok(solid)
    }
}

/// Lays `region` on the lattice's surface as a slab `thickness` thick.
pub fn drape(
    region: &MultiPolygon<C>,
    lattice: &HeightLattice,
    thickness: C,
    name: &str,
    color: Rgba,
) -> Result<Solid, ReliefError> {
    RegionMesher::new().grid(lattice.step()).mesh(
        region,
        |c| lattice.surface_z(c.x, c.y) + thickness,
        |c| lattice.surface_z(c.x, c.y),
        name,
        color,
    )
}

/// Private API
impl RegionMesher {
    fn triangulate(&self, polygon: &Polygon<C>) -> Result<Plan, ReliefError> {
        let mut cdt = Cdt::new();
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            let ring = match self.spacing {
                Some(spacing) => ring.densify(spacing),
                None => ring.clone(),
            };
            // Rings repeat their first point at the end.
            let points = &ring.0[..ring.0.len().saturating_sub(1)];
            constrain(&mut cdt, points, true)?;
        }

        let clear = |c: Coord<C>, min: C| {
            let point = Point::from(c);
            polygon.contains(&point)
                && std::iter::once(polygon.exterior())
                    .chain(polygon.interiors())
                    .all(|ring| point.euclidean_distance(ring) > min)
        };

        for guide in &self.guides {
            let mut previous = None;
            for c in guide.coords().copied() {
                if !polygon.intersects(&Point::from(c)) {
                    previous = None;
                    continue;
                }
                let handle = insert(&mut cdt, c)?;
                if let Some((from, at)) = previous {
                    let mid = Point::from((at + c) / 2.0);
                    if from != handle
                        && polygon.intersects(&mid)
                        && cdt.can_add_constraint(from, handle)
                    {
                        cdt.add_constraint(from, handle);
                    }
                }
                previous = Some((handle, c));
            }
        }

        if let Some(spacing) = self.spacing {
            let bounds = polygon.exterior().coords().fold(
                (Coord { x: C::MAX, y: C::MAX }, Coord { x: C::MIN, y: C::MIN }),
                |(lo, hi), c| {
                    (
                        Coord {
                            x: lo.x.min(c.x),
                            y: lo.y.min(c.y),
                        },
                        Coord {
                            x: hi.x.max(c.x),
                            y: hi.y.max(c.y),
                        },
                    )
                },
            );
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let cols = ((bounds.1.x - bounds.0.x) / spacing).ceil().max(0.0) as usize;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let rows = ((bounds.1.y - bounds.0.y) / spacing).ceil().max(0.0) as usize;
            for j in 0..=rows {
                for i in 0..=cols {
                    #[allow(clippy::cast_precision_loss)]
                    let c = Coord {
                        x: bounds.0.x + i as C * spacing,
                        y: bounds.0.y + j as C * spacing,
                    };
                    if clear(c, spacing * 0.3) {
                        insert(&mut cdt, c)?;
                    }
                }
            }
        }

        let mut vertices = Vec::new();
        let mut index: HashMap<usize, u32> = HashMap::new();
        let mut faces = Vec::new();
        for face in cdt.inner_faces() {
            let corners = face.vertices().map(|vh| {
                let p = vh.position();
                (vh.fix().index(), Coord { x: p.x, y: p.y })
            });
            let [(_, a), (_, b), (_, c)] = corners;
            let area2 = (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y);
            if area2.abs() < SLIVER {
                continue;
            }
            let centroid = Coord {
                x: (a.x + b.x + c.x) / 3.0,
                y: (a.y + b.y + c.y) / 3.0,
            };
            if !polygon.contains(&Point::from(centroid)) {
                continue;
            }
            let mut tri = corners.map(|(key, coord)| {
                #[allow(clippy::cast_possible_truncation)]
                let next = vertices.len() as u32;
                *index.entry(key).or_insert_with(|| {
                    vertices.push(coord);
                    next
                })
            });
            if area2 < 0.0 {
                tri.swap(1, 2);
            }
            faces.push(tri);
        }
        Ok(Plan { vertices, faces })
    }
}

fn insert(cdt: &mut Cdt, c: Coord<C>) -> Result<spade::handles::FixedVertexHandle, ReliefError> {
    cdt.insert(SpadePoint2::new(c.x, c.y)).map_err(|e: InsertionError| {
        ReliefError::geometry("triangulation", format!("insert {c:?}: {e}"))
    })
}

/// Inserts `points` and constrains consecutive pairs, closing the
/// loop if `closed`. Pairs that would cross an existing constraint
/// are left unconstrained.
fn constrain(cdt: &mut Cdt, points: &[Coord<C>], closed: bool) -> Result<(), ReliefError> {
    let handles = points
        .iter()
        .map(|c| insert(cdt, *c))
        .collect::<Result<Vec<_>, _>>()?;
    let wrap = handles.first().copied().filter(|_| closed);
    for (from, to) in handles.iter().copied().chain(wrap).tuple_windows() {
        if from != to && cdt.can_add_constraint(from, to) {
            cdt.add_constraint(from, to);
        }
    }
    Ok(())
}

/// Appends the closed solid over `plan` to `solid`.
fn lift<T, B>(solid: &mut Solid, plan: &Plan, top: &T, bottom: &B)
where
    T: Fn(Coord<C>) -> C,
    B: Fn(Coord<C>) -> C,
{
    if plan.faces.is_empty() {
        return;
    }
    #[allow(clippy::cast_possible_truncation)]
    let offset = solid.vertices.len() as u32;
    #[allow(clippy::cast_possible_truncation)]
    let count = plan.vertices.len() as u32;
    let (tops, bottoms): (Vec<_>, Vec<_>) = plan
        .vertices
        .iter()
        .map(|c| {
            let low = bottom(*c);
            let high = top(*c).max(low + MIN_THICKNESS);
            (Point3::new(c.x, c.y, high), Point3::new(c.x, c.y, low))
        })
        .unzip();
    solid.vertices.extend(tops);
    solid.vertices.extend(bottoms);

    let up = |v: u32| offset + v;
    let down = |v: u32| offset + count + v;
    let directed: HashSet<(u32, u32)> = plan
        .faces
        .iter()
        .flat_map(|[a, b, c]| [(*a, *b), (*b, *c), (*c, *a)])
        .collect();
    for [a, b, c] in &plan.faces {
        solid.push_face([up(*a), up(*b), up(*c)]);
        solid.push_face([down(*a), down(*c), down(*b)]);
    }
    // Outline edges are the ones no neighbor traverses backwards.
    let mut outline: Vec<_> = directed
        .iter()
        .filter(|(a, b)| !directed.contains(&(*b, *a)))
        .copied()
        .collect();
    outline.sort_unstable();
    for (a, b) in outline {
        solid.push_face([up(b), up(a), down(a)]);
        solid.push_face([up(b), down(a), down(b)]);
    }
}

#[cfg(test)]
mod tests {
    use super::{drape, RegionMesher};
    use crate::lattice::HeightLattice;
    use approx::assert_abs_diff_eq;
    use geo::{
        geometry::{Coord, LineString, MultiPolygon, Polygon},
        line_string, polygon, Area,
    };
    use printmesh::{inspect, Rgba};

    fn square_with_hole() -> MultiPolygon<f64> {
        MultiPolygon(vec![Polygon::new(
            line_string![(x: 2.0, y: 2.0), (x: 12.0, y: 2.0), (x: 12.0, y: 12.0), (x: 2.0, y: 12.0), (x: 2.0, y: 2.0)],
            vec![line_string![(x: 5.0, y: 5.0), (x: 5.0, y: 9.0), (x: 9.0, y: 9.0), (x: 9.0, y: 5.0), (x: 5.0, y: 5.0)]],
        )])
    }

    #[test]
    fn test_flat_prism_volume() {
        let region = square_with_hole();
        let solid = RegionMesher::new()
            .grid(1.0)
            .mesh(&region, |_| 2.0, |_| 0.5, "prism", Rgba::default())
            .unwrap();
        let report = inspect(&solid);
        assert!(report.is_printable(), "{report:?}");
        assert_abs_diff_eq!(solid.signed_volume(), region.unsigned_area() * 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_drape_follows_surface() {
        let lattice = HeightLattice::from_fn(20.0, 40, |x, y| 1.0 + 0.1 * x + 0.05 * y);
        let region = MultiPolygon(vec![polygon![
            (x: 3.0, y: 4.0),
            (x: 15.0, y: 3.0),
            (x: 17.0, y: 16.0),
            (x: 6.0, y: 14.0),
        ]]);
        let solid = drape(&region, &lattice, 0.8, "water", Rgba::opaque(50, 120, 255)).unwrap();
        assert!(inspect(&solid).is_printable());
        for v in &solid.vertices {
            let surface = lattice.surface_z(v.x, v.y);
            assert!(
                (v.z - surface).abs() < 1e-9 || (v.z - surface - 0.8).abs() < 1e-9,
                "{v:?} is off the surface"
            );
        }
        // The surface is planar, so the slab is exact.
        assert_abs_diff_eq!(solid.signed_volume(), region.unsigned_area() * 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_guides_become_edges() {
        let region = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 5.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 5.0, y: 10.0),
            (x: 0.0, y: 10.0),
        ]]);
        // A ridge along x = 5; the region's interior has no other
        // vertices, so only the guide keeps triangles off it.
        let ridge: LineString<f64> = vec![
            Coord { x: 5.0, y: 0.0 },
            Coord { x: 5.0, y: 5.0 },
            Coord { x: 5.0, y: 10.0 },
        ]
        .into();
        let height = |c: Coord<f64>| if c.x <= 5.0 { 3.0 } else { 3.0 - (c.x - 5.0) * 0.25 };
        let solid = RegionMesher::new()
            .guide(ridge)
            .mesh(&region, height, |_| 0.0, "ridge", Rgba::default())
            .unwrap();
        assert!(inspect(&solid).is_printable());
        let expected = 5.0 * 10.0 * 3.0 + 5.0 * 10.0 * (3.0 + 1.75) / 2.0;
        assert_abs_diff_eq!(solid.signed_volume(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_region() {
        let solid = RegionMesher::new()
            .mesh(&MultiPolygon(vec![]), |_| 1.0, |_| 0.0, "none", Rgba::default())
            .unwrap();
        assert!(solid.is_empty());
    }
}
