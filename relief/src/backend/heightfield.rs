use super::{BackendError, BooleanEngine};
use crate::C;
use log::debug;
use printmesh::{Point3, Solid};
use rayon::prelude::*;
use std::time::Instant;

/// In-process subtraction for targets whose top is a heightfield.
///
/// Each upward-facing target triangle is intersected in plan with the
/// downward-facing tool faces whose column reaches its surface, and
/// its three corners are lowered to the deepest tool height found over
/// that overlap. Linear interpolation between the lowered corners then
/// never rises above the tool, so anything placed inside the tool
/// clears the cut even between target vertices. The price is a cut up
/// to one target triangle wider than the tool. Topology is untouched,
/// so a closed target stays closed.
#[derive(Debug, Clone, Copy)]
pub struct HeightfieldEngine {
    /// Side of the plan-view buckets tool faces are binned into.
    bucket_mm: C,
}

impl Default for HeightfieldEngine {
    fn default() -> Self {
        Self { bucket_mm: 1.0 }
    }
}

/// Tool faces binned on a regular plan-view grid.
struct Buckets {
    origin: (C, C),
    size: C,
    cols: usize,
    rows: usize,
    faces: Vec<Vec<u32>>,
}

impl Buckets {
    fn new(tool: &Solid, size: C) -> Option<Self> {
        let bounds = tool.bounds()?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let cols = ((bounds.max.x - bounds.min.x) / size).floor() as usize + 1;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rows = ((bounds.max.y - bounds.min.y) / size).floor() as usize + 1;
        let mut buckets = Self {
            origin: (bounds.min.x, bounds.min.y),
            size,
            cols,
            rows,
            faces: vec![Vec::new(); cols * rows],
        };
        for idx in 0..tool.faces.len() {
            let [a, b, c] = tool.triangle(idx);
            let (c0, r0) = buckets.cell(a.x.min(b.x).min(c.x), a.y.min(b.y).min(c.y));
            let (c1, r1) = buckets.cell(a.x.max(b.x).max(c.x), a.y.max(b.y).max(c.y));
            for row in r0..=r1 {
                for col in c0..=c1 {
                    #[allow(clippy::cast_possible_truncation)]
                    buckets.faces[row * cols + col].push(idx as u32);
                }
            }
        }
        Some(buckets)
    }

    fn cell(&self, x: C, y: C) -> (usize, usize) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let col = (((x - self.origin.0) / self.size).floor().max(0.0) as usize).min(self.cols - 1);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let row = (((y - self.origin.1) / self.size).floor().max(0.0) as usize).min(self.rows - 1);
        (col, row)
    }

    #[allow(clippy::cast_precision_loss)]
    fn contains(&self, x: C, y: C) -> bool {
        x >= self.origin.0
            && y >= self.origin.1
            && x <= self.origin.0 + self.size * self.cols as C
            && y <= self.origin.1 + self.size * self.rows as C
    }

    fn get(&self, x: C, y: C) -> &[u32] {
        if !self.contains(x, y) {
            return &[];
        }
        let (col, row) = self.cell(x, y);
        &self.faces[row * self.cols + col]
    }

    /// Faces binned anywhere in the plan rectangle `min`..`max`, each
    /// once.
    #[allow(clippy::cast_precision_loss)]
    fn overlapping(&self, min: (C, C), max: (C, C)) -> Vec<u32> {
        let far = (
            self.origin.0 + self.size * self.cols as C,
            self.origin.1 + self.size * self.rows as C,
        );
        if max.0 < self.origin.0 || max.1 < self.origin.1 || min.0 > far.0 || min.1 > far.1 {
            return Vec::new();
        }
        let (c0, r0) = self.cell(min.0, min.1);
        let (c1, r1) = self.cell(max.0, max.1);
        let mut faces: Vec<u32> = (r0..=r1)
            .flat_map(|row| (c0..=c1).map(move |col| row * self.cols + col))
            .flat_map(|cell| self.faces[cell].iter().copied())
            .collect();
        faces.sort_unstable();
        faces.dedup();
        faces
    }
}

/// Nudges ray positions off shared edges and vertices so no crossing
/// is counted twice.
const JITTER: (C, C) = (3.141_592_7e-7, 2.718_281_8e-7);

/// Twice the signed plan area of `a`, `b`, `c`; negative when the
/// triangle looks down.
fn plan_det([a, b, c]: &[Point3<C>; 3]) -> C {
    (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y)
}

/// Barycentric weights of `(x, y)` in the plan projection of `tri`.
fn barycentric(tri: &[Point3<C>; 3], x: C, y: C) -> Option<[C; 3]> {
    let [a, b, c] = tri;
    let det = plan_det(tri);
    if det.abs() < 1e-18 {
        return None;
    }
    let l1 = ((x - a.x) * (c.y - a.y) - (c.x - a.x) * (y - a.y)) / det;
    let l2 = ((b.x - a.x) * (y - a.y) - (x - a.x) * (b.y - a.y)) / det;
    Some([1.0 - l1 - l2, l1, l2])
}

/// Height of the plane through `tri` above `(x, y)`.
fn plane_z(tri: &[Point3<C>; 3], x: C, y: C) -> Option<C> {
    let [l0, l1, l2] = barycentric(tri, x, y)?;
    Some(l0 * tri[0].z + l1 * tri[1].z + l2 * tri[2].z)
}

/// Height at which a vertical ray through `(x, y)` crosses face `idx`,
/// and +1 if the face looks down (the ray enters the tool there) or
/// -1 if it looks up.
fn crossing(tool: &Solid, idx: usize, x: C, y: C) -> Option<(C, i32)> {
    let tri = tool.triangle(idx);
    let [l0, l1, l2] = barycentric(&tri, x, y)?;
    if l0 < 0.0 || l1 < 0.0 || l2 < 0.0 {
        return None;
    }
    let z = l0 * tri[0].z + l1 * tri[1].z + l2 * tri[2].z;
    Some((z, if plan_det(&tri) < 0.0 { 1 } else { -1 }))
}

/// Part of the convex counter-clockwise plan polygon `subject` inside
/// the counter-clockwise triangle `window`.
fn clip(subject: Vec<(C, C)>, window: [(C, C); 3]) -> Vec<(C, C)> {
    let mut out = subject;
    for k in 0..3 {
        let (a, b) = (window[k], window[(k + 1) % 3]);
        let side = |p: (C, C)| (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
        let input = std::mem::take(&mut out);
        for (i, &p) in input.iter().enumerate() {
            let q = input[(i + 1) % input.len()];
            let (sp, sq) = (side(p), side(q));
            if sp >= 0.0 {
                out.push(p);
            }
            if (sp >= 0.0) != (sq >= 0.0) {
                let t = sp / (sp - sq);
                out.push((p.0 + t * (q.0 - p.0), p.1 + t * (q.1 - p.1)));
            }
        }
        if out.len() < 3 {
            return Vec::new();
        }
    }
    out
}

/// Twice the area of the counter-clockwise plan polygon `points`.
fn area2(points: &[(C, C)]) -> C {
    (0..points.len())
        .map(|k| {
            let (a, b) = (points[k], points[(k + 1) % points.len()]);
            a.0 * b.1 - b.0 * a.1
        })
        .sum()
}

impl HeightfieldEngine {
    /// Lowest height `z` can be pushed to at `(x, y)`, if the point
    /// is inside `tool`.
    fn entry(tool: &Solid, buckets: &Buckets, x: C, y: C, z: C) -> Option<C> {
        let (x, y) = (x + JITTER.0, y + JITTER.1);
        let mut hits: Vec<(C, i32)> = buckets
            .get(x, y)
            .iter()
            .filter_map(|idx| crossing(tool, *idx as usize, x, y))
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut winding = 0;
        let mut entered = None;
        for (hit_z, direction) in hits {
            if hit_z > z {
                break;
            }
            if winding == 0 && direction > 0 {
                entered = Some(hit_z);
            }
            winding += direction;
            if winding <= 0 {
                winding = 0;
                entered = None;
            }
        }
        entered
    }

    /// Deepest tool height over the plan area of the upward-facing
    /// target triangle `surface`, counting only tool columns that
    /// contain the surface. `None` if the tool never cuts it.
    fn reach(tool: &Solid, buckets: &Buckets, surface: &[Point3<C>; 3]) -> Option<C> {
        if plan_det(surface) <= 1e-18 {
            return None;
        }
        let min = (
            surface.iter().map(|p| p.x).fold(C::INFINITY, C::min),
            surface.iter().map(|p| p.y).fold(C::INFINITY, C::min),
        );
        let max = (
            surface.iter().map(|p| p.x).fold(C::NEG_INFINITY, C::max),
            surface.iter().map(|p| p.y).fold(C::NEG_INFINITY, C::max),
        );
        let mut deepest: Option<C> = None;
        for idx in buckets.overlapping(min, max) {
            let face = tool.triangle(idx as usize);
            if plan_det(&face) >= 0.0 {
                continue;
            }
            // Looking down, so reversed to wind counter-clockwise.
            let window = [
                (face[0].x, face[0].y),
                (face[2].x, face[2].y),
                (face[1].x, face[1].y),
            ];
            let overlap = clip(surface.iter().map(|p| (p.x, p.y)).collect(), window);
            if area2(&overlap) < 1e-12 {
                continue;
            }
            // Where the face dips furthest below the surface.
            let depth = |&(x, y): &(C, C)| match (plane_z(&face, x, y), plane_z(surface, x, y)) {
                (Some(f), Some(s)) => f - s,
                _ => C::INFINITY,
            };
            let Some(lowest) = overlap.iter().min_by(|a, b| depth(*a).total_cmp(&depth(*b))) else {
                continue;
            };
            if depth(lowest) >= 0.0 {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let n = overlap.len() as C;
            let centroid = (
                overlap.iter().map(|p| p.0).sum::<C>() / n,
                overlap.iter().map(|p| p.1).sum::<C>() / n,
            );
            let x = lowest.0 + 0.01 * (centroid.0 - lowest.0);
            let y = lowest.1 + 0.01 * (centroid.1 - lowest.1);
            let Some(z) = plane_z(surface, x, y) else {
                continue;
            };
            if Self::entry(tool, buckets, x, y, z).is_none() {
                // Buried under the surface there.
                continue;
            }
            let floor = overlap
                .iter()
                .filter_map(|&(x, y)| plane_z(&face, x, y))
                .fold(C::INFINITY, C::min);
            deepest = Some(deepest.map_or(floor, |d| d.min(floor)));
        }
        deepest
    }
}

impl BooleanEngine for HeightfieldEngine {
    fn name(&self) -> &'static str {
        "heightfield"
    }

    fn subtract(&self, target: &Solid, tool: &Solid) -> Result<Solid, BackendError> {
        let now = Instant::now();
        let Some(buckets) = Buckets::new(tool, self.bucket_mm) else {
            return Ok(target.clone());
        };
        let reach: Vec<Option<C>> = (0..target.faces.len())
            .into_par_iter()
            .map(|idx| Self::reach(tool, &buckets, &target.triangle(idx)))
            .collect();
        let mut vertices = target.vertices.clone();
        for (face, z) in target.faces.iter().zip(reach) {
            let Some(z) = z else { continue };
            for v in face {
                let p = &mut vertices[*v as usize];
                if z < p.z {
                    p.z = z;
                }
            }
        }
        let lowered = vertices
            .iter()
            .zip(&target.vertices)
            .filter(|(after, before)| after.z < before.z)
            .count();
        debug!(
            "heightfield subtract; lowered: {lowered}, tool faces: {}, exec: {:?}",
            tool.faces.len(),
            now.elapsed()
        );
        Ok(Solid::with_mesh(
            target.name.clone(),
            target.color,
            vertices,
            target.faces.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{clip, BooleanEngine, HeightfieldEngine};
    use crate::{lattice::HeightLattice, terrain::mesh_slab};
    use approx::assert_abs_diff_eq;
    use printmesh::{inspect, Point3, Rgba, Solid};

    /// Closed box spanning `min`..`max`.
    fn cuboid(min: Point3<f64>, max: Point3<f64>) -> Solid {
        let corner = |i: usize| {
            Point3::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            )
        };
        let mut solid = Solid::with_mesh("box", Rgba::default(), (0..8).map(corner).collect(), Vec::new());
        for quad in [
            [0, 2, 3, 1],
            [4, 5, 7, 6],
            [0, 1, 5, 4],
            [1, 3, 7, 5],
            [3, 2, 6, 7],
            [2, 0, 4, 6],
        ] {
            solid.push_quad(quad);
        }
        solid
    }

    /// Height of the top surface of `solid` above `(x, y)`.
    fn top_at(solid: &Solid, x: f64, y: f64) -> Option<f64> {
        (0..solid.faces.len())
            .filter_map(|idx| {
                let tri = solid.triangle(idx);
                if super::plan_det(&tri) <= 1e-12 {
                    return None;
                }
                let l = super::barycentric(&tri, x, y)?;
                l.iter()
                    .all(|w| *w >= -1e-12)
                    .then(|| l[0] * tri[0].z + l[1] * tri[1].z + l[2] * tri[2].z)
            })
            .reduce(f64::max)
    }

    #[test]
    fn test_cuboid_fixture_is_printable() {
        let cube = cuboid(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 2.0, 3.0));
        assert!(inspect(&cube).is_printable());
        assert_abs_diff_eq!(cube.signed_volume(), 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_clip_triangles() {
        let square = vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        let half = clip(square, [(0.0, 0.0), (2.0, 0.0), (0.0, 2.0)]);
        assert_eq!(half.len(), 3);
        let outside = clip(
            vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)],
            [(2.0, 2.0), (3.0, 2.0), (2.0, 3.0)],
        );
        assert!(outside.is_empty());
    }

    #[test]
    fn test_pocket() {
        let lattice = HeightLattice::from_fn(10.0, 20, |_, _| 2.0);
        let step = lattice.step();
        let slab = mesh_slab(&lattice, 3.0);
        let tool = cuboid(Point3::new(3.1, 3.1, 1.0), Point3::new(6.9, 6.9, 5.0));
        let carved = HeightfieldEngine::default().subtract(&slab, &tool).unwrap();

        assert_eq!(carved.name, "base");
        assert_eq!(carved.faces, slab.faces);
        let report = inspect(&carved);
        assert!(report.is_printable(), "{report:?}");
        let near = |v: f64| (3.1 - step..6.9 + step).contains(&v);
        for (before, after) in slab.vertices.iter().zip(&carved.vertices) {
            let inside = (3.1..6.9).contains(&before.x) && (3.1..6.9).contains(&before.y);
            if inside && before.z > 0.0 {
                assert_abs_diff_eq!(after.z, 1.0, epsilon = 1e-9);
            } else if !(near(before.x) && near(before.y)) || before.z < 1.0 {
                assert_eq!(after, before);
            } else {
                assert!(after.z == before.z || (after.z - 1.0).abs() < 1e-9, "{after:?}");
            }
        }
        // Nothing between lattice nodes is left standing inside the pocket.
        for k in 0..=40 {
            for l in 0..=40 {
                let (x, y) = (3.1 + 3.8 * f64::from(k) / 40.0, 3.1 + 3.8 * f64::from(l) / 40.0);
                let z = top_at(&carved, x, y).unwrap();
                assert!(z <= 1.0 + 1e-9, "({x}, {y}) at {z}");
            }
        }
        assert!(carved.signed_volume() < slab.signed_volume());
    }

    #[test]
    fn test_oblique_cut_stays_below_tool() {
        // A wedge whose floor rises from 0.5 to 1.5 across a slab at 2,
        // rotated against the lattice.
        let lattice = HeightLattice::from_fn(10.0, 17, |_, _| 2.0);
        let slab = mesh_slab(&lattice, 3.0);
        let (s, c) = 0.5_f64.sin_cos();
        let at = |u: f64, v: f64, z: f64| Point3::new(5.0 + u * c - v * s, 5.0 + u * s + v * c, z);
        let mut tool = Solid::with_mesh(
            "wedge",
            Rgba::default(),
            vec![
                at(-2.0, -1.0, 0.5),
                at(2.0, -1.0, 1.5),
                at(2.0, 1.0, 1.5),
                at(-2.0, 1.0, 0.5),
                at(-2.0, -1.0, 4.0),
                at(2.0, -1.0, 4.0),
                at(2.0, 1.0, 4.0),
                at(-2.0, 1.0, 4.0),
            ],
            Vec::new(),
        );
        for quad in [
            [0, 3, 2, 1],
            [4, 5, 6, 7],
            [0, 1, 5, 4],
            [1, 2, 6, 5],
            [2, 3, 7, 6],
            [3, 0, 4, 7],
        ] {
            tool.push_quad(quad);
        }
        assert!(inspect(&tool).is_printable());

        let carved = HeightfieldEngine::default().subtract(&slab, &tool).unwrap();
        assert!(inspect(&carved).is_printable());
        for k in 0..=30 {
            for l in 0..=30 {
                let u = -2.0 + 4.0 * f64::from(k) / 30.0;
                let v = -1.0 + 2.0 * f64::from(l) / 30.0;
                let p = at(u, v, 0.0);
                let floor = 1.0 + u / 4.0;
                let z = top_at(&carved, p.x, p.y).unwrap();
                assert!(z <= floor + 1e-9, "({u}, {v}): {z} above {floor}");
            }
        }
    }

    #[test]
    fn test_tool_below_surface_leaves_top() {
        let lattice = HeightLattice::from_fn(10.0, 10, |_, _| 2.0);
        let slab = mesh_slab(&lattice, 3.0);
        // Entirely buried; no column of it reaches the top.
        let tool = cuboid(Point3::new(2.0, 2.0, -2.0), Point3::new(8.0, 8.0, 1.0));
        let carved = HeightfieldEngine::default().subtract(&slab, &tool).unwrap();
        assert_eq!(carved, slab);
    }
}
