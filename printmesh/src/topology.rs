//! Closedness and manifold checks.

use crate::Solid;
use std::collections::HashMap;

/// Faces with less area than this (mm²) are reported as degenerate.
const DEGENERATE_AREA: f64 = 1e-12;

/// Result of [`inspect`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeshReport {
    pub vertices: usize,

    pub faces: usize,

    /// Distinct undirected edges.
    pub edges: usize,

    /// Edges used by exactly one face.
    pub boundary_edges: usize,

    /// Edges shared by more than two faces.
    pub non_manifold_edges: usize,

    /// Two-face edges traversed in the same direction by both faces.
    pub misoriented_edges: usize,

    /// Zero-area faces, faces repeating an index and faces pointing
    /// past the vertex list.
    pub degenerate_faces: usize,

    /// `V - E + F` over vertices referenced by at least one face.
    pub euler_characteristic: i64,

    pub signed_volume: f64,
}

impl MeshReport {
    /// No boundary and no non-manifold edges.
    pub fn is_watertight(&self) -> bool {
        self.faces > 0 && self.boundary_edges == 0 && self.non_manifold_edges == 0
    }

    pub fn is_manifold(&self) -> bool {
        self.non_manifold_edges == 0
    }

    pub fn is_consistently_oriented(&self) -> bool {
        self.misoriented_edges == 0
    }

    pub fn is_inside_out(&self) -> bool {
        self.signed_volume < 0.0
    }

    /// What a slicer needs: closed, 2-manifold, outward facing and
    /// free of degenerate faces.
    pub fn is_printable(&self) -> bool {
        self.is_watertight()
            && self.is_consistently_oriented()
            && !self.is_inside_out()
            && self.degenerate_faces == 0
    }

    /// Human readable reason [`Self::is_printable`] fails, if it does.
    pub fn defect(&self) -> Option<String> {
        if self.faces == 0 {
            Some("no faces".to_string())
        } else if self.boundary_edges > 0 {
            Some(format!("{} boundary edges", self.boundary_edges))
        } else if self.non_manifold_edges > 0 {
            Some(format!("{} non-manifold edges", self.non_manifold_edges))
        } else if self.misoriented_edges > 0 {
            Some(format!("{} inconsistently wound edges", self.misoriented_edges))
        } else if self.degenerate_faces > 0 {
            Some(format!("{} degenerate faces", self.degenerate_faces))
        } else if self.is_inside_out() {
            Some("faces wind inward".to_string())
        } else {
            None
        }
    }
}

#[derive(Default, Clone, Copy)]
struct EdgeUse {
    /// Traversals from the lower to the higher vertex index.
    forward: u32,
    backward: u32,
}

fn edge_usage(solid: &Solid) -> HashMap<(u32, u32), EdgeUse> {
    let vertex_count = solid.vertices.len();
    let mut edges: HashMap<(u32, u32), EdgeUse> = HashMap::with_capacity(solid.faces.len() * 3 / 2);
    for [a, b, c] in solid.faces.iter().copied() {
        if [a, b, c].iter().any(|v| *v as usize >= vertex_count) {
            continue;
        }
        for (from, to) in [(a, b), (b, c), (c, a)] {
            if from == to {
                continue;
            }
            let entry = edges.entry((from.min(to), from.max(to))).or_default();
            if from < to {
                entry.forward += 1;
            } else {
                entry.backward += 1;
            }
        }
    }
    edges
}

impl EdgeUse {
    fn is_defective(self) -> bool {
        !(self.forward == 1 && self.backward == 1)
    }
}

/// Counts edge usage over every face of `solid`.
///
/// Linear in face count.
#[allow(clippy::cast_possible_wrap)]
pub fn inspect(solid: &Solid) -> MeshReport {
    let vertex_count = solid.vertices.len();
    let mut referenced = vec![false; vertex_count];
    let mut degenerate_faces = 0;

    for (idx, face) in solid.faces.iter().enumerate() {
        let [a, b, c] = *face;
        if face.iter().any(|v| *v as usize >= vertex_count) {
            degenerate_faces += 1;
            continue;
        }
        if a == b || b == c || a == c || solid.face_normal(idx).norm() / 2.0 < DEGENERATE_AREA {
            degenerate_faces += 1;
        }
        for v in face {
            referenced[*v as usize] = true;
        }
    }

    let edges = edge_usage(solid);
    let mut report = MeshReport {
        vertices: vertex_count,
        faces: solid.faces.len(),
        edges: edges.len(),
        degenerate_faces,
        signed_volume: solid.signed_volume(),
        ..MeshReport::default()
    };
    for usage in edges.values() {
        match usage.forward + usage.backward {
            1 => report.boundary_edges += 1,
            2 if usage.forward != 1 => report.misoriented_edges += 1,
            2 => {}
            _ => report.non_manifold_edges += 1,
        }
    }

    let used = referenced.iter().filter(|r| **r).count() as i64;
    report.euler_characteristic = used - edges.len() as i64 + solid.faces.len() as i64;
    report
}

/// Returns the sorted, deduplicated endpoints of every boundary,
/// non-manifold or misoriented edge.
pub fn defect_vertices(solid: &Solid) -> Vec<u32> {
    let mut vertices: Vec<u32> = edge_usage(solid)
        .into_iter()
        .filter(|(_, usage)| usage.is_defective())
        .flat_map(|((a, b), _)| [a, b])
        .collect();
    vertices.sort_unstable();
    vertices.dedup();
    vertices
}
