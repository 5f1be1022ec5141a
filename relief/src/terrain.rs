//! The base: a closed slab whose top follows the terrain.

use crate::{lattice::HeightLattice, projector::Transform, ReliefError, C};
use dem::ElevationGrid;
use log::debug;
use printmesh::{Point3, Rgba, Solid};
use std::time::Instant;

pub const BASE_COLOR: Rgba = Rgba::opaque(120, 80, 50);

/// Builds the `base` solid from an elevation grid.
#[derive(Debug, Clone, Copy)]
pub struct TerrainMesher<'a> {
    transform: &'a Transform,
    thickness: C,
    lattice_step: C,
    vertical_scale: C,
    edge_taper: C,
}

impl<'a> TerrainMesher<'a> {
    pub fn new(transform: &'a Transform, thickness: C) -> Self {
        Self {
            transform,
            thickness,
            lattice_step: 0.4,
            vertical_scale: 1.0,
            edge_taper: 0.0,
        }
    }

    #[must_use]
    pub fn lattice_step(mut self, mm: C) -> Self {
        self.lattice_step = mm;
        self
    }

    #[must_use]
    pub fn vertical_scale(mut self, scale: C) -> Self {
        self.vertical_scale = scale;
        self
    }

    #[must_use]
    pub fn edge_taper(mut self, mm: C) -> Self {
        self.edge_taper = mm;
        self
    }

    /// Repairs NoData in `grid`, then meshes it.
    ///
    /// Returns the base solid and the lattice its top surface was
    /// triangulated from.
    pub fn build(&self, grid: &mut ElevationGrid) -> Result<(Solid, HeightLattice), ReliefError> {
        if !(self.thickness.is_finite() && self.thickness > 0.0) {
            return Err(ReliefError::InvalidParameter {
                name: "base_thickness_mm",
                value: self.thickness,
                reason: "must be positive",
            });
        }
        let filled = grid.fill_nodata()?;
        if filled > 0 {
            debug!("repaired {filled} NoData samples");
        }
        let lattice = HeightLattice::sample(
            grid,
            self.transform,
            self.lattice_step,
            self.vertical_scale,
            self.edge_taper,
        )?;
        let solid = mesh_slab(&lattice, self.thickness);
        Ok((solid, lattice))
    }
}

/// Closes `lattice` into a slab with a flat bottom at `-thickness`.
///
/// Top vertices are indexed `j * nodes + i`. The bottom is a fan
/// around its centre so the bottom ring shares the wall edges exactly.
pub fn mesh_slab(lattice: &HeightLattice, thickness: C) -> Solid {
    let now = Instant::now();
    let n = lattice.nodes();
    let step = lattice.step();
    let mut solid = Solid::new("base", BASE_COLOR);
    solid.vertices.reserve(n * n + 4 * n);
    solid.faces.reserve(2 * (n - 1) * (n - 1) + 12 * (n - 1));

    for j in 0..n {
        for i in 0..n {
            #[allow(clippy::cast_precision_loss)]
            solid.push_vertex(Point3::new(i as C * step, j as C * step, lattice.height(i, j)));
        }
    }
    #[allow(clippy::cast_possible_truncation)]
    let top = |i: usize, j: usize| (j * n + i) as u32;
    for j in 0..n - 1 {
        for i in 0..n - 1 {
            let (v00, v10, v01, v11) = (top(i, j), top(i + 1, j), top(i, j + 1), top(i + 1, j + 1));
            solid.push_face([v00, v10, v11]);
            solid.push_face([v00, v11, v01]);
        }
    }

    // Boundary ring, counter-clockwise seen from above.
    let ring: Vec<u32> = (0..n - 1)
        .map(|i| top(i, 0))
        .chain((0..n - 1).map(|j| top(n - 1, j)))
        .chain((1..n).rev().map(|i| top(i, n - 1)))
        .chain((1..n).rev().map(|j| top(0, j)))
        .collect();
    let bottom: Vec<u32> = ring
        .iter()
        .map(|&v| {
            let p = solid.vertices[v as usize];
            solid.push_vertex(Point3::new(p.x, p.y, -thickness))
        })
        .collect();
    let half = lattice.footprint() / 2.0;
    let center = solid.push_vertex(Point3::new(half, half, -thickness));

    for k in 0..ring.len() {
        let next = (k + 1) % ring.len();
        let (a, b) = (ring[k], ring[next]);
        let (a_low, b_low) = (bottom[k], bottom[next]);
        solid.push_face([b, a, a_low]);
        solid.push_face([b, a_low, b_low]);
        solid.push_face([center, b_low, a_low]);
    }

    debug!(
        "base mesh; vertices: {}, faces: {}, exec: {:?}",
        solid.vertices.len(),
        solid.faces.len(),
        now.elapsed()
    );
    solid
}
