use crate::{projector::Transform, ReliefError, C};
use dem::ElevationGrid;
use geo::geometry::Coord;
use log::debug;
use rayon::prelude::*;
use std::time::Instant;

/// Square millimeter heightfield covering the whole footprint.
///
/// Node `(i, j)` sits at `(i * step, j * step)`; the last node of each
/// row and column lands exactly on the footprint edge. Every cell is
/// split along its `(i, j)`–`(i + 1, j + 1)` diagonal, the same split
/// the base mesh uses, so [`HeightLattice::surface_z`] is exact on the
/// printed surface.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightLattice {
    nodes: usize,
    step: C,
    heights: Vec<C>,
}

impl HeightLattice {
    /// Resamples `grid` onto a lattice no coarser than `target_step`.
    ///
    /// Heights are measured from the grid's lowest sample. Nodes
    /// outside the transform's data rectangle stay at zero; heights
    /// fade linearly to zero over `taper_mm` towards the edge of the
    /// data rectangle.
    ///
    /// `grid` must be free of NoData.
    pub fn sample(
        grid: &ElevationGrid,
        transform: &Transform,
        target_step: C,
        vertical_scale: C,
        taper_mm: C,
    ) -> Result<Self, ReliefError> {
        let now = Instant::now();
        let footprint = transform.footprint_mm();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let cells = (footprint / target_step).ceil().max(1.0) as usize;
        let nodes = cells + 1;
        #[allow(clippy::cast_precision_loss)]
        let step = footprint / cells as C;

        let (lowest, _) = grid
            .elevation_range()
            .ok_or(dem::DemError::NoValidSamples)?;
        let data = transform.data_rect_mm();

        let mut heights = vec![0.0; nodes * nodes];
        heights.par_chunks_mut(nodes).enumerate().for_each(|(j, row)| {
            #[allow(clippy::cast_precision_loss)]
            let y = j as C * step;
            for (i, height) in row.iter_mut().enumerate() {
                #[allow(clippy::cast_precision_loss)]
                let x = i as C * step;
                let inset = (x - data.min().x)
                    .min(data.max().x - x)
                    .min(y - data.min().y)
                    .min(data.max().y - y);
                if inset < 0.0 {
                    continue;
                }
                let taper = if taper_mm > 0.0 {
                    (inset / taper_mm).min(1.0)
                } else {
                    1.0
                };
                let geo = transform.to_geo(Coord { x, y });
                if let Some(elevation) = grid.bilinear_clamped(geo) {
                    *height = transform.elevation_to_mm(elevation, f64::from(lowest), vertical_scale)
                        * taper;
                }
            }
        });

        debug!(
            "lattice; nodes: {nodes}x{nodes}, step: {step:.3} mm, exec: {:?}",
            now.elapsed()
        );
        Ok(Self {
            nodes,
            step,
            heights,
        })
    }

    /// Returns a lattice with heights from `f(x, y)`.
    pub fn from_fn<F>(footprint: C, cells: usize, f: F) -> Self
    where
        F: Fn(C, C) -> C,
    {
        let nodes = cells.max(1) + 1;
        #[allow(clippy::cast_precision_loss)]
        let step = footprint / (nodes - 1) as C;
        let mut heights = Vec::with_capacity(nodes * nodes);
        for j in 0..nodes {
            for i in 0..nodes {
                #[allow(clippy::cast_precision_loss)]
                heights.push(f(i as C * step, j as C * step));
            }
        }
        Self {
            nodes,
            step,
            heights,
        }
    }

    /// Nodes per side.
    pub fn nodes(&self) -> usize {
        self.nodes
    }

    pub fn step(&self) -> C {
        self.step
    }

    pub fn footprint(&self) -> C {
        #[allow(clippy::cast_precision_loss)]
        let footprint = (self.nodes - 1) as C * self.step;
        footprint
    }

    pub fn height(&self, i: usize, j: usize) -> C {
        self.heights[j * self.nodes + i]
    }

    pub fn max_height(&self) -> C {
        self.heights.iter().copied().fold(0.0, C::max)
    }

    /// Height of the triangulated surface above `(x, y)`, clamped to
    /// the footprint.
    pub fn surface_z(&self, x: C, y: C) -> C {
        let (i, tx) = self.locate(x);
        let (j, ty) = self.locate(y);
        let z00 = self.height(i, j);
        let z10 = self.height(i + 1, j);
        let z01 = self.height(i, j + 1);
        let z11 = self.height(i + 1, j + 1);
        if tx >= ty {
            z00 + tx * (z10 - z00) + ty * (z11 - z10)
        } else {
            z00 + ty * (z01 - z00) + tx * (z11 - z01)
        }
    }
}

/// Private API
impl HeightLattice {
    /// Cell index and position within it along one axis.
    #[allow(clippy::cast_precision_loss)]
    fn locate(&self, v: C) -> (usize, C) {
        let t = (v / self.step).clamp(0.0, (self.nodes - 1) as C);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let cell = (t.floor() as usize).min(self.nodes - 2);
        (cell, t - cell as C)
    }
}

#[cfg(test)]
mod tests {
    use super::HeightLattice;
    use crate::projector::CoordinateProjector;
    use approx::assert_abs_diff_eq;
    use dem::ElevationGrid;
    use geo::geometry::{Coord, Rect};

    #[test]
    fn test_surface_is_exact_on_planes() {
        let lattice = HeightLattice::from_fn(10.0, 7, |x, y| 0.5 * x - 0.25 * y + 3.0);
        assert_eq!(lattice.nodes(), 8);
        assert_abs_diff_eq!(lattice.footprint(), 10.0, epsilon = 1e-12);
        for (x, y) in [(0.0, 0.0), (3.3, 7.1), (10.0, 10.0), (9.99, 0.01)] {
            assert_abs_diff_eq!(lattice.surface_z(x, y), 0.5 * x - 0.25 * y + 3.0, epsilon = 1e-9);
        }
        // Clamped outside.
        assert_abs_diff_eq!(lattice.surface_z(-5.0, 0.0), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_surface_follows_diagonal_split() {
        // Single raised corner at (1, 1) of a one-cell lattice.
        let lattice = HeightLattice::from_fn(1.0, 1, |x, y| if x > 0.5 && y > 0.5 { 1.0 } else { 0.0 });
        // On the diagonal the surface is the straight line to (1, 1).
        assert_abs_diff_eq!(lattice.surface_z(0.5, 0.5), 0.5, epsilon = 1e-12);
        // Off the diagonal only one triangle is involved.
        assert_abs_diff_eq!(lattice.surface_z(0.75, 0.25), 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(lattice.surface_z(0.25, 0.75), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_sample_letterbox_and_taper() {
        // Wide bbox: data covers the full width, about half the height.
        let bbox = Rect::new(Coord { x: 10.0, y: 45.0 }, Coord { x: 10.02, y: 45.007 });
        let transform = CoordinateProjector::project(bbox, 0.0, 40.0).unwrap();
        // A 200 m plateau whose lowest sample, 100 m, sits far outside
        // the footprint.
        let mut samples = vec![200.0_f32; 50 * 30];
        samples[0] = 100.0;
        let grid = ElevationGrid::from_samples(
            Coord { x: 9.99, y: 44.99 },
            Coord { x: 0.001, y: 0.001 },
            (50, 30),
            samples,
        )
        .unwrap();

        let lattice = HeightLattice::sample(&grid, &transform, 1.0, 1.0, 2.0).unwrap();
        assert_eq!(lattice.nodes(), 41);
        let plateau = transform.elevation_to_mm(200.0, 100.0, 1.0);
        // Middle of the footprint is on the plateau.
        assert_abs_diff_eq!(lattice.height(20, 20), plateau, epsilon = 1e-9);
        // Footprint edge and letterbox are flat.
        assert_abs_diff_eq!(lattice.height(0, 20), 0.0);
        assert_abs_diff_eq!(lattice.height(20, 0), 0.0);
        // One millimeter inside a full-width edge: half way up the taper.
        assert_abs_diff_eq!(lattice.height(1, 20), plateau / 2.0, epsilon = 1e-9);
    }
}
