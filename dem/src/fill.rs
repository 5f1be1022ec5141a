//! NoData repair.
//!
//! Holes are filled front by front, starting from every valid sample
//! at once: each pass assigns the samples bordering the already valid
//! region the mean of their valid neighbors, then advances. Every
//! sample is queued at most once, so the fill is linear in grid size.

use crate::DemError;

const NEIGHBORS: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

pub(crate) fn fill_nearest(
    cols: usize,
    rows: usize,
    samples: &mut [f32],
    valid: &mut [bool],
) -> Result<usize, DemError> {
    if !valid.iter().any(|v| *v) {
        return Err(DemError::NoValidSamples);
    }

    let neighbors = |idx: usize| {
        #[allow(clippy::cast_possible_wrap)]
        let (col, row) = ((idx % cols) as isize, (idx / cols) as isize);
        NEIGHBORS.iter().filter_map(move |(dc, dr)| {
            let (c, r) = (col + dc, row + dr);
            #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
            let inside = c >= 0 && r >= 0 && (c as usize) < cols && (r as usize) < rows;
            #[allow(clippy::cast_sign_loss)]
            inside.then(|| r as usize * cols + c as usize)
        })
    };

    let mut queued = valid.to_vec();
    let mut front: Vec<usize> = Vec::new();
    for idx in 0..samples.len() {
        if !valid[idx] && neighbors(idx).any(|n| valid[n]) {
            queued[idx] = true;
            front.push(idx);
        }
    }

    let mut repaired = 0;
    let mut fills: Vec<f32> = Vec::new();
    while !front.is_empty() {
        // Means are taken before any sample of this front is marked
        // valid, so the result does not depend on visiting order.
        fills.clear();
        fills.extend(front.iter().map(|&idx| {
            let (sum, count) = neighbors(idx)
                .filter(|n| valid[*n])
                .fold((0.0_f64, 0_u32), |(sum, count), n| {
                    (sum + f64::from(samples[n]), count + 1)
                });
            #[allow(clippy::cast_possible_truncation)]
            let mean = (sum / f64::from(count.max(1))) as f32;
            mean
        }));
        for (&idx, &fill) in front.iter().zip(&fills) {
            samples[idx] = fill;
            valid[idx] = true;
        }
        repaired += front.len();

        let mut next = Vec::new();
        for &idx in &front {
            for n in neighbors(idx) {
                if !queued[n] {
                    queued[n] = true;
                    next.push(n);
                }
            }
        }
        front = next;
    }

    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use crate::{DemError, ElevationGrid};
    use geo::Coord;

    const ORIGIN: Coord = Coord { x: 0.0, y: 0.0 };
    const CELL: Coord = Coord { x: 1.0, y: 1.0 };

    #[test]
    fn test_single_hole_takes_neighbor_mean() {
        let mut grid = ElevationGrid::from_fn(ORIGIN, CELL, (3, 3), |col, row| {
            ((col, row) != (1, 1)).then_some(10.0)
        })
        .unwrap();
        assert_eq!(grid.fill_nodata().unwrap(), 1);
        assert_eq!(grid.get(1, 1), Some(10.0));
        assert!(grid.is_complete());
    }

    #[test]
    fn test_mostly_nodata_is_fully_repaired() {
        let mut grid = ElevationGrid::from_fn(ORIGIN, CELL, (64, 48), |col, row| {
            (col == 60 && row == 3).then_some(42.0)
        })
        .unwrap();
        assert_eq!(grid.valid_count(), 1);
        let repaired = grid.fill_nodata().unwrap();
        assert_eq!(repaired, 64 * 48 - 1);
        assert!(grid.is_complete());
        assert_eq!(grid.elevation_range(), Some((42.0, 42.0)));
    }

    #[test]
    fn test_fill_stays_within_valid_range() {
        let mut grid = ElevationGrid::from_fn(ORIGIN, CELL, (20, 20), |col, row| {
            match (col % 7, row % 5) {
                (0, 0) => Some(100.0),
                (3, 2) => Some(-20.0),
                _ => None,
            }
        })
        .unwrap();
        grid.fill_nodata().unwrap();
        let (lo, hi) = grid.elevation_range().unwrap();
        assert!(lo >= -20.0 && hi <= 100.0);
    }

    #[test]
    fn test_no_valid_samples() {
        let mut grid = ElevationGrid::from_fn(ORIGIN, CELL, (8, 8), |_, _| None).unwrap();
        assert!(matches!(grid.fill_nodata(), Err(DemError::NoValidSamples)));
    }
}
