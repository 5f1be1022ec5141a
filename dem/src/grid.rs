use crate::{fill, DemError, C};
use geo::geometry::{Coord, Rect};
use log::debug;

/// Upper bound on the number of samples a grid may hold.
///
/// 8192 x 8192 samples, well beyond a one degree 1-arcsecond tile.
pub const MAX_SAMPLES: usize = 8192 * 8192;

/// A regular grid of elevation samples in meters.
///
/// Samples are addressed `(col, row)` where column 0 is the western
/// edge and row 0 is the southern edge.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationGrid {
    /// Center of the south-west most sample.
    origin: Coord<C>,

    /// Distance between adjacent sample centers, in degrees.
    cell_size: Coord<C>,

    cols: usize,

    rows: usize,

    /// Row-major samples.
    samples: Vec<f32>,

    /// `false` marks a NoData sample.
    valid: Vec<bool>,
}

impl ElevationGrid {
    /// Returns a grid from raw samples and an explicit validity mask.
    ///
    /// Non-finite samples are treated as NoData regardless of the
    /// mask.
    pub fn new(
        origin: Coord<C>,
        cell_size: Coord<C>,
        (cols, rows): (usize, usize),
        samples: Vec<f32>,
        valid: Vec<bool>,
    ) -> Result<Self, DemError> {
        let len = check_shape(cell_size, cols, rows)?;
        if samples.len() != len || valid.len() != len {
            return Err(DemError::Shape("sample count does not match dimensions"));
        }
        let valid = samples
            .iter()
            .zip(valid)
            .map(|(sample, valid)| valid && sample.is_finite())
            .collect();
        Ok(Self {
            origin,
            cell_size,
            cols,
            rows,
            samples,
            valid,
        })
    }

    /// Returns a grid where `NaN` samples mark NoData.
    pub fn from_samples(
        origin: Coord<C>,
        cell_size: Coord<C>,
        dimensions: (usize, usize),
        samples: Vec<f32>,
    ) -> Result<Self, DemError> {
        let valid = vec![true; samples.len()];
        Self::new(origin, cell_size, dimensions, samples, valid)
    }

    /// Returns a grid populated by calling `f(col, row)` for every
    /// sample; `None` marks NoData.
    pub fn from_fn<F>(
        origin: Coord<C>,
        cell_size: Coord<C>,
        (cols, rows): (usize, usize),
        mut f: F,
    ) -> Result<Self, DemError>
    where
        F: FnMut(usize, usize) -> Option<f32>,
    {
        let len = check_shape(cell_size, cols, rows)?;
        let mut samples = Vec::with_capacity(len);
        let mut valid = Vec::with_capacity(len);
        for row in 0..rows {
            for col in 0..cols {
                match f(col, row) {
                    Some(sample) if sample.is_finite() => {
                        samples.push(sample);
                        valid.push(true);
                    }
                    _ => {
                        samples.push(0.0);
                        valid.push(false);
                    }
                }
            }
        }
        Ok(Self {
            origin,
            cell_size,
            cols,
            rows,
            samples,
            valid,
        })
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn origin(&self) -> Coord<C> {
        self.origin
    }

    pub fn cell_size(&self) -> Coord<C> {
        self.cell_size
    }

    /// Returns the number of samples in this grid.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns the rectangle spanned by the sample centers.
    #[allow(clippy::cast_precision_loss)]
    pub fn bounds(&self) -> Rect<C> {
        let ne = Coord {
            x: self.origin.x + (self.cols - 1) as C * self.cell_size.x,
            y: self.origin.y + (self.rows - 1) as C * self.cell_size.y,
        };
        Rect::new(self.origin, ne)
    }

    /// Returns the sample at `(col, row)` unless it is NoData or out
    /// of range.
    pub fn get(&self, col: usize, row: usize) -> Option<f32> {
        if col < self.cols && row < self.rows {
            let idx = self.index(col, row);
            self.valid[idx].then(|| self.samples[idx])
        } else {
            None
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    /// Returns `true` when no NoData sample remains.
    pub fn is_complete(&self) -> bool {
        self.valid.iter().all(|v| *v)
    }

    /// Returns the (lowest, highest) valid sample.
    pub fn elevation_range(&self) -> Option<(f32, f32)> {
        self.samples
            .iter()
            .zip(&self.valid)
            .filter_map(|(sample, valid)| valid.then_some(*sample))
            .fold(None, |range, sample| match range {
                None => Some((sample, sample)),
                Some((lo, hi)) => Some((lo.min(sample), hi.max(sample))),
            })
    }

    /// Repairs every NoData sample in place from its nearest valid
    /// neighbors and returns how many samples were repaired.
    ///
    /// Runs in time linear in the number of samples.
    pub fn fill_nodata(&mut self) -> Result<usize, DemError> {
        let now = std::time::Instant::now();
        let repaired = fill::fill_nearest(self.cols, self.rows, &mut self.samples, &mut self.valid)?;
        debug!(
            "fill_nodata; samples: {}, repaired: {}, exec: {:?}",
            self.len(),
            repaired,
            now.elapsed()
        );
        Ok(repaired)
    }

    /// Bilinearly interpolated elevation at `coord`.
    ///
    /// Returns `None` outside the grid or when any of the four
    /// surrounding samples is NoData.
    pub fn bilinear(&self, coord: Coord<C>) -> Option<C> {
        let fx = (coord.x - self.origin.x) / self.cell_size.x;
        let fy = (coord.y - self.origin.y) / self.cell_size.y;
        #[allow(clippy::cast_precision_loss)]
        let (max_x, max_y) = ((self.cols - 1) as C, (self.rows - 1) as C);
        const EPS: C = 1e-9;
        if fx < -EPS || fy < -EPS || fx > max_x + EPS || fy > max_y + EPS {
            return None;
        }
        self.interpolate(fx.clamp(0.0, max_x), fy.clamp(0.0, max_y))
    }

    /// Like [`Self::bilinear`], but coordinates outside the grid are
    /// first clamped onto its edge.
    pub fn bilinear_clamped(&self, coord: Coord<C>) -> Option<C> {
        #[allow(clippy::cast_precision_loss)]
        let (max_x, max_y) = ((self.cols - 1) as C, (self.rows - 1) as C);
        let fx = ((coord.x - self.origin.x) / self.cell_size.x).clamp(0.0, max_x);
        let fy = ((coord.y - self.origin.y) / self.cell_size.y).clamp(0.0, max_y);
        self.interpolate(fx, fy)
    }
}

/// Private API
impl ElevationGrid {
    fn index(&self, col: usize, row: usize) -> usize {
        row * self.cols + col
    }

    /// `fx`, `fy` are fractional sample positions already clamped to
    /// the grid.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn interpolate(&self, fx: C, fy: C) -> Option<C> {
        let col0 = (fx.floor() as usize).min(self.cols.saturating_sub(2));
        let row0 = (fy.floor() as usize).min(self.rows.saturating_sub(2));
        let col1 = (col0 + 1).min(self.cols - 1);
        let row1 = (row0 + 1).min(self.rows - 1);
        #[allow(clippy::cast_precision_loss)]
        let (tx, ty) = (fx - col0 as C, fy - row0 as C);

        let z00 = C::from(self.get(col0, row0)?);
        let z10 = C::from(self.get(col1, row0)?);
        let z01 = C::from(self.get(col0, row1)?);
        let z11 = C::from(self.get(col1, row1)?);

        let south = z00 + (z10 - z00) * tx;
        let north = z01 + (z11 - z01) * tx;
        Some(south + (north - south) * ty)
    }
}

fn check_shape(cell_size: Coord<C>, cols: usize, rows: usize) -> Result<usize, DemError> {
    if cols == 0 || rows == 0 {
        return Err(DemError::Shape("grid needs at least one row and column"));
    }
    if !(cell_size.x.is_finite() && cell_size.y.is_finite() && cell_size.x > 0.0 && cell_size.y > 0.0)
    {
        return Err(DemError::Shape("cell size must be positive"));
    }
    cols.checked_mul(rows)
        .filter(|len| *len <= MAX_SAMPLES)
        .ok_or(DemError::TooLarge {
            cols,
            rows,
            max: MAX_SAMPLES,
        })
}
