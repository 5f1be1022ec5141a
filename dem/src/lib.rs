//! Gridded elevation data.
//!
//! [`ElevationGrid`] is the in-memory raster every downstream stage
//! samples from. Grids come from any [`ElevationSource`]; this crate
//! ships [`Tiles`], a cached directory of SRTM/NASADEM `.hgt` tiles.

mod error;
mod fill;
mod grid;
pub mod hgt;
mod tiles;

pub use crate::{
    error::DemError,
    grid::{ElevationGrid, MAX_SAMPLES},
    hgt::Tile,
    tiles::{TileMode, Tiles},
};
pub use geo;

/// Base floating point type used for all coordinates and calculations.
pub type C = f64;

/// Anything that can produce an [`ElevationGrid`] covering a
/// geographic bounding box (longitude as `x`, latitude as `y`).
///
/// Implementations own their caching.
pub trait ElevationSource {
    fn grid(&self, bounds: geo::Rect<C>) -> Result<ElevationGrid, DemError>;
}

/// A grid already in memory serves every request as is; samples
/// outside it clamp to its edge.
impl ElevationSource for ElevationGrid {
    fn grid(&self, _bounds: geo::Rect<C>) -> Result<ElevationGrid, DemError> {
        Ok(self.clone())
    }
}
