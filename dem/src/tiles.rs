//! Directory of `.hgt` tiles assembled into grids on demand.

use crate::{hgt::Tile, DemError, ElevationGrid, ElevationSource, C};
use dashmap::DashMap;
use geo::geometry::{Coord, Rect};
use log::debug;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Largest extent, per side, a single grid request may cover.
const MAX_SPAN_DEG: C = 1.0;

#[derive(Clone)]
pub struct Tiles {
    /// Directory containing HGT tile files.
    tile_dir: PathBuf,

    /// How to load tiles (in-memory or mapped).
    tile_mode: TileMode,

    /// Tiles which have been loaded on demand.
    tiles: DashMap<Coord<i16>, Arc<Tile>>,
}

impl Tiles {
    pub fn new(tile_dir: PathBuf, tile_mode: TileMode) -> Result<Self, DemError> {
        let mut has_height_files = false;

        // Fail early unless tile_dir has at least one `hgt` file.
        for entry in std::fs::read_dir(&tile_dir)? {
            let path = entry?.path();
            if path
                .extension()
                .and_then(std::ffi::OsStr::to_str)
                .is_some_and(|ext| ext.eq_ignore_ascii_case("hgt"))
            {
                has_height_files = true;
                break;
            }
        }

        if has_height_files {
            Ok(Self {
                tile_dir,
                tile_mode,
                tiles: DashMap::new(),
            })
        } else {
            Err(DemError::Path(tile_dir))
        }
    }

    /// Returns the tile containing `coord`.
    ///
    /// Tiles missing on disk are replaced by an all-void tombstone so
    /// the area reads as NoData.
    pub fn get(&self, coord: Coord<C>) -> Result<Arc<Tile>, DemError> {
        let sw_corner = sw_corner(coord);
        self.tiles
            .entry(sw_corner)
            .or_try_insert_with(|| match self.load_tile(sw_corner) {
                Ok(tile) => Ok(Arc::new(tile)),
                Err(DemError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                    debug!("loading tombstone in lieu of missing tile for {sw_corner:?}");
                    Ok(Arc::new(Tile::tombstone(sw_corner)))
                }
                Err(e) => Err(e),
            })
            .map(|r| r.clone())
    }

    /// Number of tiles currently cached.
    pub fn cached(&self) -> usize {
        self.tiles.len()
    }
}

impl ElevationSource for Tiles {
    /// Samples every tile touching `bounds` at the resolution of the
    /// tile under its SW corner.
    fn grid(&self, bounds: Rect<C>) -> Result<ElevationGrid, DemError> {
        let (width, height) = (bounds.width(), bounds.height());
        if width > MAX_SPAN_DEG || height > MAX_SPAN_DEG {
            return Err(DemError::AreaTooLarge(width, height));
        }

        let now = std::time::Instant::now();
        let min = bounds.min();
        let step = C::from(self.get(min)?.resolution()) / 3600.0;
        // Snap onto sample centers, which sit on whole multiples of
        // the step from the tile's SW corner.
        let origin = Coord {
            x: (min.x / step).floor() * step,
            y: (min.y / step).floor() * step,
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let dimensions = (
            ((bounds.max().x - origin.x) / step).ceil() as usize + 1,
            ((bounds.max().y - origin.y) / step).ceil() as usize + 1,
        );

        let mut tile = self.get(origin)?;
        let mut failure = None;
        let grid = ElevationGrid::from_fn(origin, Coord { x: step, y: step }, dimensions, |col, row| {
            #[allow(clippy::cast_precision_loss)]
            let coord = Coord {
                x: origin.x + col as C * step,
                y: origin.y + row as C * step,
            };
            if !tile.covers(coord) {
                match self.get(coord) {
                    Ok(next) => tile = next,
                    Err(e) => {
                        failure.get_or_insert(e);
                        return None;
                    }
                }
            }
            tile.get(coord).map(f32::from)
        });
        if let Some(e) = failure {
            return Err(e);
        }
        let grid = grid?;

        debug!(
            "grid; bounds: {:?}, dims: {:?}, tiles: {}, exec: {:?}",
            bounds,
            dimensions,
            self.cached(),
            now.elapsed()
        );
        Ok(grid)
    }
}

/// Private API.
impl Tiles {
    fn load_tile(&self, sw_corner: Coord<i16>) -> Result<Tile, DemError> {
        let tile_path = {
            let file_name = file_name(sw_corner);
            let mut tile_path: PathBuf = [&self.tile_dir, Path::new(&file_name)].iter().collect();
            if !tile_path.exists() {
                let file_name = file_name.to_lowercase();
                tile_path = [&self.tile_dir, Path::new(&file_name)].iter().collect();
            }
            tile_path
        };
        debug!("loading {tile_path:?}");
        match self.tile_mode {
            TileMode::InMem => Tile::load(tile_path),
            TileMode::MemMap => Tile::memmap(tile_path),
        }
    }
}

/// How to handle tile.
///
/// The trade off between loading tile data into memory versus memory
/// mapping is not obvious, and you should measure both before
/// deciding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileMode {
    /// Parse tile and load into memory.
    InMem,

    /// Memory map file contents.
    MemMap,
}

/// Returns the southwest corner as integers for coord.
fn sw_corner(Coord { x, y }: Coord<C>) -> Coord<i16> {
    #[allow(clippy::cast_possible_truncation)]
    Coord {
        x: (x.floor() as i16),
        y: (y.floor() as i16),
    }
}

/// Returns the expected file name for coord
fn file_name(Coord { x, y }: Coord<i16>) -> String {
    let (n_s, lat) = {
        let lat = y.abs();
        let n_s = if y.is_negative() { 'S' } else { 'N' };
        (n_s, lat)
    };
    let (e_w, lon) = {
        let lon = x.abs();
        let e_w = if x.is_negative() { 'W' } else { 'E' };
        (e_w, lon)
    };
    format!("{n_s}{lat:02}{e_w}{lon:03}.hgt")
}
