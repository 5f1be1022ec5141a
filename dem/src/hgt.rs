//! SRTM / NASADEM elevation (`.hgt`) tiles.
//!
//! # References
//!
//! 1. [HGT file layout](http://fileformats.archiveteam.org/index.php?title=HGT&oldid=17250)
//! 1. [SRTM Collection User Guide](https://lpdaac.usgs.gov/documents/179/SRTM_User_Guide_V3.pdf)

use crate::{DemError, C};
use byteorder::{BigEndian as BE, ReadBytesExt};
use geo::geometry::Coord;
use memmap2::Mmap;
use std::{fs::File, io::BufReader, mem::size_of, path::Path};

/// Sample value HGT files use for voids.
pub const VOID: i16 = i16::MIN;

const ARCSEC_PER_DEG: C = 3600.0;

pub struct Tile {
    /// Center of the SW most sample of the tile.
    sw_corner_center: Coord<C>,

    /// Arcseconds per sample.
    resolution: u8,

    /// Number of (columns, rows) in this tile.
    dimensions: (usize, usize),

    samples: SampleStore,
}

enum SampleStore {
    /// Stand-in for a tile missing on disk; every sample is a void.
    Tombstone,
    InMem(Box<[i16]>),
    MemMap(Mmap),
}

impl SampleStore {
    fn get_unchecked(&self, index: usize) -> i16 {
        match self {
            Self::Tombstone => VOID,
            Self::InMem(samples) => samples[index],
            Self::MemMap(raw) => {
                let start = index * size_of::<i16>();
                let bytes = [raw[start], raw[start + 1]];
                i16::from_be_bytes(bytes)
            }
        }
    }
}

impl Tile {
    /// Returns a Tile read into memory from the file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DemError> {
        let (resolution, dimensions @ (cols, rows)) = extract_resolution(&path)?;
        let sw_corner_center = sw_corner_center(&path)?;

        let mut file = BufReader::new(File::open(path)?);
        let mut samples = Vec::with_capacity(cols * rows);
        for _ in 0..(cols * rows) {
            samples.push(file.read_i16::<BE>()?);
        }

        Ok(Self {
            sw_corner_center,
            resolution,
            dimensions,
            samples: SampleStore::InMem(samples.into_boxed_slice()),
        })
    }

    /// Returns a Tile using the memory-mapped file as storage.
    pub fn memmap<P: AsRef<Path>>(path: P) -> Result<Self, DemError> {
        let (resolution, dimensions) = extract_resolution(&path)?;
        let sw_corner_center = sw_corner_center(&path)?;

        let samples = {
            let file = File::open(path)?;
            // The file is opened read-only and never truncated while
            // a tile is alive.
            let mmap = unsafe { Mmap::map(&file)? };
            SampleStore::MemMap(mmap)
        };

        Ok(Self {
            sw_corner_center,
            resolution,
            dimensions,
            samples,
        })
    }

    /// Returns an all-void 3-arcsecond tile for the given SW corner.
    pub fn tombstone(sw_corner: Coord<i16>) -> Self {
        Self {
            sw_corner_center: Coord {
                x: C::from(sw_corner.x),
                y: C::from(sw_corner.y),
            },
            resolution: 3,
            dimensions: (1201, 1201),
            samples: SampleStore::Tombstone,
        }
    }

    /// Returns the number of samples in this tile.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        let (x, y) = self.dimensions;
        x * y
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.samples, SampleStore::Tombstone)
    }

    /// Returns this tile's resolution in arcseconds per sample.
    pub fn resolution(&self) -> u8 {
        self.resolution
    }

    /// Returns `true` if `coord` falls on one of this tile's samples.
    ///
    /// Adjacent tiles share their edge rows, so an edge coordinate is
    /// covered by both.
    pub fn covers(&self, coord: Coord<C>) -> bool {
        let (idx_x, idx_y) = self.coord_to_xy(coord);
        #[allow(clippy::cast_possible_wrap)]
        let inside = 0 <= idx_x
            && idx_x < self.dimensions.0 as isize
            && 0 <= idx_y
            && idx_y < self.dimensions.1 as isize;
        inside
    }

    /// Returns the sample at the given geo coordinates, or `None` if
    /// the coordinate is outside the tile or the sample is a void.
    pub fn get(&self, coord: Coord<C>) -> Option<i16> {
        if !self.covers(coord) {
            return None;
        }
        let (idx_x, idx_y) = self.coord_to_xy(coord);
        #[allow(clippy::cast_sign_loss)]
        let sample = self.get_xy((idx_x as usize, idx_y as usize));
        (sample != VOID).then_some(sample)
    }
}

/// Private API
impl Tile {
    fn get_xy(&self, xy: (usize, usize)) -> i16 {
        self.samples.get_unchecked(self.xy_to_linear_index(xy))
    }

    fn coord_to_xy(&self, coord: Coord<C>) -> (isize, isize) {
        let c = ARCSEC_PER_DEG / C::from(self.resolution);
        // Round to the nearest sample center.
        let half = 1. / (c * 2.);
        #[allow(clippy::cast_possible_truncation)]
        let x = ((coord.x - self.sw_corner_center.x + half) * c).floor() as isize;
        #[allow(clippy::cast_possible_truncation)]
        let y = ((coord.y - self.sw_corner_center.y + half) * c).floor() as isize;
        (x, y)
    }

    /// Rows are stored north to south.
    fn xy_to_linear_index(&self, (x, y): (usize, usize)) -> usize {
        self.dimensions.0 * (self.dimensions.1 - y - 1) + x
    }
}

fn extract_resolution<P: AsRef<Path>>(path: P) -> Result<(u8, (usize, usize)), DemError> {
    const RES_1_ARCSECOND_LEN: u64 = 3601 * 3601 * size_of::<u16>() as u64;
    const RES_3_ARCSECOND_LEN: u64 = 1201 * 1201 * size_of::<u16>() as u64;
    match path.as_ref().metadata().map(|m| m.len())? {
        RES_1_ARCSECOND_LEN => Ok((1, (3601, 3601))),
        RES_3_ARCSECOND_LEN => Ok((3, (1201, 1201))),
        invalid_len => Err(DemError::HgtLen(invalid_len, path.as_ref().to_owned())),
    }
}

fn sw_corner_center<P: AsRef<Path>>(path: P) -> Result<Coord<C>, DemError> {
    let Coord { x, y } = parse_sw_corner(path)?;
    Ok(Coord {
        x: C::from(x),
        y: C::from(y),
    })
}

pub(crate) fn parse_sw_corner<P: AsRef<Path>>(path: P) -> Result<Coord<i16>, DemError> {
    let mk_err = || DemError::HgtName(path.as_ref().to_owned());
    let name = path
        .as_ref()
        .file_stem()
        .and_then(std::ffi::OsStr::to_str)
        .ok_or_else(mk_err)?;
    if name.len() != 7 {
        return Err(mk_err());
    }
    let lat_sign = match &name[0..1] {
        "N" | "n" => 1,
        "S" | "s" => -1,
        _ => return Err(mk_err()),
    };
    let lat = lat_sign * name[1..3].parse::<i16>().map_err(|_| mk_err())?;
    let lon_sign = match &name[3..4] {
        "E" | "e" => 1,
        "W" | "w" => -1,
        _ => return Err(mk_err()),
    };
    let lon = lon_sign * name[4..7].parse::<i16>().map_err(|_| mk_err())?;
    Ok(Coord { x: lon, y: lat })
}

/// Writes a synthetic 3-arcsecond tile where every sample is
/// `f(col, row)`, row 0 being the southern edge.
#[cfg(test)]
pub(crate) fn write_test_tile<F>(path: &Path, f: F)
where
    F: Fn(usize, usize) -> i16,
{
    use byteorder::WriteBytesExt;
    use std::io::{BufWriter, Write};

    let mut wtr = BufWriter::new(File::create(path).unwrap());
    for row in (0..1201).rev() {
        for col in 0..1201 {
            wtr.write_i16::<BE>(f(col, row)).unwrap();
        }
    }
    wtr.flush().unwrap();
}
