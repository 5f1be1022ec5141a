//! STL read/write.
//!
//! Solids are written as binary STL. Both binary and ASCII STL are
//! read back; the facet soup is welded on exact `f32` positions so
//! topology survives the round trip.

use crate::{MeshError, Rgba, Solid};
use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use nalgebra::{Point3, Vector3};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

const HEADER_LEN: usize = 80;
const FACET_LEN: u64 = 50;

/// Writes `solid` as binary STL.
pub fn write_stl<W: Write>(solid: &Solid, wtr: W) -> Result<(), MeshError> {
    let mut wtr = BufWriter::new(wtr);
    let mut header = [0_u8; HEADER_LEN];
    let name = format!("printmesh {}", solid.name);
    let len = name.len().min(HEADER_LEN);
    header[..len].copy_from_slice(&name.as_bytes()[..len]);
    wtr.write_all(&header)?;

    let facets = u32::try_from(solid.faces.len())
        .map_err(|_| MeshError::invalid_content("too many faces for STL"))?;
    wtr.write_u32::<LE>(facets)?;

    for idx in 0..solid.faces.len() {
        let normal = solid
            .face_normal(idx)
            .try_normalize(f64::EPSILON)
            .unwrap_or_else(Vector3::zeros);
        for component in normal.iter() {
            #[allow(clippy::cast_possible_truncation)]
            wtr.write_f32::<LE>(*component as f32)?;
        }
        for corner in solid.triangle(idx) {
            for component in corner.coords.iter() {
                #[allow(clippy::cast_possible_truncation)]
                wtr.write_f32::<LE>(*component as f32)?;
            }
        }
        wtr.write_u16::<LE>(0)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_stl<P: AsRef<Path>>(solid: &Solid, path: P) -> Result<(), MeshError> {
    write_stl(solid, File::create(path)?)
}

/// Reads a binary or ASCII STL file into a welded solid named after
/// the file stem.
pub fn load_stl<P: AsRef<Path>>(path: P) -> Result<Solid, MeshError> {
    let path = path.as_ref();
    let mut raw = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut raw)?;
    let name = path
        .file_stem()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or_default();
    read_stl(&raw, name)
}

/// Parses STL bytes.
///
/// A buffer whose length matches its binary facet count is binary
/// even if the header happens to start with `solid`.
pub fn read_stl(raw: &[u8], name: &str) -> Result<Solid, MeshError> {
    let mut welder = Welder::new(name);
    if is_binary(raw) {
        let mut rdr = &raw[HEADER_LEN + 4..];
        while !rdr.is_empty() {
            // Stored normals are recomputed from winding.
            for _ in 0..3 {
                rdr.read_f32::<LE>()?;
            }
            let mut corners = [[0_f32; 3]; 3];
            for corner in &mut corners {
                for component in corner.iter_mut() {
                    *component = rdr.read_f32::<LE>()?;
                }
            }
            rdr.read_u16::<LE>()?;
            welder.push(corners);
        }
    } else {
        let text = std::str::from_utf8(raw)
            .map_err(|e| MeshError::invalid_content(format!("STL is neither binary nor text: {e}")))?;
        let mut corners = Vec::with_capacity(3);
        for line in text.lines() {
            let mut words = line.split_whitespace();
            match words.next() {
                Some("vertex") => {
                    let mut corner = [0_f32; 3];
                    for component in &mut corner {
                        *component = words
                            .next()
                            .and_then(|w| w.parse().ok())
                            .ok_or_else(|| MeshError::invalid_content(format!("bad vertex line {line:?}")))?;
                    }
                    corners.push(corner);
                }
                Some("endfacet") => {
                    let facet: [[f32; 3]; 3] = corners
                        .as_slice()
                        .try_into()
                        .map_err(|_| MeshError::invalid_content("facet without three vertices"))?;
                    welder.push(facet);
                    corners.clear();
                }
                _ => {}
            }
        }
    }
    Ok(welder.finish())
}

fn is_binary(raw: &[u8]) -> bool {
    if raw.len() < HEADER_LEN + 4 {
        return false;
    }
    let mut count = &raw[HEADER_LEN..HEADER_LEN + 4];
    count.read_u32::<LE>().map_or(false, |facets| {
        (HEADER_LEN as u64 + 4 + u64::from(facets) * FACET_LEN) == raw.len() as u64
    })
}

/// Merges bit-identical corner positions into shared vertices.
struct Welder {
    solid: Solid,
    index: HashMap<[u32; 3], u32>,
}

impl Welder {
    fn new(name: &str) -> Self {
        Self {
            solid: Solid::new(name, Rgba::default()),
            index: HashMap::new(),
        }
    }

    fn push(&mut self, corners: [[f32; 3]; 3]) {
        let face = corners.map(|[x, y, z]| {
            let key = [x.to_bits(), y.to_bits(), z.to_bits()];
            let solid = &mut self.solid;
            *self.index.entry(key).or_insert_with(|| {
                solid.push_vertex(Point3::new(f64::from(x), f64::from(y), f64::from(z)))
            })
        });
        self.solid.push_face(face);
    }

    fn finish(self) -> Solid {
        self.solid
    }
}
