//! Overlay features from a JSON file.
//!
//! ```json
//! {
//!   "water": { "areas": [[[8.01, 46.0], [8.02, 46.0], [8.02, 46.01]]] },
//!   "detail": { "lines": [[[8.0, 46.0], [8.03, 46.02]]] }
//! }
//! ```
//!
//! Each area is a list of rings, exterior first; points are
//! `[longitude, latitude]`.

use anyhow::{Context, Error as AnyError};
use geo::geometry::{Coord, LineString, MultiLineString, MultiPolygon, Polygon};
use relief::{LayerFeatures, LayerKind, LayerSet};
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};

type Ring = Vec<[f64; 2]>;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FeatureFile {
    areas: Vec<Vec<Ring>>,
    lines: Vec<Ring>,
}

fn line(points: &[[f64; 2]]) -> LineString<f64> {
    points.iter().map(|&[x, y]| Coord { x, y }).collect()
}

impl From<FeatureFile> for LayerFeatures {
    fn from(file: FeatureFile) -> Self {
        let areas = file
            .areas
            .iter()
            .filter_map(|rings| {
                let (exterior, interiors) = rings.split_first()?;
                Some(Polygon::new(
                    line(exterior),
                    interiors.iter().map(|ring| line(ring)).collect(),
                ))
            })
            .collect();
        let lines = file.lines.iter().map(|points| line(points)).collect();
        Self {
            areas: MultiPolygon(areas),
            lines: MultiLineString(lines),
        }
    }
}

pub fn parse(json: &str) -> Result<LayerSet, AnyError> {
    let files: HashMap<LayerKind, FeatureFile> = serde_json::from_str(json)?;
    let mut set = LayerSet::new();
    for (kind, file) in files {
        set.insert(kind, file.into());
    }
    Ok(set)
}

pub fn load<P: AsRef<Path>>(path: P) -> Result<LayerSet, AnyError> {
    let path = path.as_ref();
    let json = fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
    parse(&json).with_context(|| format!("parsing {path:?}"))
}
