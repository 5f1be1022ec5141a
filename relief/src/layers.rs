//! Thin colored overlays draped on the base.
//!
//! Layers are claimed in a fixed order, water then green then detail;
//! each one only keeps the area no earlier layer took, so no two
//! overlays overlap in plan.

use crate::{
    config::LayerStyle, drape::drape, lattice::HeightLattice, projector::Transform, ReliefError, C,
};
use geo::{
    geometry::{Coord, LineString, MultiLineString, MultiPolygon, Polygon, Rect},
    Area, BooleanOps, MapCoords,
};
use log::{debug, info};
use printmesh::{Rgba, Solid};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, f64::consts::TAU, time::Instant};

/// Regions smaller than this are treated as empty (mm²).
const MIN_AREA: C = 1e-6;

/// Sides of the polygon standing in for a round stroke joint.
const JOINT_SEGMENTS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Water,
    Green,
    Detail,
}

impl LayerKind {
    /// Claim order.
    pub const ALL: [Self; 3] = [Self::Water, Self::Green, Self::Detail];

    pub fn name(self) -> &'static str {
        match self {
            Self::Water => "water",
            Self::Green => "green",
            Self::Detail => "detail",
        }
    }

    pub fn color(self) -> Rgba {
        match self {
            Self::Water => Rgba::opaque(50, 120, 255),
            Self::Green => Rgba::opaque(40, 180, 80),
            Self::Detail => Rgba::opaque(230, 220, 200),
        }
    }

    /// Half width of the band a line feature becomes (mm).
    pub fn stroke_mm(self) -> C {
        match self {
            Self::Water => 1.4,
            Self::Green => 1.8,
            Self::Detail => 0.45,
        }
    }

    fn thickness(self, style: &LayerStyle) -> C {
        match self {
            Self::Water => style.water,
            Self::Green => style.green,
            Self::Detail => style.detail,
        }
    }
}

/// Geographic features of one layer (longitude as `x`, latitude as
/// `y`).
#[derive(Debug, Clone, PartialEq)]
pub struct LayerFeatures {
    pub areas: MultiPolygon<C>,

    /// Drawn as bands [`LayerKind::stroke_mm`] wide on each side.
    pub lines: MultiLineString<C>,
}

/// Supplies polygon layers for a geographic area.
pub trait LayerSource {
    /// Features of `kind` around `bounds`; `None` if there are none.
    fn features(&self, kind: LayerKind, bounds: Rect<C>) -> Result<Option<LayerFeatures>, ReliefError>;
}

/// In-memory [`LayerSource`].
#[derive(Debug, Clone, Default)]
pub struct LayerSet {
    layers: HashMap<LayerKind, LayerFeatures>,
}

impl LayerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: LayerKind, features: LayerFeatures) {
        self.layers.insert(kind, features);
    }
}

impl LayerSource for LayerSet {
    fn features(&self, kind: LayerKind, _bounds: Rect<C>) -> Result<Option<LayerFeatures>, ReliefError> {
        Ok(self.layers.get(&kind).cloned())
    }
}

/// A classified, draped overlay.
#[derive(Debug, Clone)]
pub struct Layer {
    pub kind: LayerKind,

    /// Plan-view area in millimeters.
    pub region: MultiPolygon<C>,

    pub solid: Solid,
}

pub struct LayerClassifier<'a> {
    transform: &'a Transform,
    lattice: &'a HeightLattice,
    style: LayerStyle,
    reserved: MultiPolygon<C>,
}

impl<'a> LayerClassifier<'a> {
    pub fn new(transform: &'a Transform, lattice: &'a HeightLattice, style: LayerStyle) -> Self {
        Self {
            transform,
            lattice,
            style,
            reserved: MultiPolygon(vec![]),
        }
    }

    /// Keeps every layer off `region` (mm), such as the groove.
    pub fn reserve(mut self, region: MultiPolygon<C>) -> Self {
        self.reserved = region;
        self
    }

    /// Builds the non-empty layers in claim order.
    ///
    /// A layer the source has nothing for, or every layer when there is
    /// no source, is filled with a few procedural strokes so
    /// multi-material prints still get every color.
    pub fn classify(&self, source: Option<&dyn LayerSource>) -> Result<Vec<Layer>, ReliefError> {
        let footprint = self.transform.footprint_mm();
        let bounds = self.transform.footprint_geo();
        let clip = MultiPolygon(vec![Rect::new(
            Coord { x: 0.0, y: 0.0 },
            Coord {
                x: footprint,
                y: footprint,
            },
        )
        .to_polygon()]);

        let mut claimed = self.reserved.clone();
        let mut layers = Vec::new();
        for kind in LayerKind::ALL {
            let now = Instant::now();
            let wanted = match source {
                Some(source) => match source.features(kind, bounds)? {
                    Some(features) => self.to_mm(kind, &features),
                    None => procedural(kind, footprint),
                },
                None => procedural(kind, footprint),
            };
            let region = wanted.intersection(&clip).difference(&claimed);
            if region.unsigned_area() < MIN_AREA {
                debug!("layer {} is empty", kind.name());
                continue;
            }
            claimed = claimed.union(&region);
            let solid = drape(
                &region,
                self.lattice,
                kind.thickness(&self.style),
                kind.name(),
                kind.color(),
            )?;
            debug!(
                "layer; name: {}, area: {:.1}, faces: {}, exec: {:?}",
                kind.name(),
                region.unsigned_area(),
                solid.faces.len(),
                now.elapsed()
            );
            layers.push(Layer { kind, region, solid });
        }
        info!("classified {} overlay layers", layers.len());
        Ok(layers)
    }
}

/// Private API
impl<'a> LayerClassifier<'a> {
    fn to_mm(&self, kind: LayerKind, features: &LayerFeatures) -> MultiPolygon<C> {
        let transform = self.transform;
        let areas = features.areas.map_coords(|c| transform.to_mm(c));
        features
            .lines
            .iter()
            .map(|line| line.map_coords(|c| transform.to_mm(c)))
            .fold(areas, |acc, line| acc.union(&stroke(&line, kind.stroke_mm())))
    }
}

/// Stand-in strokes laid out relative to the footprint.
fn procedural(kind: LayerKind, footprint: C) -> MultiPolygon<C> {
    let at = |x: C, y: C| Coord {
        x: x * footprint,
        y: y * footprint,
    };
    let lines: Vec<LineString<C>> = match kind {
        LayerKind::Water => vec![vec![at(0.1, 0.5), at(0.9, 0.5)].into()],
        LayerKind::Green => vec![vec![at(0.2, 0.2), at(0.4, 0.35), at(0.25, 0.6)].into()],
        LayerKind::Detail => (1..6)
            .map(|i| {
                let y = C::from(i) / 6.0;
                let wobble = 2.0 * C::from(i).sin();
                let end = at(0.92, y);
                vec![
                    at(0.08, y),
                    Coord {
                        x: end.x,
                        y: end.y + wobble,
                    },
                ]
                .into()
            })
            .collect(),
    };
    lines
        .iter()
        .fold(MultiPolygon(vec![]), |acc, line| acc.union(&stroke(line, kind.stroke_mm())))
}

/// Area within `half_width` of `line`, with polygonal joints and caps.
pub fn stroke(line: &LineString<C>, half_width: C) -> MultiPolygon<C> {
    let mut band = MultiPolygon(vec![]);
    if half_width <= 0.0 {
        return band;
    }
    for segment in line.lines() {
        let d = segment.delta();
        let len = d.x.hypot(d.y);
        if len <= C::EPSILON {
            continue;
        }
        let n = Coord {
            x: -d.y / len * half_width,
            y: d.x / len * half_width,
        };
        let quad = Polygon::new(
            vec![
                segment.start - n,
                segment.end - n,
                segment.end + n,
                segment.start + n,
                segment.start - n,
            ]
            .into(),
            vec![],
        );
        band = band.union(&MultiPolygon(vec![quad]));
    }
    for joint in line.coords() {
        let ring: LineString<C> = (0..=JOINT_SEGMENTS)
            .map(|k| {
                #[allow(clippy::cast_precision_loss)]
                let angle = TAU * (k % JOINT_SEGMENTS) as C / JOINT_SEGMENTS as C;
                Coord {
                    x: joint.x + half_width * angle.cos(),
                    y: joint.y + half_width * angle.sin(),
                }
            })
            .collect();
        band = band.union(&MultiPolygon(vec![Polygon::new(ring, vec![])]));
    }
    band
}

#[cfg(test)]
mod tests {
    use super::{stroke, LayerClassifier, LayerFeatures, LayerKind, LayerSet};
    use crate::{config::LayerStyle, lattice::HeightLattice, projector::CoordinateProjector};
    use approx::assert_abs_diff_eq;
    use geo::{
        geometry::{Coord, LineString, MultiLineString, MultiPolygon, Rect},
        polygon, Area, BooleanOps,
    };
    use printmesh::inspect;

    fn setup() -> (crate::projector::Transform, HeightLattice) {
        let bbox = Rect::new(Coord { x: 8.0, y: 46.0 }, Coord { x: 8.1, y: 46.1 });
        let transform = CoordinateProjector::project(bbox, 0.0, 60.0).unwrap();
        let lattice = HeightLattice::from_fn(60.0, 60, |x, y| 2.0 + 0.05 * x - 0.02 * y);
        (transform, lattice)
    }

    #[test]
    fn test_stroke_area() {
        let line: LineString<f64> = vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 0.0 }].into();
        let band = stroke(&line, 1.0);
        // A 10 x 2 rectangle plus two dodecagon halves.
        let joints = 3.0;
        assert_abs_diff_eq!(band.unsigned_area(), 20.0 + joints, epsilon = 1e-9);
    }

    #[test]
    fn test_procedural_layers_do_not_overlap() {
        let (transform, lattice) = setup();
        let layers = LayerClassifier::new(&transform, &lattice, LayerStyle::default())
            .classify(None)
            .unwrap();
        let kinds: Vec<_> = layers.iter().map(|l| l.kind).collect();
        assert_eq!(kinds, LayerKind::ALL);

        for (i, a) in layers.iter().enumerate() {
            assert!(inspect(&a.solid).is_printable(), "{}", a.kind.name());
            let bounds = a.solid.bounds().unwrap();
            assert!(bounds.min.x >= 0.0 && bounds.max.x <= 60.0);
            assert!(bounds.min.y >= 0.0 && bounds.max.y <= 60.0);
            for b in &layers[i + 1..] {
                let shared = a.region.intersection(&b.region).unsigned_area();
                assert!(shared < 1e-6, "{} and {} share {shared}", a.kind.name(), b.kind.name());
            }
        }
    }

    #[test]
    fn test_source_layers() {
        let (transform, lattice) = setup();
        let mut source = LayerSet::new();
        // A lake filling the south-west quarter.
        let lake = polygon![
            (x: 8.0, y: 46.0),
            (x: 8.05, y: 46.0),
            (x: 8.05, y: 46.05),
            (x: 8.0, y: 46.05),
        ];
        source.insert(
            LayerKind::Water,
            LayerFeatures {
                areas: MultiPolygon(vec![lake]),
                lines: MultiLineString(vec![]),
            },
        );
        // A park overlapping the lake; it keeps only the dry part.
        let park = polygon![
            (x: 8.025, y: 46.025),
            (x: 8.075, y: 46.025),
            (x: 8.075, y: 46.075),
            (x: 8.025, y: 46.075),
        ];
        source.insert(
            LayerKind::Green,
            LayerFeatures {
                areas: MultiPolygon(vec![park]),
                lines: MultiLineString(vec![]),
            },
        );

        let layers = LayerClassifier::new(&transform, &lattice, LayerStyle::default())
            .classify(Some(&source))
            .unwrap();
        // Detail has no data and falls back to procedural strokes.
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[2].kind, LayerKind::Detail);
        let water = layers[0].region.unsigned_area();
        let green = layers[1].region.unsigned_area();
        // The bbox is taller than wide in meters, so the quarters are
        // close to but not exactly a quarter of the square.
        assert!(water > 0.0 && green > 0.0);
        assert_abs_diff_eq!(green, water * 0.75, epsilon = water * 1e-6);
        assert_eq!(layers[1].solid.name, "green");
    }

    #[test]
    fn test_partial_source_keeps_every_color() {
        let (transform, lattice) = setup();
        let mut source = LayerSet::new();
        source.insert(
            LayerKind::Water,
            LayerFeatures {
                areas: MultiPolygon(vec![]),
                lines: MultiLineString(vec![LineString::from(vec![(8.005, 46.005), (8.095, 46.095)])]),
            },
        );
        let layers = LayerClassifier::new(&transform, &lattice, LayerStyle::default())
            .classify(Some(&source))
            .unwrap();
        let kinds: Vec<_> = layers.iter().map(|l| l.kind).collect();
        assert_eq!(kinds, LayerKind::ALL);
        // Water is the diagonal river, not the procedural band.
        let river = &layers[0].region;
        let band = stroke(
            &LineString::from(vec![(6.0, 30.0), (54.0, 30.0)]),
            LayerKind::Water.stroke_mm(),
        );
        assert!(river.unsigned_area() > band.unsigned_area());
    }

    #[test]
    fn test_reserved_region_stays_clear() {
        let (transform, lattice) = setup();
        // A groove strip across every procedural band.
        let strip = stroke(&LineString::from(vec![(30.0, 2.0), (30.0, 58.0)]), 2.0);
        let layers = LayerClassifier::new(&transform, &lattice, LayerStyle::default())
            .reserve(strip.clone())
            .classify(None)
            .unwrap();
        assert!(!layers.is_empty());
        for layer in &layers {
            let shared = layer.region.intersection(&strip).unsigned_area();
            assert!(shared < 1e-6, "{} covers {shared} of the strip", layer.kind.name());
            assert!(inspect(&layer.solid).is_printable(), "{}", layer.kind.name());
        }
    }
}
