//! Track points from GPX files.

use anyhow::{anyhow, Context, Error as AnyError};
use geo::geometry::Coord;
use quick_xml::{events::Event, Reader};
use std::{fs, path::Path};

/// Returns every track point, followed by route points if the file
/// has no track, as (longitude, latitude).
pub fn read_track<P: AsRef<Path>>(path: P) -> Result<Vec<Coord<f64>>, AnyError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
    parse(&content).with_context(|| format!("parsing {path:?}"))
}

fn parse(content: &str) -> Result<Vec<Coord<f64>>, AnyError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut track = Vec::new();
    let mut route = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let points = match e.local_name().as_ref() {
                    b"trkpt" => &mut track,
                    b"rtept" => &mut route,
                    _ => continue,
                };
                let (mut lat, mut lon) = (None, None);
                for attr in e.attributes() {
                    let attr = attr?;
                    let value: f64 = attr.unescape_value()?.trim().parse()?;
                    match attr.key.local_name().as_ref() {
                        b"lat" => lat = Some(value),
                        b"lon" => lon = Some(value),
                        _ => (),
                    }
                }
                match (lon, lat) {
                    (Some(x), Some(y)) => points.push(Coord { x, y }),
                    _ => return Err(anyhow!("point without lat/lon")),
                }
            }
            Event::Eof => break,
            _ => (),
        }
    }

    let points = if track.is_empty() { route } else { track };
    if points.len() < 2 {
        return Err(anyhow!("found {} points, need at least 2", points.len()));
    }
    Ok(points)
}
