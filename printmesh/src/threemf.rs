//! Multi-object 3MF archives.
//!
//! Every solid becomes its own `<object>` carrying the solid's name.
//! Colors travel as one `<basematerials>` group referenced per object,
//! which slicers treat as a hint for filament assignment.

use crate::{MeshError, Rgba, Solid};
use log::debug;
use nalgebra::Point3;
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};
use std::{
    collections::HashMap,
    fmt::Display,
    io::{Cursor, Read, Seek, Write},
};
use zip::{write::SimpleFileOptions, ZipArchive, ZipWriter};

/// 3MF core namespace.
pub const NAMESPACE_3MF: &str = "http://schemas.microsoft.com/3dmanufacturing/core/2015/02";

const MODEL_PATH: &str = "3D/3dmodel.model";

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="model" ContentType="application/vnd.ms-package.3dmanufacturing-3dmodel+xml"/>
</Types>"#;

const RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Target="/3D/3dmodel.model" Id="rel0" Type="http://schemas.microsoft.com/3dmanufacturing/2013/01/3dmodel"/>
</Relationships>"#;

/// Contents of a 3MF archive as read back by [`read_3mf`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Model {
    /// Value of the model's `unit` attribute.
    pub unit: String,

    /// `<metadata name="..">value</metadata>` pairs in file order.
    pub metadata: Vec<(String, String)>,

    /// Objects in file order.
    pub objects: Vec<Solid>,
}

impl Model {
    pub fn object(&self, name: &str) -> Option<&Solid> {
        self.objects.iter().find(|solid| solid.name == name)
    }

    pub fn metadata(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Writes `objects` into a 3MF archive, one build item per object.
pub fn write_3mf<W: Write + Seek>(
    wtr: W,
    unit: &str,
    metadata: &[(&str, String)],
    objects: &[&Solid],
) -> Result<(), MeshError> {
    let model_xml = model_xml(unit, metadata, objects)?;

    let mut zip = ZipWriter::new(wtr);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(CONTENT_TYPES_XML.as_bytes())?;
    zip.start_file("_rels/.rels", options)?;
    zip.write_all(RELS_XML.as_bytes())?;
    zip.start_file(MODEL_PATH, options)?;
    zip.write_all(&model_xml)?;
    zip.finish()?;
    debug!(
        "3mf written; objects: {}, model bytes: {}",
        objects.len(),
        model_xml.len()
    );
    Ok(())
}

/// Reads every mesh object, its name and color, back out of a 3MF
/// archive.
pub fn read_3mf<R: Read + Seek>(rdr: R) -> Result<Model, MeshError> {
    let mut archive = ZipArchive::new(rdr)?;
    let mut content = String::new();
    archive.by_name(MODEL_PATH)?.read_to_string(&mut content)?;
    parse_model(&content)
}

fn xml_err<E: Display>(e: E) -> MeshError {
    MeshError::invalid_content(format!("XML: {e}"))
}

fn model_xml(
    unit: &str,
    metadata: &[(&str, String)],
    objects: &[&Solid],
) -> Result<Vec<u8>, MeshError> {
    const MATERIALS_ID: usize = 1;

    let mut buffer = Vec::new();
    let mut wtr = Writer::new_with_indent(Cursor::new(&mut buffer), b' ', 1);
    wtr.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;

    let mut model = BytesStart::new("model");
    model.push_attribute(("unit", unit));
    model.push_attribute(("xml:lang", "en-US"));
    model.push_attribute(("xmlns", NAMESPACE_3MF));
    wtr.write_event(Event::Start(model)).map_err(xml_err)?;

    for (name, value) in metadata {
        let mut element = BytesStart::new("metadata");
        element.push_attribute(("name", *name));
        wtr.write_event(Event::Start(element)).map_err(xml_err)?;
        wtr.write_event(Event::Text(BytesText::new(value)))
            .map_err(xml_err)?;
        wtr.write_event(Event::End(BytesEnd::new("metadata")))
            .map_err(xml_err)?;
    }

    wtr.write_event(Event::Start(BytesStart::new("resources")))
        .map_err(xml_err)?;

    let mut materials = BytesStart::new("basematerials");
    materials.push_attribute(("id", MATERIALS_ID.to_string().as_str()));
    wtr.write_event(Event::Start(materials)).map_err(xml_err)?;
    for solid in objects {
        let mut base = BytesStart::new("base");
        base.push_attribute(("name", solid.name.as_str()));
        base.push_attribute(("displaycolor", solid.color.to_hex().as_str()));
        wtr.write_event(Event::Empty(base)).map_err(xml_err)?;
    }
    wtr.write_event(Event::End(BytesEnd::new("basematerials")))
        .map_err(xml_err)?;

    for (pindex, solid) in objects.iter().enumerate() {
        let id = (MATERIALS_ID + 1 + pindex).to_string();
        let mut object = BytesStart::new("object");
        object.push_attribute(("id", id.as_str()));
        object.push_attribute(("name", solid.name.as_str()));
        object.push_attribute(("type", "model"));
        object.push_attribute(("pid", MATERIALS_ID.to_string().as_str()));
        object.push_attribute(("pindex", pindex.to_string().as_str()));
        wtr.write_event(Event::Start(object)).map_err(xml_err)?;
        wtr.write_event(Event::Start(BytesStart::new("mesh")))
            .map_err(xml_err)?;

        wtr.write_event(Event::Start(BytesStart::new("vertices")))
            .map_err(xml_err)?;
        for vertex in &solid.vertices {
            let mut element = BytesStart::new("vertex");
            element.push_attribute(("x", vertex.x.to_string().as_str()));
            element.push_attribute(("y", vertex.y.to_string().as_str()));
            element.push_attribute(("z", vertex.z.to_string().as_str()));
            wtr.write_event(Event::Empty(element)).map_err(xml_err)?;
        }
        wtr.write_event(Event::End(BytesEnd::new("vertices")))
            .map_err(xml_err)?;

        wtr.write_event(Event::Start(BytesStart::new("triangles")))
            .map_err(xml_err)?;
        for (face_idx, face) in solid.faces.iter().enumerate() {
            let mut element = BytesStart::new("triangle");
            for (key, index) in ["v1", "v2", "v3"].into_iter().zip(face) {
                if *index as usize >= solid.vertices.len() {
                    return Err(MeshError::IndexOutOfRange {
                        face: face_idx,
                        index: *index,
                        len: solid.vertices.len(),
                    });
                }
                element.push_attribute((key, index.to_string().as_str()));
            }
            wtr.write_event(Event::Empty(element)).map_err(xml_err)?;
        }
        wtr.write_event(Event::End(BytesEnd::new("triangles")))
            .map_err(xml_err)?;

        wtr.write_event(Event::End(BytesEnd::new("mesh")))
            .map_err(xml_err)?;
        wtr.write_event(Event::End(BytesEnd::new("object")))
            .map_err(xml_err)?;
    }
    wtr.write_event(Event::End(BytesEnd::new("resources")))
        .map_err(xml_err)?;

    wtr.write_event(Event::Start(BytesStart::new("build")))
        .map_err(xml_err)?;
    for pindex in 0..objects.len() {
        let mut item = BytesStart::new("item");
        item.push_attribute(("objectid", (MATERIALS_ID + 1 + pindex).to_string().as_str()));
        wtr.write_event(Event::Empty(item)).map_err(xml_err)?;
    }
    wtr.write_event(Event::End(BytesEnd::new("build")))
        .map_err(xml_err)?;
    wtr.write_event(Event::End(BytesEnd::new("model")))
        .map_err(xml_err)?;

    Ok(buffer)
}

/// Collects `key="value"` pairs of an element, unescaped.
fn attributes(element: &BytesStart<'_>) -> Result<HashMap<String, String>, MeshError> {
    let mut map = HashMap::new();
    for attr in element.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn parse_attr<T: std::str::FromStr>(
    attrs: &HashMap<String, String>,
    key: &str,
    element: &str,
) -> Result<T, MeshError> {
    attrs
        .get(key)
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| MeshError::invalid_content(format!("{element} has no valid {key}")))
}

/// An object whose `</object>` has not been seen yet.
struct OpenObject {
    solid: Solid,
    material: Option<(String, usize)>,
}

fn parse_model(content: &str) -> Result<Model, MeshError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut model = Model::default();
    let mut materials: HashMap<String, Vec<Rgba>> = HashMap::new();
    let mut current_group: Option<String> = None;
    let mut current_metadata: Option<String> = None;
    let mut object: Option<OpenObject> = None;
    let mut pending: Vec<OpenObject> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Empty(ref e) if e.local_name().as_ref() == b"metadata" => {
                if let Some(name) = attributes(e)?.remove("name") {
                    model.metadata.push((name, String::new()));
                }
            }
            Event::Start(ref e) | Event::Empty(ref e) => match e.local_name().as_ref() {
                b"model" => {
                    model.unit = attributes(e)?
                        .remove("unit")
                        .unwrap_or_else(|| "millimeter".to_string());
                }
                b"metadata" => {
                    current_metadata = attributes(e)?.remove("name");
                }
                b"basematerials" => {
                    let id = attributes(e)?.remove("id").unwrap_or_default();
                    materials.entry(id.clone()).or_default();
                    current_group = Some(id);
                }
                b"base" => {
                    let attrs = attributes(e)?;
                    let color = attrs
                        .get("displaycolor")
                        .and_then(|hex| Rgba::from_hex(hex))
                        .unwrap_or_default();
                    if let Some(group) = &current_group {
                        materials.entry(group.clone()).or_default().push(color);
                    }
                }
                b"object" => {
                    let attrs = attributes(e)?;
                    let name = attrs.get("name").cloned().unwrap_or_default();
                    let material = match (attrs.get("pid"), attrs.get("pindex")) {
                        (Some(pid), Some(pindex)) => pindex.parse().ok().map(|i| (pid.clone(), i)),
                        _ => None,
                    };
                    object = Some(OpenObject {
                        solid: Solid::new(name, Rgba::default()),
                        material,
                    });
                }
                b"vertex" => {
                    let open = object
                        .as_mut()
                        .ok_or_else(|| MeshError::invalid_content("vertex outside object"))?;
                    let attrs = attributes(e)?;
                    open.solid.push_vertex(Point3::new(
                        parse_attr(&attrs, "x", "vertex")?,
                        parse_attr(&attrs, "y", "vertex")?,
                        parse_attr(&attrs, "z", "vertex")?,
                    ));
                }
                b"triangle" => {
                    let open = object
                        .as_mut()
                        .ok_or_else(|| MeshError::invalid_content("triangle outside object"))?;
                    let attrs = attributes(e)?;
                    let face: [u32; 3] = [
                        parse_attr(&attrs, "v1", "triangle")?,
                        parse_attr(&attrs, "v2", "triangle")?,
                        parse_attr(&attrs, "v3", "triangle")?,
                    ];
                    let len = open.solid.vertices.len();
                    if let Some(index) = face.iter().find(|v| **v as usize >= len) {
                        return Err(MeshError::IndexOutOfRange {
                            face: open.solid.faces.len(),
                            index: *index,
                            len,
                        });
                    }
                    open.solid.push_face(face);
                }
                _ => {}
            },
            Event::Text(text) => {
                if let Some(name) = current_metadata.take() {
                    model.metadata.push((name, text.unescape()?.into_owned()));
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"object" => pending.extend(object.take()),
                b"basematerials" => current_group = None,
                b"metadata" => {
                    // Empty element body.
                    if let Some(name) = current_metadata.take() {
                        model.metadata.push((name, String::new()));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    // Materials may be declared after the objects that use them.
    for OpenObject { mut solid, material } in pending {
        if let Some(color) = material.and_then(|(pid, pindex)| {
            materials.get(&pid).and_then(|colors| colors.get(pindex)).copied()
        }) {
            solid.color = color;
        }
        model.objects.push(solid);
    }
    Ok(model)
}
