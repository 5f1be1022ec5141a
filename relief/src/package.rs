//! The multi-object archive handed to the slicer.

use crate::{projector::Transform, ReliefError, C};
use geo::geometry::Coord;
use log::{debug, info, warn};
use printmesh::{inspect, stl, threemf, Solid};
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    time::Instant,
};

/// Object names in the order they appear in the package.
pub const CANONICAL_ORDER: [&str; 6] = ["base", "water", "green", "detail", "track", "frame"];

pub const UNIT: &str = "millimeter";

/// Suffix of the per-part STL file for each canonical object.
fn part_suffix(object: &str) -> Option<&'static str> {
    match object {
        "base" => Some("base_brown"),
        "water" => Some("water"),
        "green" => Some("green"),
        "detail" => Some("detail"),
        "track" => Some("track_inlay_red"),
        "frame" => Some("frame"),
        _ => None,
    }
}

/// Where a run's files go.
///
/// `base` is a path without extension; file names are built by
/// appending to its last component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputPaths {
    base: PathBuf,
    test_mode: bool,
}

impl OutputPaths {
    pub fn new(base: impl Into<PathBuf>, test_mode: bool) -> Self {
        Self {
            base: base.into(),
            test_mode,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// `{base}.3mf`, or `{base}_test.3mf` in test mode.
    pub fn package(&self) -> PathBuf {
        self.with_suffix("", "3mf")
    }

    /// `{base}_{suffix}.stl` for a canonical object, with `_test`
    /// before the extension in test mode.
    pub fn part(&self, object: &str) -> Option<PathBuf> {
        part_suffix(object).map(|suffix| self.with_suffix(&format!("_{suffix}"), "stl"))
    }

    fn with_suffix(&self, suffix: &str, extension: &str) -> PathBuf {
        let mut name = self.base.file_name().unwrap_or_default().to_os_string();
        name.push(suffix);
        if self.test_mode {
            name.push("_test");
        }
        name.push(".");
        name.push(extension);
        self.base.with_file_name(name)
    }
}

/// Validated solids in canonical order plus descriptive metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    objects: Vec<Solid>,
    metadata: Vec<(String, String)>,
}

impl Package {
    /// Orders `solids` canonically and checks every one is printable.
    ///
    /// Fails on the first solid that is unnamed, duplicated, empty, or
    /// not a closed consistently oriented 2-manifold.
    pub fn assemble(solids: Vec<Solid>, transform: &Transform) -> Result<Self, ReliefError> {
        let mut objects = solids;
        for (idx, solid) in objects.iter().enumerate() {
            let reject = |reason: &str| ReliefError::Packaging {
                object: solid.name.clone(),
                reason: reason.to_string(),
            };
            if !CANONICAL_ORDER.contains(&solid.name.as_str()) {
                return Err(reject("not a package object"));
            }
            if objects[..idx].iter().any(|other| other.name == solid.name) {
                return Err(reject("appears twice"));
            }
            if solid.is_empty() {
                return Err(reject("has no faces"));
            }
            if let Some(defect) = inspect(solid).defect() {
                return Err(reject(&defect));
            }
        }
        objects.sort_by_key(|solid| CANONICAL_ORDER.iter().position(|name| *name == solid.name));

        let footprint = transform.footprint_mm();
        let center = transform.to_geo(Coord {
            x: footprint / 2.0,
            y: footprint / 2.0,
        });
        let metadata = vec![
            ("Application".to_string(), env!("CARGO_PKG_NAME").to_string()),
            ("scale_mm_per_m".to_string(), format!("{:.9}", transform.scale_mm_per_m())),
            ("footprint_mm".to_string(), format!("{footprint}")),
            ("center_lon".to_string(), format!("{:.7}", center.x)),
            ("center_lat".to_string(), format!("{:.7}", center.y)),
        ];
        Ok(Self { objects, metadata })
    }

    pub fn objects(&self) -> &[Solid] {
        &self.objects
    }

    pub fn object(&self, name: &str) -> Option<&Solid> {
        self.objects.iter().find(|solid| solid.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.objects.iter().map(|solid| solid.name.as_str()).collect()
    }

    pub fn metadata(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Millimeters per ground meter the package was built at.
    pub fn scale_mm_per_m(&self) -> Option<C> {
        self.metadata("scale_mm_per_m")?.parse().ok()
    }

    /// Writes the package, and one STL per object if `export_parts`.
    ///
    /// Every file is first written beside its target and only renamed
    /// into place once all of them were written. Parts are renamed
    /// before the package, so a failure leaves no package and no staged
    /// files behind. Returns the written paths, package first.
    pub fn write(&self, paths: &OutputPaths, export_parts: bool) -> Result<Vec<PathBuf>, ReliefError> {
        let now = Instant::now();
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
        if let Err(e) = self.stage(paths, export_parts, &mut staged) {
            discard(&staged);
            return Err(e);
        }
        staged.rotate_left(1);
        let mut written = Vec::with_capacity(staged.len());
        for (k, (tmp, target)) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(tmp, target) {
                discard(&staged[k..]);
                return Err(e.into());
            }
            written.push(target.clone());
        }
        written.rotate_right(1);
        debug!(
            "package written; files: {}, exec: {:?}",
            written.len(),
            now.elapsed()
        );
        info!("wrote {:?}", paths.package());
        Ok(written)
    }
}

/// Private API
impl Package {
    fn stage(
        &self,
        paths: &OutputPaths,
        export_parts: bool,
        staged: &mut Vec<(PathBuf, PathBuf)>,
    ) -> Result<(), ReliefError> {
        let target = paths.package();
        let tmp = staging_path(&target);
        staged.push((tmp.clone(), target));
        let metadata: Vec<(&str, String)> = self
            .metadata
            .iter()
            .map(|(key, value)| (key.as_str(), value.clone()))
            .collect();
        let objects: Vec<&Solid> = self.objects.iter().collect();
        threemf::write_3mf(BufWriter::new(File::create(&tmp)?), UNIT, &metadata, &objects)?;

        if export_parts {
            for solid in &self.objects {
                if let Some(target) = paths.part(&solid.name) {
                    let tmp = staging_path(&target);
                    staged.push((tmp.clone(), target));
                    stl::save_stl(solid, &tmp)?;
                }
            }
        }
        Ok(())
    }
}

/// Removes the staged files of `staged`.
fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (tmp, _) in staged {
        if let Err(cleanup) = fs::remove_file(tmp) {
            warn!("leaving {tmp:?}: {cleanup}");
        }
    }
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Loads a package written by [`Package::write`].
pub fn read_package<P: AsRef<Path>>(path: P) -> Result<Package, ReliefError> {
    let model = threemf::read_3mf(File::open(path)?)?;
    if model.unit != UNIT {
        return Err(ReliefError::Packaging {
            object: String::new(),
            reason: format!("unit is '{}', not {UNIT}", model.unit),
        });
    }
    Ok(Package {
        objects: model.objects,
        metadata: model.metadata,
    })
}
