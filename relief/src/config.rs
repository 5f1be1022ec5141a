//! Run configuration.
//!
//! [`Config`] is plain data with defaults and (de)serializes to JSON.
//! Profiles check their own fields when constructed; everything that
//! depends on more than one field is checked by [`Config::validate`],
//! which is the only way to obtain the [`ValidatedConfig`] a run
//! needs.

use crate::{inlay, ReliefError};
use serde::{Deserialize, Serialize};
use std::{ops::Deref, path::PathBuf};

fn non_negative(name: &'static str, value: f64) -> Result<f64, ReliefError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ReliefError::InvalidParameter {
            name,
            value,
            reason: "must be a non-negative number",
        })
    }
}

fn positive(name: &'static str, value: f64) -> Result<f64, ReliefError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ReliefError::InvalidParameter {
            name,
            value,
            reason: "must be positive",
        })
    }
}

/// Trapezoidal channel carved into the base along the track (mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GrooveFields")]
pub struct GrooveProfile {
    width: f64,
    depth: f64,
    chamfer: f64,
}

impl GrooveProfile {
    pub fn new(width: f64, depth: f64, chamfer: f64) -> Result<Self, ReliefError> {
        let width = positive("groove.width", width)?;
        let depth = positive("groove.depth", depth)?;
        let chamfer = non_negative("groove.chamfer", chamfer)?;
        if 2.0 * chamfer >= width {
            return Err(ReliefError::InvalidParameter {
                name: "groove.chamfer",
                value: chamfer,
                reason: "leaves no groove floor",
            });
        }
        Ok(Self {
            width,
            depth,
            chamfer,
        })
    }

    /// Width at the surface.
    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn depth(&self) -> f64 {
        self.depth
    }

    /// Per-side narrowing from the surface to the floor.
    pub fn chamfer(&self) -> f64 {
        self.chamfer
    }

    /// Returns this profile with every dimension multiplied by
    /// `factor`.
    pub fn scaled(&self, factor: f64) -> Result<Self, ReliefError> {
        Self::new(
            self.width * factor,
            self.depth * factor,
            self.chamfer * factor,
        )
    }
}

impl Default for GrooveProfile {
    fn default() -> Self {
        Self {
            width: 2.6,
            depth: 1.6,
            chamfer: 0.4,
        }
    }
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct GrooveFields {
    width: f64,
    depth: f64,
    chamfer: f64,
}

impl Default for GrooveFields {
    fn default() -> Self {
        let GrooveProfile {
            width,
            depth,
            chamfer,
        } = GrooveProfile::default();
        Self {
            width,
            depth,
            chamfer,
        }
    }
}

impl TryFrom<GrooveFields> for GrooveProfile {
    type Error = ReliefError;

    fn try_from(fields: GrooveFields) -> Result<Self, Self::Error> {
        Self::new(fields.width, fields.depth, fields.chamfer)
    }
}

/// The printed track that seats into the groove (mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "InlayFields")]
pub struct InlayProfile {
    clearance: f64,
    relief: f64,
    top_radius: f64,
}

impl InlayProfile {
    pub fn new(clearance: f64, relief: f64, top_radius: f64) -> Result<Self, ReliefError> {
        Ok(Self {
            clearance: non_negative("inlay.clearance", clearance)?,
            relief: non_negative("inlay.relief", relief)?,
            top_radius: non_negative("inlay.top_radius", top_radius)?,
        })
    }

    /// Gap left between every lateral face of the inlay and the
    /// groove.
    pub fn clearance(&self) -> f64 {
        self.clearance
    }

    /// Height of the inlay top above the base surface once seated.
    pub fn relief(&self) -> f64 {
        self.relief
    }

    pub fn top_radius(&self) -> f64 {
        self.top_radius
    }

    #[must_use]
    fn with_clearance(self, clearance: f64) -> Self {
        Self { clearance, ..self }
    }
}

impl Default for InlayProfile {
    fn default() -> Self {
        Self {
            clearance: 0.20,
            relief: 0.6,
            top_radius: 0.8,
        }
    }
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct InlayFields {
    clearance: f64,
    relief: f64,
    top_radius: f64,
}

impl Default for InlayFields {
    fn default() -> Self {
        let InlayProfile {
            clearance,
            relief,
            top_radius,
        } = InlayProfile::default();
        Self {
            clearance,
            relief,
            top_radius,
        }
    }
}

impl TryFrom<InlayFields> for InlayProfile {
    type Error = ReliefError;

    fn try_from(fields: InlayFields) -> Result<Self, Self::Error> {
        Self::new(fields.clearance, fields.relief, fields.top_radius)
    }
}

/// Border ring the finished base is dropped into (mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrameFields")]
pub struct FrameProfile {
    recess: f64,
    lead_in: f64,
    finger_notch_radius: f64,
    rim: f64,
}

impl FrameProfile {
    pub fn new(
        recess: f64,
        lead_in: f64,
        finger_notch_radius: f64,
        rim: f64,
    ) -> Result<Self, ReliefError> {
        Ok(Self {
            recess: non_negative("frame.recess", recess)?,
            lead_in: non_negative("frame.lead_in", lead_in)?,
            finger_notch_radius: non_negative("frame.finger_notch_radius", finger_notch_radius)?,
            rim: non_negative("frame.rim", rim)?,
        })
    }

    /// Depth of the seat below the frame top.
    pub fn recess(&self) -> f64 {
        self.recess
    }

    /// Width of the chamfer at the seat's inner edge.
    pub fn lead_in(&self) -> f64 {
        self.lead_in
    }

    /// Radius of the finger notches; zero disables them.
    pub fn finger_notch_radius(&self) -> f64 {
        self.finger_notch_radius
    }

    /// Width of the ring between the outer and inner boundary.
    pub fn rim(&self) -> f64 {
        self.rim
    }

    #[must_use]
    fn with_lead_in(self, lead_in: f64) -> Self {
        Self { lead_in, ..self }
    }
}

impl Default for FrameProfile {
    fn default() -> Self {
        Self {
            recess: 1.5,
            lead_in: 1.0,
            finger_notch_radius: 7.0,
            rim: 10.0,
        }
    }
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FrameFields {
    recess: f64,
    lead_in: f64,
    finger_notch_radius: f64,
    rim: f64,
}

impl Default for FrameFields {
    fn default() -> Self {
        let FrameProfile {
            recess,
            lead_in,
            finger_notch_radius,
            rim,
        } = FrameProfile::default();
        Self {
            recess,
            lead_in,
            finger_notch_radius,
            rim,
        }
    }
}

impl TryFrom<FrameFields> for FrameProfile {
    type Error = ReliefError;

    fn try_from(fields: FrameFields) -> Result<Self, Self::Error> {
        Self::new(
            fields.recess,
            fields.lead_in,
            fields.finger_notch_radius,
            fields.rim,
        )
    }
}

/// Thickness of each overlay layer above the base surface (mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayerStyle {
    pub water: f64,
    pub green: f64,
    pub detail: f64,
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            water: 0.8,
            green: 0.8,
            detail: 0.6,
        }
    }
}

/// Base lattice resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Fast,
    #[default]
    High,
    Ultra,
}

impl Quality {
    /// Target distance between lattice nodes.
    pub fn lattice_step_mm(self) -> f64 {
        match self {
            Self::Fast => 0.6,
            Self::High => 0.4,
            Self::Ultra => 0.25,
        }
    }
}

/// Printer/material combinations with known good fit tolerances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterPreset {
    /// Use the configured values as they are.
    #[default]
    Custom,
    Bambu,
    Voron,
}

impl PrinterPreset {
    /// `(inlay clearance, frame lead-in)` this preset imposes.
    pub fn fit(self) -> Option<(f64, f64)> {
        match self {
            Self::Custom => None,
            Self::Bambu => Some((0.22, 0.9)),
            Self::Voron => Some((0.28, 1.0)),
        }
    }
}

/// A native program performing mesh booleans on STL files.
///
/// `args` may contain the placeholders `{target}`, `{tool}` and
/// `{output}`, replaced by the STL paths of the solid to cut, the
/// cutting solid and the expected result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalTool {
    pub program: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "ExternalTool::default_timeout_s")]
    pub timeout_s: f64,
}

impl ExternalTool {
    fn default_timeout_s() -> f64 {
        120.0
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    /// `None` keeps every boolean in-process.
    pub tool: Option<ExternalTool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Side of the square every part is fitted into.
    pub footprint_mm: f64,

    /// Fraction of the track's extent added on each side.
    pub margin: f64,

    pub base_thickness_mm: f64,

    /// Exaggeration applied to elevation after horizontal scaling.
    pub vertical_scale: f64,

    pub quality: Quality,

    /// Distance over which terrain near the border falls to the flat
    /// rim.
    pub edge_taper_mm: f64,

    /// Arc-length step the track is resampled at.
    pub track_step_mm: f64,

    pub groove: GrooveProfile,

    pub inlay: InlayProfile,

    pub frame: FrameProfile,

    pub frame_thickness_mm: f64,

    pub layers: LayerStyle,

    /// Applied over `inlay.clearance` and `frame.lead_in` by
    /// [`Config::validate`].
    pub preset: PrinterPreset,

    /// Shrinks the footprint to `test_footprint_mm` and marks every
    /// output file name with `_test`.
    pub test_mode: bool,

    pub test_footprint_mm: f64,

    /// Also write one STL per part next to the package.
    pub export_parts: bool,

    pub backend: BackendConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            footprint_mm: 120.0,
            margin: 0.10,
            base_thickness_mm: 5.0,
            vertical_scale: 1.0,
            quality: Quality::default(),
            edge_taper_mm: 3.0,
            track_step_mm: 1.0,
            groove: GrooveProfile::default(),
            inlay: InlayProfile::default(),
            frame: FrameProfile::default(),
            frame_thickness_mm: 8.0,
            layers: LayerStyle::default(),
            preset: PrinterPreset::default(),
            test_mode: false,
            test_footprint_mm: 40.0,
            export_parts: false,
            backend: BackendConfig::default(),
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, ReliefError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ReliefError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Applies the preset and checks every cross-field constraint.
    pub fn validate(mut self) -> Result<ValidatedConfig, ReliefError> {
        positive("footprint_mm", self.footprint_mm)?;
        positive("test_footprint_mm", self.test_footprint_mm)?;
        non_negative("margin", self.margin)?;
        positive("base_thickness_mm", self.base_thickness_mm)?;
        positive("vertical_scale", self.vertical_scale)?;
        non_negative("edge_taper_mm", self.edge_taper_mm)?;
        positive("track_step_mm", self.track_step_mm)?;
        positive("frame_thickness_mm", self.frame_thickness_mm)?;
        positive("layers.water", self.layers.water)?;
        positive("layers.green", self.layers.green)?;
        positive("layers.detail", self.layers.detail)?;
        if let Some(tool) = &self.backend.tool {
            positive("backend.tool.timeout_s", tool.timeout_s)?;
        }

        if let Some((clearance, lead_in)) = self.preset.fit() {
            self.inlay = self.inlay.with_clearance(clearance);
            self.frame = self.frame.with_lead_in(lead_in);
        }

        // The inlay must fit the groove it seats in.
        inlay::section(&self.groove, &self.inlay)?;

        if self.groove.depth() >= self.base_thickness_mm {
            return Err(ReliefError::InvalidParameter {
                name: "groove.depth",
                value: self.groove.depth(),
                reason: "cuts through the base",
            });
        }

        Ok(ValidatedConfig(self))
    }
}

/// A [`Config`] that passed [`Config::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig(Config);

impl ValidatedConfig {
    /// Footprint in effect, honoring test mode.
    ///
    /// Groove, inlay and frame dimensions are absolute and do not
    /// shrink with the test footprint.
    pub fn effective_footprint_mm(&self) -> f64 {
        if self.0.test_mode {
            self.0.test_footprint_mm
        } else {
            self.0.footprint_mm
        }
    }

    pub fn into_inner(self) -> Config {
        self.0
    }
}

impl Deref for ValidatedConfig {
    type Target = Config;

    fn deref(&self) -> &Config {
        &self.0
    }
}
