//! Printable terrain relief models.
//!
//! A run turns a GPS track and elevation data into solids that print
//! separately and fit together: a terrain `base` with a groove carved
//! along the track, a `track` inlay that seats in the groove, a
//! recessed `frame`, and thin `water`/`green`/`detail` overlays. All
//! of them share one [`Transform`] and are packaged into a single 3MF
//! archive.
//!
//! [`pipeline::run`] runs the stages in order on the calling thread;
//! [`Dispatcher`] runs them in the background and reports progress
//! over a channel.

pub mod backend;
mod builder;
mod config;
mod drape;
mod error;
mod frame;
mod groove;
mod inlay;
mod lattice;
mod layers;
mod package;
pub mod pipeline;
mod projector;
mod sweep;
mod terrain;
mod track;
mod worker;

pub use crate::{
    builder::{FallbackBuilder, FullBuilder, PartBuilder},
    config::{
        BackendConfig, Config, ExternalTool, FrameProfile, GrooveProfile, InlayProfile,
        LayerStyle, PrinterPreset, Quality, ValidatedConfig,
    },
    drape::{drape, RegionMesher},
    error::ReliefError,
    frame::{FrameBuilder, FRAME_COLOR},
    groove::{Carved, GrooveCarver},
    inlay::{Inlay, InlayBuilder, TRACK_COLOR},
    lattice::HeightLattice,
    layers::{stroke, Layer, LayerClassifier, LayerFeatures, LayerKind, LayerSet, LayerSource},
    package::{read_package, OutputPaths, Package, CANONICAL_ORDER},
    pipeline::{CancelToken, RunEvent, RunRequest, RunSummary, Stage},
    projector::{CoordinateProjector, Transform},
    sweep::{sweep, Stations},
    terrain::{mesh_slab, TerrainMesher, BASE_COLOR},
    track::{Polyline3D, TrackProjector},
    worker::{Dispatcher, RunHandle},
};
pub use dem::C;
