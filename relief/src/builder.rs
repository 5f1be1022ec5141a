//! Which parts get built, and with which boolean engine.
//!
//! The geometry itself lives in the stage modules. A [`PartBuilder`]
//! only decides the engine and which optional parts exist, so the full
//! and fallback paths cannot drift apart.

use crate::{
    backend::{BooleanEngine, HeightfieldEngine},
    config::ValidatedConfig,
    frame::FrameBuilder,
    groove::{Carved, GrooveCarver},
    inlay::{Inlay, InlayBuilder},
    lattice::HeightLattice,
    layers::{Layer, LayerClassifier, LayerSource},
    projector::Transform,
    sweep::Stations,
    terrain::TerrainMesher,
    ReliefError,
};
use dem::ElevationGrid;
use printmesh::Solid;

pub trait PartBuilder: Send + Sync {
    fn name(&self) -> &'static str;

    fn engine(&self) -> &dyn BooleanEngine;

    fn build_base(
        &self,
        grid: &mut ElevationGrid,
        transform: &Transform,
        config: &ValidatedConfig,
    ) -> Result<(Solid, HeightLattice), ReliefError> {
        TerrainMesher::new(transform, config.base_thickness_mm)
            .lattice_step(config.quality.lattice_step_mm())
            .vertical_scale(config.vertical_scale)
            .edge_taper(config.edge_taper_mm)
            .build(grid)
    }

    fn build_groove(
        &self,
        base: &Solid,
        stations: &Stations,
        config: &ValidatedConfig,
    ) -> Result<Carved, ReliefError> {
        GrooveCarver::new(config.groove, config.inlay.relief(), self.engine()).carve(base, stations)
    }

    /// `carved` supplies the groove profile actually cut.
    fn build_inlay(
        &self,
        stations: &Stations,
        carved: &Carved,
        config: &ValidatedConfig,
    ) -> Result<Inlay, ReliefError> {
        InlayBuilder::new(carved.profile, config.inlay).build(stations)
    }

    fn build_frame(&self, config: &ValidatedConfig) -> Result<Option<Solid>, ReliefError> {
        FrameBuilder::new(
            config.effective_footprint_mm(),
            config.frame_thickness_mm,
            config.frame,
        )
        .build()
        .map(Some)
    }

    /// Overlays keep off the strip the groove was cut into.
    fn build_layers(
        &self,
        transform: &Transform,
        lattice: &HeightLattice,
        stations: &Stations,
        carved: &Carved,
        config: &ValidatedConfig,
        source: Option<&dyn LayerSource>,
    ) -> Result<Vec<Layer>, ReliefError> {
        LayerClassifier::new(transform, lattice, config.layers)
            .reserve(carved.footprint(stations, 2.0 * lattice.step()))
            .classify(source)
    }
}

/// Every part, cut with the configured engine.
pub struct FullBuilder {
    engine: Box<dyn BooleanEngine>,
}

impl FullBuilder {
    pub fn new(engine: Box<dyn BooleanEngine>) -> Self {
        Self { engine }
    }
}

impl PartBuilder for FullBuilder {
    fn name(&self) -> &'static str {
        "full"
    }

    fn engine(&self) -> &dyn BooleanEngine {
        self.engine.as_ref()
    }
}

/// Base and track only, cut in-process.
#[derive(Debug, Default)]
pub struct FallbackBuilder {
    engine: HeightfieldEngine,
}

impl PartBuilder for FallbackBuilder {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn engine(&self) -> &dyn BooleanEngine {
        &self.engine
    }

    fn build_frame(&self, _config: &ValidatedConfig) -> Result<Option<Solid>, ReliefError> {
        Ok(None)
    }

    fn build_layers(
        &self,
        _transform: &Transform,
        _lattice: &HeightLattice,
        _stations: &Stations,
        _carved: &Carved,
        _config: &ValidatedConfig,
        _source: Option<&dyn LayerSource>,
    ) -> Result<Vec<Layer>, ReliefError> {
        Ok(Vec::new())
    }
}
