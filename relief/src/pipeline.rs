//! One run, from track and elevation to a written package.

use crate::{
    backend,
    builder::{FallbackBuilder, FullBuilder, PartBuilder},
    config::ValidatedConfig,
    layers::LayerSource,
    package::{OutputPaths, Package},
    projector::CoordinateProjector,
    sweep::Stations,
    track::TrackProjector,
    ReliefError, C,
};
use crossbeam_channel::Sender;
use dem::ElevationSource;
use geo::{
    geometry::{Coord, LineString},
    BoundingRect,
};
use log::{debug, info, warn};
use std::{
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Terrain,
    Track,
    Groove,
    Inlay,
    Frame,
    Layers,
    Package,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Terrain => "terrain",
            Self::Track => "track",
            Self::Groove => "groove",
            Self::Inlay => "inlay",
            Self::Frame => "frame",
            Self::Layers => "layers",
            Self::Package => "package",
        };
        f.write_str(name)
    }
}

impl Stage {
    pub const COUNT: usize = 7;
}

/// Progress reported by a run, in order. Every run ends with exactly
/// one of `Finished`, `Failed` or `Cancelled`.
#[derive(Debug)]
pub enum RunEvent {
    StageFinished { stage: Stage, elapsed: Duration },

    /// The run continues without the external engine, building the
    /// base and track only.
    Degraded { reason: String },

    Finished(RunSummary),

    Failed(ReliefError),

    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub package: PathBuf,

    /// Every file written, package first.
    pub written: Vec<PathBuf>,

    /// Object names in package order.
    pub objects: Vec<String>,

    pub degraded: bool,

    /// Length of the swept track ribbon (mm).
    pub track_length_mm: C,

    /// Arc length the inlay was swept over; equal to the ribbon's.
    pub inlay_length_mm: C,

    /// Groove width actually cut, after any retry (mm).
    pub groove_width_mm: C,
}

/// Cooperative cancellation, observed between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `true` if both tokens control the same run.
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn check(&self) -> Result<(), ReliefError> {
        if self.is_cancelled() {
            Err(ReliefError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything a run needs; the worker owns it for the run's lifetime.
pub struct RunRequest {
    config: ValidatedConfig,
    track: Vec<Coord<C>>,
    elevation: Box<dyn ElevationSource + Send>,
    layers: Option<Box<dyn LayerSource + Send>>,
    output: PathBuf,
}

impl RunRequest {
    pub fn builder() -> RunRequestBuilder {
        RunRequestBuilder::default()
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn outputs(&self) -> OutputPaths {
        OutputPaths::new(&self.output, self.config.test_mode)
    }
}

#[derive(Default)]
pub struct RunRequestBuilder {
    config: Option<ValidatedConfig>,
    track: Option<Vec<Coord<C>>>,
    elevation: Option<Box<dyn ElevationSource + Send>>,
    layers: Option<Box<dyn LayerSource + Send>>,
    output: Option<PathBuf>,
}

impl RunRequestBuilder {
    #[must_use]
    pub fn config(mut self, config: ValidatedConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Track points as (longitude, latitude).
    #[must_use]
    pub fn track(mut self, track: Vec<Coord<C>>) -> Self {
        self.track = Some(track);
        self
    }

    #[must_use]
    pub fn elevation<S: ElevationSource + Send + 'static>(mut self, source: S) -> Self {
        self.elevation = Some(Box::new(source));
        self
    }

    /// Optional; without it the overlays are procedural.
    #[must_use]
    pub fn layers<S: LayerSource + Send + 'static>(mut self, source: S) -> Self {
        self.layers = Some(Box::new(source));
        self
    }

    /// Output path without extension.
    #[must_use]
    pub fn output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn build(self) -> Result<RunRequest, ReliefError> {
        Ok(RunRequest {
            config: self.config.ok_or(ReliefError::Builder("config"))?,
            track: self.track.ok_or(ReliefError::Builder("track"))?,
            elevation: self.elevation.ok_or(ReliefError::Builder("elevation"))?,
            layers: self.layers,
            output: self.output.ok_or(ReliefError::Builder("output"))?,
        })
    }
}

/// Stage sequencing and the switch to the fallback builder.
struct Runner<'a> {
    full: FullBuilder,
    fallback: FallbackBuilder,
    degraded: bool,
    cancel: &'a CancelToken,
    events: &'a Sender<RunEvent>,
}

impl<'a> Runner<'a> {
    fn builder(&self) -> &dyn PartBuilder {
        if self.degraded {
            &self.fallback
        } else {
            &self.full
        }
    }

    fn send(&self, event: RunEvent) {
        if self.events.send(event).is_err() {
            debug!("run event dropped, nobody is listening");
        }
    }

    fn degrade(&mut self, reason: String) {
        warn!("continuing with the {} builder: {reason}", self.fallback.name());
        self.degraded = true;
        self.send(RunEvent::Degraded { reason });
    }

    /// Runs one stage. A backend failure switches to the fallback
    /// builder and repeats the stage once.
    fn stage<T, F>(&mut self, stage: Stage, mut f: F) -> Result<T, ReliefError>
    where
        F: FnMut(&dyn PartBuilder) -> Result<T, ReliefError>,
    {
        self.cancel.check()?;
        let now = Instant::now();
        let value = match f(self.builder()) {
            Err(ReliefError::Backend(e)) if !self.degraded => {
                self.degrade(format!("{stage}: {e}"));
                f(self.builder())?
            }
            other => other?,
        };
        let elapsed = now.elapsed();
        debug!("stage; name: {stage}, builder: {}, exec: {elapsed:?}", self.builder().name());
        self.send(RunEvent::StageFinished { stage, elapsed });
        Ok(value)
    }
}

/// Runs `request` to completion on the calling thread.
///
/// Sends `StageFinished` and `Degraded` events as it goes; the final
/// outcome is the return value. Nothing is written unless every part
/// was built and validated.
pub fn run(
    request: RunRequest,
    cancel: &CancelToken,
    events: &Sender<RunEvent>,
) -> Result<RunSummary, ReliefError> {
    let now = Instant::now();
    cancel.check()?;
    let outputs = request.outputs();
    let RunRequest {
        config,
        track,
        elevation,
        layers,
        ..
    } = request;

    if track.len() < 2 {
        return Err(ReliefError::Input(format!(
            "track has {} points, need at least 2",
            track.len()
        )));
    }
    let bbox = LineString::from(track.clone())
        .bounding_rect()
        .ok_or_else(|| ReliefError::Input("track has no extent".into()))?;
    let transform =
        CoordinateProjector::project(bbox, config.margin, config.effective_footprint_mm())?;
    let mut grid = elevation.grid(transform.footprint_geo())?;

    let mut runner = Runner {
        full: FullBuilder::new(backend::engine(&config.backend)),
        fallback: FallbackBuilder::default(),
        degraded: false,
        cancel,
        events,
    };
    if let Err(e) = runner.full.engine().probe() {
        runner.degrade(e.to_string());
    }

    let (base, lattice) =
        runner.stage(Stage::Terrain, |b| b.build_base(&mut grid, &transform, &config))?;
    let (ribbon, stations) = runner.stage(Stage::Track, |_| {
        let ribbon = TrackProjector::new(&transform, &lattice, config.track_step_mm).project(&track)?;
        let stations = Stations::along(&ribbon)?;
        Ok((ribbon, stations))
    })?;
    let carved = runner.stage(Stage::Groove, |b| b.build_groove(&base, &stations, &config))?;
    let inlay = runner.stage(Stage::Inlay, |b| b.build_inlay(&stations, &carved, &config))?;
    let frame = runner.stage(Stage::Frame, |b| b.build_frame(&config))?;
    let source = layers.as_deref().map(|source| source as &dyn LayerSource);
    let overlays = runner.stage(Stage::Layers, |b| {
        b.build_layers(&transform, &lattice, &stations, &carved, &config, source)
    })?;

    let groove_width_mm = carved.profile.width();
    let mut solids = vec![carved.base, inlay.solid];
    solids.extend(frame);
    solids.extend(overlays.into_iter().map(|layer| layer.solid));
    let (objects, written) = runner.stage(Stage::Package, |_| {
        let package = Package::assemble(solids.clone(), &transform)?;
        let written = package.write(&outputs, config.export_parts)?;
        let objects: Vec<String> = package.names().into_iter().map(String::from).collect();
        Ok((objects, written))
    })?;

    let summary = RunSummary {
        package: outputs.package(),
        written,
        objects,
        degraded: runner.degraded,
        track_length_mm: ribbon.length(),
        inlay_length_mm: inlay.sweep_length,
        groove_width_mm,
    };
    info!(
        "run finished; objects: {}, degraded: {}, exec: {:?}",
        summary.objects.join(","),
        summary.degraded,
        now.elapsed()
    );
    Ok(summary)
}
