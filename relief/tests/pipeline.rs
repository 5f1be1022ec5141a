use crossbeam_channel::{bounded, unbounded, Receiver};
use dem::{geo::Rect, DemError, ElevationGrid, ElevationSource, C};
use geo::{
    geometry::{Coord, LineString},
    BoundingRect,
};
use printmesh::inspect;
use relief::{
    pipeline, read_package, BackendConfig, CancelToken, Config, CoordinateProjector, Dispatcher,
    ExternalTool, HeightLattice, LayerFeatures, LayerKind, LayerSource, RunEvent, RunRequest,
    ReliefError,
};
use std::{fs, path::Path};
use tempfile::tempdir;

/// Roughly 2 km east-west by 1 km north-south around 8°E 46°N.
fn track() -> Vec<Coord<C>> {
    (0..500)
        .map(|i| {
            let t = C::from(i) / 499.0;
            Coord {
                x: 8.0 + 0.026 * t,
                y: 46.0 + 0.0045 * (1.0 + (t * std::f64::consts::TAU).sin()),
            }
        })
        .collect()
}

/// Rolling hills between 400 m and 700 m.
fn hills() -> ElevationGrid {
    ElevationGrid::from_fn(
        Coord { x: 7.95, y: 45.95 },
        Coord { x: 0.0005, y: 0.0005 },
        (200, 200),
        |col, row| {
            #[allow(clippy::cast_precision_loss)]
            let (x, y) = (col as f32, row as f32);
            Some(550.0 + 150.0 * (x * 0.07).sin() * (y * 0.05).cos())
        },
    )
    .unwrap()
}

fn request(config: Config, output: &Path) -> RunRequest {
    RunRequest::builder()
        .config(config.validate().unwrap())
        .track(track())
        .elevation(hills())
        .output(output)
        .build()
        .unwrap()
}

fn files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_full_run() {
    let dir = tempdir().unwrap();
    let config = Config {
        margin: 0.2,
        ..Config::default()
    };
    let (tx, rx) = unbounded();
    let summary = pipeline::run(
        request(config, &dir.path().join("route")),
        &CancelToken::new(),
        &tx,
    )
    .unwrap();

    assert!(!summary.degraded);
    assert_eq!(
        summary.objects,
        ["base", "water", "green", "detail", "track", "frame"]
    );
    assert_eq!(summary.written, [dir.path().join("route.3mf")]);
    assert_eq!(files(dir.path()), ["route.3mf"]);

    let stages = rx
        .try_iter()
        .filter(|event| matches!(event, RunEvent::StageFinished { .. }))
        .count();
    assert_eq!(stages, pipeline::Stage::COUNT);

    let package = read_package(&summary.package).unwrap();
    for solid in package.objects() {
        let report = inspect(solid);
        assert!(report.is_printable(), "{}: {report:?}", solid.name);
    }
    let base = package.object("base").unwrap().bounds().unwrap();
    assert!((base.size().x - 120.0).abs() < 1e-3);
    assert!((base.size().y - 120.0).abs() < 1e-3);

    // The ribbon follows the projected track in plan and only adds
    // length by climbing.
    let geo_track = track();
    let bbox = LineString::from(geo_track.clone()).bounding_rect().unwrap();
    let transform = CoordinateProjector::project(bbox, 0.2, 120.0).unwrap();
    let planar: C = geo_track
        .windows(2)
        .map(|w| {
            let (a, b) = (transform.to_mm(w[0]), transform.to_mm(w[1]));
            (b.x - a.x).hypot(b.y - a.y)
        })
        .sum();
    assert!(summary.track_length_mm > planar * 0.98);
    assert!(summary.track_length_mm < planar * 1.08);
    assert!((summary.inlay_length_mm - summary.track_length_mm).abs() < 1e-9);
    assert!(summary.groove_width_mm <= 2.6 + 1e-9);

    // Along the track the base top sits a groove depth below the
    // terrain on either side of it.
    let base = package.object("base").unwrap();
    let n = (2..)
        .find(|n| n * n + 4 * (n - 1) + 1 >= base.vertices.len())
        .unwrap();
    assert_eq!(n * n + 4 * (n - 1) + 1, base.vertices.len());
    #[allow(clippy::cast_precision_loss)]
    let step = 120.0 / (n - 1) as C;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let top = HeightLattice::from_fn(120.0, n - 1, |x, y| {
        base.vertices[(y / step).round() as usize * n + (x / step).round() as usize].z
    });
    let depth = 1.6 * summary.groove_width_mm / 2.6;
    for k in [100, 250, 400] {
        let p = transform.to_mm(geo_track[k]);
        let d = transform.to_mm(geo_track[k + 1]) - transform.to_mm(geo_track[k - 1]);
        let len = d.x.hypot(d.y);
        let side = Coord {
            x: -d.y / len * 3.5,
            y: d.x / len * 3.5,
        };
        let (left, right) = (p + side, p - side);
        let terrain = (top.surface_z(left.x, left.y) + top.surface_z(right.x, right.y)) / 2.0;
        let floor = top.surface_z(p.x, p.y);
        assert!(
            (terrain - floor - depth).abs() < 0.4,
            "point {k}: floor {floor:.2} under terrain {terrain:.2}"
        );
    }
}

#[test]
fn test_test_mode_names_every_file() {
    let dir = tempdir().unwrap();
    let config = Config {
        test_mode: true,
        export_parts: true,
        ..Config::default()
    };
    let summary = pipeline::run(
        request(config, &dir.path().join("route")),
        &CancelToken::new(),
        &unbounded().0,
    )
    .unwrap();

    assert_eq!(
        files(dir.path()),
        [
            "route_base_brown_test.stl",
            "route_detail_test.stl",
            "route_frame_test.stl",
            "route_green_test.stl",
            "route_test.3mf",
            "route_track_inlay_red_test.stl",
            "route_water_test.stl",
        ]
    );
    assert_eq!(summary.written[0], dir.path().join("route_test.3mf"));

    let package = read_package(&summary.package).unwrap();
    let frame = package.object("frame").unwrap().bounds().unwrap();
    assert!((frame.size().x - 40.0).abs() < 1e-9);
    assert_eq!(package.metadata("footprint_mm"), Some("40"));
}

#[test]
fn test_no_elevation_writes_nothing() {
    let dir = tempdir().unwrap();
    let empty = ElevationGrid::from_fn(
        Coord { x: 7.95, y: 45.95 },
        Coord { x: 0.001, y: 0.001 },
        (100, 100),
        |_, _| None,
    )
    .unwrap();
    let request = RunRequest::builder()
        .config(Config::default().validate().unwrap())
        .track(track())
        .elevation(empty)
        .output(dir.path().join("route"))
        .build()
        .unwrap();

    let err = pipeline::run(request, &CancelToken::new(), &unbounded().0).unwrap_err();
    assert!(matches!(err, ReliefError::Data(DemError::NoValidSamples)));
    assert!(files(dir.path()).is_empty());
}

#[test]
fn test_missing_tool_degrades() {
    let dir = tempdir().unwrap();
    let config = Config {
        test_mode: true,
        backend: BackendConfig {
            tool: Some(ExternalTool {
                program: "no-such-tool-for-relief".into(),
                args: vec![],
                timeout_s: 5.0,
            }),
        },
        ..Config::default()
    };
    let (tx, rx) = unbounded();
    let summary = pipeline::run(
        request(config, &dir.path().join("route")),
        &CancelToken::new(),
        &tx,
    )
    .unwrap();

    assert!(summary.degraded);
    assert_eq!(summary.objects, ["base", "track"]);
    assert!(rx
        .try_iter()
        .any(|event| matches!(event, RunEvent::Degraded { .. })));
    let package = read_package(&summary.package).unwrap();
    assert_eq!(package.names(), ["base", "track"]);
}

#[test]
fn test_short_track() {
    let dir = tempdir().unwrap();
    let request = RunRequest::builder()
        .config(Config::default().validate().unwrap())
        .track(vec![Coord { x: 8.0, y: 46.0 }])
        .elevation(hills())
        .output(dir.path().join("route"))
        .build()
        .unwrap();
    assert!(matches!(
        pipeline::run(request, &CancelToken::new(), &unbounded().0),
        Err(ReliefError::Input(_))
    ));
    assert!(matches!(
        RunRequest::builder().track(track()).build(),
        Err(ReliefError::Builder("config"))
    ));
}

/// Holds every elevation request until the test lets it through.
struct Gated {
    gate: Receiver<()>,
    grid: ElevationGrid,
}

impl ElevationSource for Gated {
    fn grid(&self, _bounds: Rect<C>) -> Result<ElevationGrid, DemError> {
        // A closed gate means the test is over; serve the grid anyway.
        let _ = self.gate.recv();
        Ok(self.grid.clone())
    }
}

#[test]
fn test_new_run_supersedes_old() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("route");
    let config = Config {
        test_mode: true,
        ..Config::default()
    };
    let dispatcher = Dispatcher::new();

    let (open, gate) = bounded(1);
    let first = dispatcher
        .submit(
            RunRequest::builder()
                .config(config.clone().validate().unwrap())
                .track(track())
                .elevation(Gated { gate, grid: hills() })
                .output(&output)
                .build()
                .unwrap(),
        )
        .unwrap();
    let second = dispatcher.submit(request(config, &output)).unwrap();
    assert_eq!(first.target(), second.target());

    open.send(()).unwrap();
    assert!(matches!(first.wait(), Err(ReliefError::Cancelled)));
    let summary = second.wait().unwrap();
    assert!(summary.package.is_file());
    assert_eq!(dispatcher.active(), 0);
}

#[test]
fn test_cancel_before_start() {
    let dir = tempdir().unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = pipeline::run(
        request(Config::default(), &dir.path().join("route")),
        &cancel,
        &unbounded().0,
    )
    .unwrap_err();
    assert!(matches!(err, ReliefError::Cancelled));
    assert!(files(dir.path()).is_empty());
}

/// Cancels its run the first time the layers are asked for.
struct CancellingLayers {
    cancel: CancelToken,
}

impl LayerSource for CancellingLayers {
    fn features(&self, _kind: LayerKind, _bounds: Rect<C>) -> Result<Option<LayerFeatures>, ReliefError> {
        self.cancel.cancel();
        Ok(None)
    }
}

#[test]
fn test_cancel_before_packaging() {
    let dir = tempdir().unwrap();
    let cancel = CancelToken::new();
    let config = Config {
        test_mode: true,
        ..Config::default()
    };
    let request = RunRequest::builder()
        .config(config.validate().unwrap())
        .track(track())
        .elevation(hills())
        .layers(CancellingLayers {
            cancel: cancel.clone(),
        })
        .output(dir.path().join("route"))
        .build()
        .unwrap();

    let (tx, rx) = unbounded();
    let err = pipeline::run(request, &cancel, &tx).unwrap_err();
    assert!(matches!(err, ReliefError::Cancelled));
    assert!(files(dir.path()).is_empty());
    let finished: Vec<_> = rx
        .try_iter()
        .filter_map(|event| match event {
            RunEvent::StageFinished { stage, .. } => Some(stage),
            _ => None,
        })
        .collect();
    assert_eq!(finished.last(), Some(&pipeline::Stage::Layers));
}
