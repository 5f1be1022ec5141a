mod gpx;
mod layerfile;
mod options;
mod progress;

use anyhow::Error as AnyError;
use clap::Parser;
use dem::{TileMode, Tiles};
use log::{info, warn};
use options::{Cli, Command as CliCmd};
use relief::{pipeline::Stage, Config, Dispatcher, RunEvent, RunRequest};
use std::{fs, path::PathBuf};

fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();
    env_logger::init();

    let mut config = match &cli.config {
        Some(path) => Config::from_json(&fs::read_to_string(path)?)?,
        None => Config::default(),
    };
    cli.apply(&mut config);
    let config = config.validate()?;

    match cli.cmd {
        CliCmd::Config => println!("{}", config.into_inner().to_json()?),
        CliCmd::Build {
            tile_dir,
            in_memory,
            layers,
            out,
            gpx,
        } => {
            let tile_mode = if in_memory {
                TileMode::InMem
            } else {
                TileMode::MemMap
            };
            let track = gpx::read_track(&gpx)?;
            info!("read {} track points from {gpx:?}", track.len());

            let mut request = RunRequest::builder()
                .config(config)
                .track(track)
                .elevation(Tiles::new(tile_dir, tile_mode)?)
                .output(out);
            if let Some(path) = layers {
                request = request.layers(layerfile::load(path)?);
            }
            for path in build(request.build()?)? {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}

/// Runs `request` in the background while drawing its progress.
fn build(request: RunRequest) -> Result<Vec<PathBuf>, AnyError> {
    let handle = Dispatcher::new().submit(request)?;
    let pb = progress::stage_bar("relief".to_string(), Stage::COUNT as u64);
    let outcome = handle.wait_with(|event| match event {
        RunEvent::StageFinished { stage, elapsed } => {
            pb.set_message(format!("{stage} ({elapsed:.1?})"));
            pb.inc(1);
        }
        RunEvent::Degraded { reason } => {
            warn!("building base and track only: {reason}");
        }
        RunEvent::Finished(_) | RunEvent::Failed(_) | RunEvent::Cancelled => (),
    });
    pb.finish_and_clear();
    let summary = outcome?;
    info!(
        "track {:.1} mm, groove {:.2} mm wide, objects: {}",
        summary.track_length_mm,
        summary.groove_width_mm,
        summary.objects.join(", ")
    );
    Ok(summary.written)
}
