//! Boolean mesh engines.
//!
//! Carving the groove is the one place the pipeline needs a mesh
//! boolean. [`ExternalEngine`] hands the work to a native program
//! found at run time; [`HeightfieldEngine`] does it in-process by
//! pushing the base's top surface down wherever the tool reaches.

mod external;
mod heightfield;

pub use self::{external::ExternalEngine, heightfield::HeightfieldEngine};
use crate::config::BackendConfig;
use printmesh::{MeshError, Solid};
use std::{path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("geometry tool {0:?} not found")]
    Unavailable(PathBuf),

    #[error("geometry tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("geometry tool exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("geometry tool: {0}")]
    Io(#[from] std::io::Error),

    #[error("geometry tool output: {0}")]
    Mesh(#[from] MeshError),
}

pub trait BooleanEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns `Ok` if the engine can be used right now.
    fn probe(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Returns `target` with `tool` removed from it.
    ///
    /// The result keeps `target`'s name and color.
    fn subtract(&self, target: &Solid, tool: &Solid) -> Result<Solid, BackendError>;
}

/// Returns the engine `config` asks for.
pub fn engine(config: &BackendConfig) -> Box<dyn BooleanEngine> {
    match &config.tool {
        Some(tool) => Box::new(ExternalEngine::new(tool.clone())),
        None => Box::new(HeightfieldEngine::default()),
    }
}
