use crate::backend::BackendError;
use dem::DemError;
use printmesh::MeshError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReliefError {
    #[error("missing required parameter '{0}'")]
    Builder(&'static str),

    #[error("invalid extent: {0}")]
    InvalidExtent(String),

    #[error("invalid input: {0}")]
    Input(String),

    #[error("elevation data: {0}")]
    Data(#[from] DemError),

    #[error("{stage} failed{}: {reason}", at(.position_mm))]
    Geometry {
        stage: &'static str,
        /// Arc-length along the track nearest to the failure, if the
        /// failure can be located.
        position_mm: Option<f64>,
        reason: String,
    },

    #[error("invalid {name} {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("geometry backend: {0}")]
    Backend(#[from] BackendError),

    #[error("cannot package '{object}': {reason}")]
    Packaging { object: String, reason: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("{0}")]
    Mesh(#[from] MeshError),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

fn at(position_mm: &Option<f64>) -> String {
    position_mm.map_or_else(String::new, |mm| format!(" near {mm:.1} mm along the track"))
}

impl ReliefError {
    pub(crate) fn geometry(stage: &'static str, reason: impl Into<String>) -> Self {
        Self::Geometry {
            stage,
            position_mm: None,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ReliefError;

    #[test]
    fn test_geometry_display() {
        let located = ReliefError::Geometry {
            stage: "groove",
            position_mm: Some(42.04),
            reason: "3 boundary edges".into(),
        };
        assert_eq!(
            located.to_string(),
            "groove failed near 42.0 mm along the track: 3 boundary edges"
        );
        assert_eq!(
            ReliefError::geometry("frame", "recess too deep").to_string(),
            "frame failed: recess too deep"
        );
    }
}
