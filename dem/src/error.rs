use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DemError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("invalid HGT name {0}")]
    HgtName(PathBuf),

    #[error("invalid HGT file len {0} for {1}")]
    HgtLen(u64, PathBuf),

    #[error("no height files in {0}")]
    Path(PathBuf),

    #[error("elevation grid has no valid samples")]
    NoValidSamples,

    #[error("elevation grid {cols}x{rows} exceeds the {max} sample limit")]
    TooLarge { cols: usize, rows: usize, max: usize },

    #[error("requested area {0:.3}x{1:.3} degrees exceeds one degree per side")]
    AreaTooLarge(f64, f64),

    #[error("invalid grid: {0}")]
    Shape(&'static str),
}
