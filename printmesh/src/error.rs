use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{0}")]
    Xml(#[from] quick_xml::Error),

    #[error("invalid content: {0}")]
    InvalidContent(String),

    #[error("face {face} references vertex {index} of {len}")]
    IndexOutOfRange { face: usize, index: u32, len: usize },
}

impl MeshError {
    pub(crate) fn invalid_content(msg: impl Into<String>) -> Self {
        Self::InvalidContent(msg.into())
    }
}
