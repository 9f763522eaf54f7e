use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the viewer core. Per-image decode failures are not
/// routed through here; they stay recorded on the image that hit them.
#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("unsupported file extension: {0}")]
    ExtensionUnsupported(PathBuf),

    #[error("scan cancelled")]
    ScanCancelled,

    #[error("file watch failed: {0}")]
    Watch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ViewerError>;
