pub mod format;
pub mod hash;

pub use format::*;
pub use hash::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("File too large: {size_mb:.1}MB exceeds {max_mb}MB limit")]
    FileTooLarge { size_mb: f64, max_mb: u64 },
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO_ERROR",
            Self::NotFound(_) => "FILE_NOT_FOUND",
            Self::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
        }
    }
}
