//! Errors raised while turning uploaded text into catalog/EPG records

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid playlist format (missing #EXTM3U header)")]
    MissingHeader,

    #[error("Playlist line {line} exceeds max length of {max} bytes")]
    LineTooLong { line: usize, max: usize },

    #[error("Timed out while reading playlist line")]
    ReadTimeout,

    #[error("Upload too large: {size_mb:.1}MB (limit {limit_mb}MB)")]
    TooLarge { size_mb: f64, limit_mb: usize },

    #[error("Invalid JSON catalog: {0}")]
    InvalidJson(String),

    #[error("Invalid XMLTV document: {0}")]
    Xml(String),

    #[error("Upload contained no usable entries")]
    Empty,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
