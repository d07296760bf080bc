//! Errors surfaced by content and configuration loading.
//!
//! Roll-time problems never become errors: data errors are logged and
//! defaulted, constraint violations travel as result flags.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON write error: {0}")]
    RonWrite(#[from] ron::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported content format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("Duplicate prototype id {id} ({kind})")]
    DuplicatePrototype { id: u64, kind: &'static str },
    #[error("Invalid prototype id 0 in {0}")]
    InvalidPrototypeId(&'static str),
}

pub type ContentResult<T> = Result<T, ContentError>;
