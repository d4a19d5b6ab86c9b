use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowguardError {
    #[error("invalid duration '{0}': expected <number> followed by s, m, h or d")]
    InvalidDuration(String),

    #[error("{path}:{line}: unparseable prefix entry: {content}")]
    InvalidPrefixLine {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("subnet file {0} contains no usable prefixes")]
    EmptyPrefixFile(PathBuf),

    #[error("thresholds file {path}: {reason}")]
    InvalidThresholds { path: PathBuf, reason: String },

    #[error("detection engine exited abnormally")]
    EngineDied,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FlowguardError>;
