use std::path::PathBuf;

use thiserror::Error;

use crate::intake::SourceId;

// Main grabber error type, returned by the public lifecycle operations.
#[derive(Error, Debug)]
pub enum GrabberError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Camera enumeration is only allowed while the grabber is idle")]
    Busy,
}

// Errors raised by a frame source or the backend that opens it.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("End of stream")]
    EndOfStream,
    #[error("Transient read failure: {0}")]
    Transient(String),
    #[error("Failed to open {0}: {1}")]
    Open(SourceId, String),
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),
    #[error("No readable frames found under {}", .0.display())]
    Empty(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Failure reported by an analysis call, tagged with the capability it came from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{origin} analysis failed: {message}")]
pub struct AnalysisError {
    pub origin: String,
    pub message: String,
}

impl AnalysisError {
    pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            message: message.into(),
        }
    }
}
