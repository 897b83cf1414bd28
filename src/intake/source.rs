use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::DynamicImage;
use tracing::debug;

use crate::error::SourceError;

/// Identity of a capture source. Two starts against equal ids are the same run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceId {
    Camera(usize),
    File(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Live,
    File,
}

impl SourceId {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceId::Camera(_) => SourceKind::Live,
            SourceId::File(_) => SourceKind::File,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Camera(index) => write!(f, "camera #{}", index),
            SourceId::File(path) => write!(f, "file '{}'", path.display()),
        }
    }
}

/// An opened capture source. Only the producer loop touches it once a run starts.
#[async_trait]
pub trait FrameSource: Send {
    /// Reads the next frame. `SourceError::EndOfStream` means nothing more will come.
    async fn read_frame(&mut self) -> Result<DynamicImage, SourceError>;

    fn frame_width(&self) -> u32;

    fn frame_height(&self) -> u32;

    /// Native rate of the source, if it knows one.
    fn frame_rate(&self) -> Option<f64> {
        None
    }
}

/// Session object that knows how to open sources and probe devices.
pub trait CaptureBackend: Send + Sync {
    fn open_camera(&self, index: usize) -> Result<Box<dyn FrameSource>, SourceError>;

    fn open_file(&self, path: &Path) -> Result<Box<dyn FrameSource>, SourceError>;

    /// Opens and immediately releases the device at `index`, reporting whether it worked.
    fn probe_camera(&self, index: usize) -> bool;

    fn open(&self, id: &SourceId) -> Result<Box<dyn FrameSource>, SourceError> {
        match id {
            SourceId::Camera(index) => self.open_camera(*index),
            SourceId::File(path) => self.open_file(path),
        }
    }
}

/// Counts cameras by probing indices from zero until the first failure.
pub fn probe_device_count(backend: &dyn CaptureBackend, limit: usize) -> usize {
    let mut count = 0;
    while count < limit {
        if !backend.probe_camera(count) {
            break;
        }
        count += 1;
    }
    debug!("Probed {} camera(s)", count);
    count
}
