use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use tracing::{debug, info};

use crate::error::SourceError;
use crate::intake::source::{CaptureBackend, FrameSource};

/// File backend that plays back a directory of still images (or a single image) as a clip.
/// It has no cameras.
#[derive(Debug, Clone, Default)]
pub struct ImageSequenceBackend {
    frame_rate: Option<f64>,
}

impl ImageSequenceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rate reported by opened sequences; the grabber falls back to its default otherwise.
    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }
}

impl CaptureBackend for ImageSequenceBackend {
    fn open_camera(&self, _index: usize) -> Result<Box<dyn FrameSource>, SourceError> {
        Err(SourceError::Unsupported("cameras"))
    }

    fn open_file(&self, path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
        let source = ImageSequenceSource::open(path, self.frame_rate)?;
        Ok(Box::new(source))
    }

    fn probe_camera(&self, _index: usize) -> bool {
        false
    }
}

pub struct ImageSequenceSource {
    frames: Vec<PathBuf>,
    cursor: usize,
    width: u32,
    height: u32,
    frame_rate: Option<f64>,
}

impl ImageSequenceSource {
    pub fn open(path: &Path, frame_rate: Option<f64>) -> Result<Self, SourceError> {
        let frames = if path.is_dir() {
            let mut entries = fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && ImageFormat::from_path(p).is_ok())
                .collect::<Vec<_>>();
            entries.sort();
            entries
        } else {
            // Let a missing file surface as an I/O error rather than an empty clip.
            fs::metadata(path)?;
            vec![path.to_path_buf()]
        };

        let first = frames
            .first()
            .ok_or_else(|| SourceError::Empty(path.to_path_buf()))?;
        let (width, height) = image::image_dimensions(first)?;
        info!(
            "Opened image sequence at {} with {} frame(s) of {}x{}",
            path.display(),
            frames.len(),
            width,
            height
        );

        Ok(Self {
            frames,
            cursor: 0,
            width,
            height,
            frame_rate,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[async_trait]
impl FrameSource for ImageSequenceSource {
    async fn read_frame(&mut self) -> Result<DynamicImage, SourceError> {
        let Some(path) = self.frames.get(self.cursor).cloned() else {
            return Err(SourceError::EndOfStream);
        };
        self.cursor += 1;
        debug!("Decoding {}", path.display());

        tokio::task::spawn_blocking(move || image::open(&path))
            .await
            .map_err(|e| SourceError::Transient(e.to_string()))?
            .map_err(SourceError::from)
    }

    fn frame_width(&self) -> u32 {
        self.width
    }

    fn frame_height(&self) -> u32 {
        self.height
    }

    fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }
}
