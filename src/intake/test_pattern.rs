use std::path::Path;

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use tracing::warn;

use crate::error::SourceError;
use crate::intake::source::{CaptureBackend, FrameSource};

const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;

/// Live backend exposing a fixed number of synthetic cameras. Useful for demos and soak runs
/// without hardware attached.
#[derive(Debug, Clone)]
pub struct TestPatternBackend {
    cameras: usize,
    width: u32,
    height: u32,
    frame_rate: Option<f64>,
    fail_every: Option<u64>,
}

impl TestPatternBackend {
    pub fn new(cameras: usize) -> Self {
        Self {
            cameras,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frame_rate: None,
            fail_every: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Makes every n-th read fail transiently, the way a flaky USB camera does.
    pub fn with_transient_failures(mut self, every: u64) -> Self {
        self.fail_every = (every > 0).then_some(every);
        self
    }
}

impl CaptureBackend for TestPatternBackend {
    fn open_camera(&self, index: usize) -> Result<Box<dyn FrameSource>, SourceError> {
        if index >= self.cameras {
            return Err(SourceError::Open(
                crate::intake::SourceId::Camera(index),
                format!("only {} test camera(s) available", self.cameras),
            ));
        }
        Ok(Box::new(TestPatternSource {
            camera: index,
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            fail_every: self.fail_every,
            reads: 0,
        }))
    }

    fn open_file(&self, _path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
        Err(SourceError::Unsupported("files"))
    }

    fn probe_camera(&self, index: usize) -> bool {
        index < self.cameras
    }
}

pub struct TestPatternSource {
    camera: usize,
    width: u32,
    height: u32,
    frame_rate: Option<f64>,
    fail_every: Option<u64>,
    reads: u64,
}

impl TestPatternSource {
    // A horizontal gradient with a vertical bar sweeping one column per read.
    fn render(&self) -> DynamicImage {
        let bar = (self.reads % self.width as u64) as u32;
        let tint = (self.camera as u8).wrapping_mul(40);
        let image = RgbImage::from_fn(self.width, self.height, |x, y| {
            if x == bar {
                image::Rgb([255, 255, 255])
            } else {
                let r = (x * 255 / self.width) as u8;
                let g = (y * 255 / self.height) as u8;
                image::Rgb([r, g, tint])
            }
        });
        DynamicImage::ImageRgb8(image)
    }
}

#[async_trait]
impl FrameSource for TestPatternSource {
    async fn read_frame(&mut self) -> Result<DynamicImage, SourceError> {
        self.reads += 1;
        if let Some(every) = self.fail_every {
            if self.reads % every == 0 {
                warn!("Test camera {} dropping read {}", self.camera, self.reads);
                return Err(SourceError::Transient(format!(
                    "scripted failure on read {}",
                    self.reads
                )));
            }
        }
        Ok(self.render())
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
