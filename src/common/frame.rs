use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde_json::Value;
use std::sync::{Arc, OnceLock};

/// Frames are shared between frame subscribers and the analysis task that owns a copy of the handle.
pub type SharedFrame = Arc<Frame>;

#[derive(Debug)]
pub struct FrameMetadata {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    annotation: OnceLock<Value>,
}

impl FrameMetadata {
    pub fn new(index: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            index,
            timestamp,
            annotation: OnceLock::new(),
        }
    }

    pub fn annotation(&self) -> Option<&Value> {
        self.annotation.get()
    }
}

/// One captured image plus its metadata. The pixel buffer is immutable once built.
#[derive(Debug)]
pub struct Frame {
    image: DynamicImage,
    metadata: FrameMetadata,
}

impl Frame {
    pub fn new(image: DynamicImage, index: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            image,
            metadata: FrameMetadata::new(index, timestamp),
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }

    pub fn index(&self) -> u64 {
        self.metadata.index
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.metadata.timestamp
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Attaches caller data to the frame. Only the first annotation sticks;
    /// a later attempt hands the rejected value back.
    pub fn annotate(&self, annotation: Value) -> Result<(), Value> {
        self.metadata.annotation.set(annotation)
    }

    pub fn annotation(&self) -> Option<&Value> {
        self.metadata.annotation()
    }

    pub fn into_shared(self) -> SharedFrame {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use serde_json::json;

    fn solid_frame(index: u64) -> SharedFrame {
        let img = DynamicImage::ImageRgb8(ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(
            16,
            8,
            Rgb([1, 2, 3]),
        ));
        Frame::new(img, index, Utc::now()).into_shared()
    }

    #[test]
    fn cloning_shared_frame_shares_image_buffer() {
        let f1 = solid_frame(0);
        let f2 = f1.clone();
        assert!(std::ptr::eq(f1.image(), f2.image()));
        assert_eq!((f2.width(), f2.height()), (16, 8));
    }

    #[test]
    fn annotation_is_set_once() {
        let frame = solid_frame(3);
        assert!(frame.annotation().is_none());
        frame.annotate(json!({"faces": 2})).unwrap();
        let rejected = frame.annotate(json!({"faces": 5})).unwrap_err();
        assert_eq!(rejected, json!({"faces": 5}));
        assert_eq!(frame.annotation(), Some(&json!({"faces": 2})));
    }
}
