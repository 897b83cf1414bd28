pub mod image_sequence;
pub mod source;
pub mod test_pattern;

pub use image_sequence::{ImageSequenceBackend, ImageSequenceSource};
pub use source::{probe_device_count, CaptureBackend, FrameSource, SourceId, SourceKind};
pub use test_pattern::{TestPatternBackend, TestPatternSource};
