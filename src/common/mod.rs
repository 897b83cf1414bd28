pub mod frame;

pub use frame::{Frame, FrameMetadata, SharedFrame};
