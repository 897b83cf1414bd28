pub mod common;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod intake;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testing;

pub use common::{Frame, SharedFrame};
pub use config::{GrabberConfig, Settings, SourceConfig};
pub use coordinator::{FrameGrabber, FrameGrabberBuilder, StopHandle};
pub use error::{AnalysisError, GrabberError, SourceError};
pub use intake::{CaptureBackend, FrameSource, ImageSequenceBackend, SourceId, TestPatternBackend};
pub use pipeline::{
    analyzer_fn, AnalysisOutcome, EventKind, FrameAnalyzer, GrabberEvent, GrabberStats,
    PipelineState, ResultEnvelope, SubscriptionId, TriggerPolicy,
};
