pub(crate) mod consumer;
pub mod producer;
pub mod services;
pub mod types;

pub use producer::ProducerExit;
pub use services::{
    analyzer_fn, AnalysisExecutor, AnalysisHandle, EventHub, FnAnalyzer, FrameAnalyzer,
    SharedAnalyzer, TickSignal, Timer, TimerHandle, TriggerPolicy, TriggerPredicate,
};
pub use types::{
    AnalysisOutcome, EventKind, GrabberEvent, GrabberStats, PipelineState, ResultEnvelope,
    SubscriptionId,
};
