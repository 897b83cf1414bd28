pub mod analysis;
pub mod events;
pub mod timer;
pub mod trigger;

pub use analysis::{
    analyzer_fn, AnalysisExecutor, AnalysisHandle, FnAnalyzer, FrameAnalyzer, SharedAnalyzer,
};
pub use events::EventHub;
pub use timer::{TickSignal, Timer, TimerHandle};
pub use trigger::{TriggerPolicy, TriggerPredicate};
