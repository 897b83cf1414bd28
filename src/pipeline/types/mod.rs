mod envelope;
mod event;
mod state;
mod stats;

pub use envelope::{AnalysisOutcome, ResultEnvelope};
pub use event::{EventKind, GrabberEvent, SubscriptionId};
pub use state::PipelineState;
pub use stats::GrabberStats;
pub(crate) use stats::PipelineCounters;
