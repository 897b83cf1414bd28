use serde::Serialize;

/// Lifecycle of a frame grabber. `Idle` is both the initial and the terminal state,
/// so a grabber can be started again after a stop.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

impl PipelineState {
    pub fn is_active(self) -> bool {
        !matches!(self, PipelineState::Idle)
    }
}
