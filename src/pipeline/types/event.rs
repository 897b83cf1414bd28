use std::fmt;

use uuid::Uuid;

use crate::common::SharedFrame;
use crate::pipeline::types::ResultEnvelope;

/// Notifications published by a running grabber.
pub enum GrabberEvent<R> {
    ProcessingStarting,
    ProcessingStarted,
    ProcessingStopping,
    ProcessingStopped,
    FrameCaptured(SharedFrame),
    ResultAvailable(ResultEnvelope<R>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ProcessingStarting,
    ProcessingStarted,
    ProcessingStopping,
    ProcessingStopped,
    FrameCaptured,
    ResultAvailable,
}

impl<R> GrabberEvent<R> {
    pub fn kind(&self) -> EventKind {
        match self {
            GrabberEvent::ProcessingStarting => EventKind::ProcessingStarting,
            GrabberEvent::ProcessingStarted => EventKind::ProcessingStarted,
            GrabberEvent::ProcessingStopping => EventKind::ProcessingStopping,
            GrabberEvent::ProcessingStopped => EventKind::ProcessingStopped,
            GrabberEvent::FrameCaptured(_) => EventKind::FrameCaptured,
            GrabberEvent::ResultAvailable(_) => EventKind::ResultAvailable,
        }
    }
}

impl<R> fmt::Debug for GrabberEvent<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrabberEvent::FrameCaptured(frame) => {
                write!(f, "FrameCaptured(#{})", frame.index())
            }
            GrabberEvent::ResultAvailable(envelope) => {
                write!(f, "ResultAvailable(#{})", envelope.frame_index())
            }
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

/// Returned by every subscribe call; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
