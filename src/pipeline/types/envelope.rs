use std::time::Duration;

use crate::common::SharedFrame;
use crate::error::AnalysisError;

/// How one analysis call ended. Exactly one of these holds per submitted frame.
#[derive(Debug)]
pub enum AnalysisOutcome<R> {
    Completed(R),
    TimedOut,
    Failed(AnalysisError),
}

/// Uniform result of analyzing one frame, delivered in submission order.
#[derive(Debug)]
pub struct ResultEnvelope<R> {
    frame: SharedFrame,
    outcome: AnalysisOutcome<R>,
    elapsed: Duration,
}

impl<R> ResultEnvelope<R> {
    pub fn new(frame: SharedFrame, outcome: AnalysisOutcome<R>, elapsed: Duration) -> Self {
        Self {
            frame,
            outcome,
            elapsed,
        }
    }

    pub fn frame(&self) -> &SharedFrame {
        &self.frame
    }

    pub fn frame_index(&self) -> u64 {
        self.frame.index()
    }

    pub fn outcome(&self) -> &AnalysisOutcome<R> {
        &self.outcome
    }

    pub fn payload(&self) -> Option<&R> {
        match &self.outcome {
            AnalysisOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.outcome, AnalysisOutcome::TimedOut)
    }

    pub fn error(&self) -> Option<&AnalysisError> {
        match &self.outcome {
            AnalysisOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Time from submission until the envelope was produced.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn into_parts(self) -> (SharedFrame, AnalysisOutcome<R>) {
        (self.frame, self.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Frame;
    use chrono::Utc;
    use image::DynamicImage;

    fn frame() -> SharedFrame {
        Frame::new(DynamicImage::new_rgb8(2, 2), 7, Utc::now()).into_shared()
    }

    #[test]
    fn accessors_reflect_single_outcome() {
        let ok = ResultEnvelope::new(frame(), AnalysisOutcome::Completed(42), Duration::ZERO);
        assert_eq!(ok.payload(), Some(&42));
        assert!(!ok.timed_out());
        assert!(ok.error().is_none());
        assert_eq!(ok.frame_index(), 7);

        let late: ResultEnvelope<u32> =
            ResultEnvelope::new(frame(), AnalysisOutcome::TimedOut, Duration::ZERO);
        assert!(late.timed_out());
        assert!(late.payload().is_none());
        assert!(late.error().is_none());

        let failed: ResultEnvelope<u32> = ResultEnvelope::new(
            frame(),
            AnalysisOutcome::Failed(AnalysisError::new("Vision", "bad key")),
            Duration::ZERO,
        );
        assert_eq!(failed.error().map(|e| e.origin.as_str()), Some("Vision"));
        assert!(failed.payload().is_none());
        assert!(!failed.timed_out());
    }
}
