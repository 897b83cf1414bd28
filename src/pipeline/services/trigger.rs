use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::common::Frame;

/// Caller-supplied decision function. The flag is true on the first frame after a reset.
pub type TriggerPredicate = Box<dyn FnMut(&Frame, bool) -> bool + Send>;

enum TriggerKind {
    Interval {
        interval: TimeDelta,
        next_deadline: Option<DateTime<Utc>>,
    },
    Predicate(TriggerPredicate),
}

/// Decides which captured frames are submitted for analysis.
pub struct TriggerPolicy {
    kind: TriggerKind,
    reset: bool,
}

impl TriggerPolicy {
    /// Triggers on the first frame, then whenever a frame's timestamp passes the next deadline.
    /// Deadlines advance by exactly `interval` so the cadence does not drift.
    pub fn interval(interval: Duration) -> Self {
        Self {
            kind: TriggerKind::Interval {
                interval: TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX),
                next_deadline: None,
            },
            reset: true,
        }
    }

    pub fn predicate<F>(predicate: F) -> Self
    where
        F: FnMut(&Frame, bool) -> bool + Send + 'static,
    {
        Self {
            kind: TriggerKind::Predicate(Box::new(predicate)),
            reset: true,
        }
    }

    /// Analyze every frame.
    pub fn always() -> Self {
        Self::predicate(|_, _| true)
    }

    pub fn reset(&mut self) {
        self.reset = true;
    }

    pub fn should_analyze(&mut self, frame: &Frame) -> bool {
        let first = std::mem::replace(&mut self.reset, false);
        match &mut self.kind {
            TriggerKind::Interval {
                interval,
                next_deadline,
            } => {
                let deadline = match *next_deadline {
                    Some(deadline) if !first => deadline,
                    _ => {
                        *next_deadline = Some(frame.timestamp());
                        return Self::advance(next_deadline, *interval);
                    }
                };
                if frame.timestamp() > deadline {
                    Self::advance(next_deadline, *interval)
                } else {
                    false
                }
            }
            TriggerKind::Predicate(predicate) => predicate(frame, first),
        }
    }

    fn advance(next_deadline: &mut Option<DateTime<Utc>>, interval: TimeDelta) -> bool {
        if let Some(deadline) = next_deadline.as_mut() {
            *deadline = deadline
                .checked_add_signed(interval)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
        }
        true
    }
}

impl fmt::Debug for TriggerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TriggerKind::Interval {
                interval,
                next_deadline,
            } => f
                .debug_struct("Interval")
                .field("interval", interval)
                .field("next_deadline", next_deadline)
                .field("reset", &self.reset)
                .finish(),
            TriggerKind::Predicate(_) => f
                .debug_struct("Predicate")
                .field("reset", &self.reset)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    fn frame_at(index: u64, origin: DateTime<Utc>, offset_ms: i64) -> Frame {
        Frame::new(
            DynamicImage::new_rgb8(1, 1),
            index,
            origin + TimeDelta::milliseconds(offset_ms),
        )
    }

    fn fired_offsets(policy: &mut TriggerPolicy, offsets: &[i64]) -> Vec<i64> {
        let origin = Utc::now();
        offsets
            .iter()
            .enumerate()
            .filter(|(i, ms)| policy.should_analyze(&frame_at(*i as u64, origin, **ms)))
            .map(|(_, ms)| *ms)
            .collect()
    }

    #[test]
    fn interval_fires_on_first_frame_and_after_each_deadline() {
        let mut policy = TriggerPolicy::interval(Duration::from_millis(100));
        let fired = fired_offsets(&mut policy, &[0, 30, 60, 90, 120, 150]);
        assert_eq!(fired, vec![0, 120]);
    }

    #[test]
    fn interval_deadline_accumulates_without_drift() {
        let mut policy = TriggerPolicy::interval(Duration::from_millis(100));
        // Late frames do not push the schedule back: deadlines stay at 100, 200, 300.
        let fired = fired_offsets(&mut policy, &[0, 150, 201, 250, 301]);
        assert_eq!(fired, vec![0, 150, 201, 301]);
    }

    #[test]
    fn frame_exactly_on_deadline_does_not_fire() {
        let mut policy = TriggerPolicy::interval(Duration::from_millis(100));
        let fired = fired_offsets(&mut policy, &[0, 100, 101]);
        assert_eq!(fired, vec![0, 101]);
    }

    #[test]
    fn reset_reinitializes_interval() {
        let mut policy = TriggerPolicy::interval(Duration::from_millis(100));
        let origin = Utc::now();
        assert!(policy.should_analyze(&frame_at(0, origin, 0)));
        assert!(!policy.should_analyze(&frame_at(1, origin, 50)));
        policy.reset();
        assert!(policy.should_analyze(&frame_at(2, origin, 60)));
        assert!(!policy.should_analyze(&frame_at(3, origin, 120)));
    }

    #[test]
    fn predicate_sees_reset_flag_once() {
        let mut seen = Vec::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let mut policy = TriggerPolicy::predicate(move |frame, first| {
            tx.send(first).unwrap();
            frame.index() % 2 == 0
        });
        let origin = Utc::now();
        let picked: Vec<bool> = (0..3)
            .map(|i| policy.should_analyze(&frame_at(i, origin, i as i64)))
            .collect();
        policy.reset();
        policy.should_analyze(&frame_at(3, origin, 3));
        seen.extend(rx.try_iter());

        assert_eq!(picked, vec![true, false, true]);
        assert_eq!(seen, vec![true, false, false, true]);
    }
}
