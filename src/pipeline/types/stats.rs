use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::pipeline::types::ResultEnvelope;

/// Counters for the current (or last) run.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct GrabberStats {
    pub frames_captured: u64,
    pub frames_submitted: u64,
    pub submissions_dropped: u64,
    pub read_failures: u64,
    pub results_delivered: u64,
    pub timeouts: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    frames_captured: AtomicU64,
    frames_submitted: AtomicU64,
    submissions_dropped: AtomicU64,
    read_failures: AtomicU64,
    results_delivered: AtomicU64,
    timeouts: AtomicU64,
    errors: AtomicU64,
}

impl PipelineCounters {
    pub fn reset(&self) {
        for counter in [
            &self.frames_captured,
            &self.frames_submitted,
            &self.submissions_dropped,
            &self.read_failures,
            &self.results_delivered,
            &self.timeouts,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_submitted(&self) {
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submission_dropped(&self) {
        self.submissions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_failed(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn result_delivered<R>(&self, envelope: &ResultEnvelope<R>) {
        self.results_delivered.fetch_add(1, Ordering::Relaxed);
        if envelope.timed_out() {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        } else if envelope.error().is_some() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> GrabberStats {
        GrabberStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            submissions_dropped: self.submissions_dropped.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            results_delivered: self.results_delivered.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
