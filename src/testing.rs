//! Scripted sources and event recorders shared by the pipeline tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::common::SharedFrame;
use crate::coordinator::FrameGrabber;
use crate::error::{AnalysisError, SourceError};
use crate::intake::{CaptureBackend, FrameSource};
use crate::pipeline::services::FrameAnalyzer;
use crate::pipeline::types::{EventKind, GrabberEvent};

/// Counts what the scripted sources went through.
#[derive(Debug, Default)]
pub struct SourceProbe {
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
    pub reads: AtomicUsize,
    pub device_probes: AtomicUsize,
}

impl SourceProbe {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn device_probes(&self) -> usize {
        self.device_probes.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct ScriptedBackend {
    cameras: usize,
    file_frames: usize,
    read_delay: Option<Duration>,
    failing_reads: Vec<usize>,
    frame_rate: Option<f64>,
    probe: Arc<SourceProbe>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            cameras: 2,
            file_frames: 3,
            read_delay: None,
            failing_reads: Vec::new(),
            frame_rate: None,
            probe: Arc::new(SourceProbe::default()),
        }
    }

    pub fn with_cameras(mut self, cameras: usize) -> Self {
        self.cameras = cameras;
        self
    }

    pub fn with_file_frames(mut self, frames: usize) -> Self {
        self.file_frames = frames;
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Reads are numbered from 1 per opened source.
    pub fn with_failing_reads(mut self, reads: Vec<usize>) -> Self {
        self.failing_reads = reads;
        self
    }

    /// Rate the opened sources report as their own.
    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn probe(&self) -> Arc<SourceProbe> {
        self.probe.clone()
    }

    fn source(&self, remaining: Option<usize>) -> Box<dyn FrameSource> {
        self.probe.opened.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedSource {
            remaining,
            reads: 0,
            read_delay: self.read_delay,
            failing_reads: self.failing_reads.clone(),
            frame_rate: self.frame_rate,
            probe: self.probe.clone(),
        })
    }
}

impl CaptureBackend for ScriptedBackend {
    fn open_camera(&self, index: usize) -> Result<Box<dyn FrameSource>, SourceError> {
        if index >= self.cameras {
            return Err(SourceError::Open(
                crate::intake::SourceId::Camera(index),
                "no such device".to_string(),
            ));
        }
        Ok(self.source(None))
    }

    fn open_file(&self, _path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
        Ok(self.source(Some(self.file_frames)))
    }

    fn probe_camera(&self, index: usize) -> bool {
        self.probe.device_probes.fetch_add(1, Ordering::SeqCst);
        index < self.cameras
    }
}

struct ScriptedSource {
    remaining: Option<usize>,
    reads: usize,
    read_delay: Option<Duration>,
    failing_reads: Vec<usize>,
    frame_rate: Option<f64>,
    probe: Arc<SourceProbe>,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn read_frame(&mut self) -> Result<DynamicImage, SourceError> {
        self.reads += 1;
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_reads.contains(&self.reads) {
            return Err(SourceError::Transient(format!("read {} failed", self.reads)));
        }
        match self.remaining.as_mut() {
            Some(0) => return Err(SourceError::EndOfStream),
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        Ok(DynamicImage::new_rgb8(4, 3))
    }

    fn frame_width(&self) -> u32 {
        4
    }

    fn frame_height(&self) -> u32 {
        3
    }

    fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.probe.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Answers with the frame index after a per-frame delay.
pub struct DelayAnalyzer {
    delays: HashMap<u64, Duration>,
    default_delay: Duration,
}

impl DelayAnalyzer {
    pub fn uniform(delay: Duration) -> Self {
        Self {
            delays: HashMap::new(),
            default_delay: delay,
        }
    }

    pub fn per_frame(delays_ms: &[(u64, u64)]) -> Self {
        Self {
            delays: delays_ms
                .iter()
                .map(|(index, ms)| (*index, Duration::from_millis(*ms)))
                .collect(),
            default_delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl FrameAnalyzer for DelayAnalyzer {
    type Output = u64;

    async fn analyze(&self, frame: SharedFrame) -> Result<u64, AnalysisError> {
        let delay = self
            .delays
            .get(&frame.index())
            .copied()
            .unwrap_or(self.default_delay);
        tokio::time::sleep(delay).await;
        Ok(frame.index())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Lifecycle(EventKind),
    Frame(u64),
    Result {
        index: u64,
        payload: Option<u64>,
        timed_out: bool,
        origin: Option<String>,
        at: Instant,
    },
}

/// Records every event a grabber publishes.
#[derive(Clone)]
pub struct EventLog {
    seen: Arc<Mutex<Vec<Seen>>>,
    changed: Arc<Notify>,
}

impl EventLog {
    pub fn attach(grabber: &FrameGrabber<u64>) -> Self {
        let log = Self {
            seen: Arc::new(Mutex::new(Vec::new())),
            changed: Arc::new(Notify::new()),
        };
        let sink = log.clone();
        grabber.subscribe(move |event| {
            let entry = match event {
                GrabberEvent::FrameCaptured(frame) => Seen::Frame(frame.index()),
                GrabberEvent::ResultAvailable(envelope) => Seen::Result {
                    index: envelope.frame_index(),
                    payload: envelope.payload().copied(),
                    timed_out: envelope.timed_out(),
                    origin: envelope.error().map(|e| e.origin.clone()),
                    at: Instant::now(),
                },
                other => Seen::Lifecycle(other.kind()),
            };
            sink.seen.lock().unwrap().push(entry);
            sink.changed.notify_waiters();
        });
        log
    }

    pub fn snapshot(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.snapshot()
            .iter()
            .filter(|seen| match seen {
                Seen::Lifecycle(k) => *k == kind,
                Seen::Frame(_) => kind == EventKind::FrameCaptured,
                Seen::Result { .. } => kind == EventKind::ResultAvailable,
            })
            .count()
    }

    pub fn frames(&self) -> Vec<u64> {
        self.snapshot()
            .iter()
            .filter_map(|seen| match seen {
                Seen::Frame(index) => Some(*index),
                _ => None,
            })
            .collect()
    }

    pub fn results(&self) -> Vec<Seen> {
        self.snapshot()
            .into_iter()
            .filter(|seen| matches!(seen, Seen::Result { .. }))
            .collect()
    }

    pub fn result_indices(&self) -> Vec<u64> {
        self.results()
            .iter()
            .filter_map(|seen| match seen {
                Seen::Result { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    pub fn payloads(&self) -> Vec<Option<u64>> {
        self.results()
            .iter()
            .filter_map(|seen| match seen {
                Seen::Result { payload, .. } => Some(*payload),
                _ => None,
            })
            .collect()
    }

    /// Waits until `done` holds, failing the test after a generous virtual deadline.
    pub async fn wait_until<F>(&self, done: F)
    where
        F: Fn(&EventLog) -> bool,
    {
        let wait = async {
            loop {
                let changed = self.changed.notified();
                if done(self) {
                    return;
                }
                changed.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(60), wait)
            .await
            .expect("condition not reached before the deadline");
    }

    pub async fn wait_for_frames(&self, frames: usize) {
        self.wait_until(|log| log.count(EventKind::FrameCaptured) >= frames)
            .await;
    }

    pub async fn wait_for_stopped(&self, runs: usize) {
        self.wait_until(|log| log.count(EventKind::ProcessingStopped) >= runs)
            .await;
    }
}
