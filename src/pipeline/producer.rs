use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::{Frame, SharedFrame};
use crate::intake::{FrameSource, SourceKind};
use crate::pipeline::services::{
    AnalysisExecutor, AnalysisHandle, EventHub, TickSignal, TriggerPolicy,
};
use crate::pipeline::types::{GrabberEvent, PipelineCounters};

/// Why the producer loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerExit {
    /// A stop was requested from outside.
    Stopped,
    /// A file source ran out of frames or failed to read.
    EndOfStream,
    /// The configured run duration elapsed.
    AutoStop,
}

impl ProducerExit {
    /// True when the loop ended on its own and the run still needs to be torn down.
    pub fn needs_stop(self) -> bool {
        !matches!(self, ProducerExit::Stopped)
    }
}

pub(crate) struct Producer<R> {
    pub source: Box<dyn FrameSource>,
    pub kind: SourceKind,
    pub signal: Arc<TickSignal>,
    pub cancel: CancellationToken,
    pub trigger: Arc<Mutex<TriggerPolicy>>,
    pub executor: Option<AnalysisExecutor<R>>,
    pub queue: mpsc::Sender<AnalysisHandle<R>>,
    pub events: Arc<EventHub<R>>,
    pub counters: Arc<PipelineCounters>,
    pub auto_stop_after: Option<Duration>,
}

impl<R: Send + 'static> Producer<R> {
    /// Grabs one frame per tick until stopped. Consumes the producer so the source and the
    /// queue sender are released on every exit path; dropping the sender finalizes the queue.
    pub async fn run(mut self) -> ProducerExit {
        let started = Instant::now();
        let mut index: u64 = 0;

        let exit = loop {
            debug!("Producer: waiting for timer to trigger frame-grab");
            if !self.signal.wait(&self.cancel).await {
                break ProducerExit::Stopped;
            }
            if let Some(limit) = self.auto_stop_after {
                if started.elapsed() >= limit {
                    info!("Producer: run reached its {:?} limit, stopping", limit);
                    break ProducerExit::AutoStop;
                }
            }

            let timestamp = Utc::now();
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break ProducerExit::Stopped,
                read = self.source.read_frame() => read,
            };
            let image = match read {
                Ok(image) => image,
                Err(e) if self.kind == SourceKind::File => {
                    info!("Producer: source finished ({}), stopping", e);
                    break ProducerExit::EndOfStream;
                }
                Err(e) => {
                    self.counters.read_failed();
                    warn!("Producer: live source read failed, retrying next tick: {}", e);
                    continue;
                }
            };

            let frame = Frame::new(image, index, timestamp).into_shared();
            index += 1;
            self.counters.frame_captured();
            self.events.publish(&GrabberEvent::FrameCaptured(frame.clone()));
            self.submit(frame);
        };

        // Wakes the timer too; nothing else will be captured for this run.
        self.cancel.cancel();
        debug!("Producer: exiting after {} frame(s): {:?}", index, exit);
        exit
    }

    fn submit(&self, frame: SharedFrame) {
        let Some(executor) = &self.executor else {
            return;
        };
        let selected = catch_unwind(AssertUnwindSafe(|| {
            self.trigger
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .should_analyze(&frame)
        }))
        .unwrap_or_else(|_| {
            error!("Producer: trigger policy panicked on frame {}", frame.index());
            false
        });
        if !selected {
            debug!("Producer: not analyzing frame {}", frame.index());
            return;
        }

        // Reserve first so a full queue drops the work before it is started.
        match self.queue.try_reserve() {
            Ok(permit) => {
                debug!("Producer: analyzing frame {}", frame.index());
                permit.send(executor.submit(frame));
                self.counters.frame_submitted();
            }
            Err(TrySendError::Full(())) => {
                self.counters.submission_dropped();
                warn!(
                    "Producer: dropping analysis of frame {}: result queue full",
                    frame.index()
                );
            }
            Err(TrySendError::Closed(())) => {
                warn!(
                    "Producer: result queue closed, frame {} not analyzed",
                    frame.index()
                );
            }
        }
    }
}
