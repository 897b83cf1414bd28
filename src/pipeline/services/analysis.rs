use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::common::SharedFrame;
use crate::error::AnalysisError;
use crate::pipeline::types::{AnalysisOutcome, ResultEnvelope};

/// Origin reported when the failure came from the executor rather than the analyzer.
pub const EXECUTOR_ORIGIN: &str = "executor";

/// The expensive per-frame analysis capability injected by the caller.
#[async_trait]
pub trait FrameAnalyzer: Send + Sync {
    type Output: Send + 'static;

    async fn analyze(&self, frame: SharedFrame) -> Result<Self::Output, AnalysisError>;
}

/// Adapts an async closure into a [`FrameAnalyzer`].
pub struct FnAnalyzer<F> {
    analyze: F,
}

pub fn analyzer_fn<F, Fut, R>(analyze: F) -> FnAnalyzer<F>
where
    F: Fn(SharedFrame) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, AnalysisError>> + Send + 'static,
    R: Send + 'static,
{
    FnAnalyzer { analyze }
}

#[async_trait]
impl<F, Fut, R> FrameAnalyzer for FnAnalyzer<F>
where
    F: Fn(SharedFrame) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, AnalysisError>> + Send + 'static,
    R: Send + 'static,
{
    type Output = R;

    async fn analyze(&self, frame: SharedFrame) -> Result<R, AnalysisError> {
        (self.analyze)(frame).await
    }
}

pub type SharedAnalyzer<R> = Arc<dyn FrameAnalyzer<Output = R>>;

/// Runs one analysis call per submitted frame, racing each against a deadline.
pub struct AnalysisExecutor<R> {
    analyzer: SharedAnalyzer<R>,
    timeout: Duration,
    cancel_on_timeout: bool,
}

impl<R: Send + 'static> AnalysisExecutor<R> {
    pub fn new(analyzer: SharedAnalyzer<R>, timeout: Duration, cancel_on_timeout: bool) -> Self {
        Self {
            analyzer,
            timeout,
            cancel_on_timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts the analysis immediately and returns without waiting for it.
    pub fn submit(&self, frame: SharedFrame) -> AnalysisHandle<R> {
        let analyzer = self.analyzer.clone();
        let timeout = self.timeout;
        let cancel_on_timeout = self.cancel_on_timeout;
        let task_frame = frame.clone();
        let task = tokio::spawn(async move {
            race_analysis(analyzer, task_frame, timeout, cancel_on_timeout).await
        });
        AnalysisHandle {
            frame,
            submitted_at: Instant::now(),
            task,
        }
    }
}

async fn race_analysis<R: Send + 'static>(
    analyzer: SharedAnalyzer<R>,
    frame: SharedFrame,
    timeout: Duration,
    cancel_on_timeout: bool,
) -> ResultEnvelope<R> {
    let started = Instant::now();
    let index = frame.index();
    let call_frame = frame.clone();
    let mut call = tokio::spawn(async move { analyzer.analyze(call_frame).await });

    let outcome = tokio::select! {
        joined = &mut call => match joined {
            Ok(Ok(value)) => {
                debug!("Analysis of frame {} completed in {:?}", index, started.elapsed());
                AnalysisOutcome::Completed(value)
            }
            Ok(Err(e)) => {
                error!("Analysis of frame {} failed: {}", index, e);
                AnalysisOutcome::Failed(e)
            }
            Err(e) => {
                error!("Analysis of frame {} did not finish: {}", index, e);
                AnalysisOutcome::Failed(join_failure(e))
            }
        },
        _ = tokio::time::sleep(timeout) => {
            warn!("Analysis of frame {} timed out after {:?}", index, timeout);
            if cancel_on_timeout {
                call.abort();
            }
            AnalysisOutcome::TimedOut
        }
    };

    ResultEnvelope::new(frame, outcome, started.elapsed())
}

fn join_failure(err: JoinError) -> AnalysisError {
    if err.is_panic() {
        AnalysisError::new(EXECUTOR_ORIGIN, panic_message(err.into_panic()))
    } else {
        AnalysisError::new(EXECUTOR_ORIGIN, err.to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("analyzer panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("analyzer panicked: {}", message)
    } else {
        "analyzer panicked".to_string()
    }
}

/// A pending (or finished) analysis for one frame. Resolving it always yields an envelope.
pub struct AnalysisHandle<R> {
    frame: SharedFrame,
    submitted_at: Instant,
    task: JoinHandle<ResultEnvelope<R>>,
}

impl<R> AnalysisHandle<R> {
    pub fn frame_index(&self) -> u64 {
        self.frame.index()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn resolve(self) -> ResultEnvelope<R> {
        match self.task.await {
            Ok(envelope) => envelope,
            Err(e) => ResultEnvelope::new(
                self.frame,
                AnalysisOutcome::Failed(join_failure(e)),
                self.submitted_at.elapsed(),
            ),
        }
    }
}
