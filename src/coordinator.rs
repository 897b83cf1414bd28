use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::common::{Frame, SharedFrame};
use crate::config::{frame_period, millis_ceil, GrabberConfig};
use crate::error::GrabberError;
use crate::intake::{probe_device_count, CaptureBackend, SourceId};
use crate::pipeline::consumer::run_consumer;
use crate::pipeline::producer::{Producer, ProducerExit};
use crate::pipeline::services::{
    AnalysisExecutor, EventHub, FrameAnalyzer, SharedAnalyzer, TickSignal, Timer, TimerHandle,
    TriggerPolicy,
};
use crate::pipeline::types::{
    EventKind, GrabberEvent, GrabberStats, PipelineCounters, PipelineState, ResultEnvelope,
    SubscriptionId,
};

// Analyses that can be pending at once when every frame is triggered and each call runs
// until its timeout.
fn worst_case_pending(period: Duration, timeout: Duration) -> u128 {
    timeout.as_nanos().div_ceil(period.as_nanos().max(1))
}

/// Pieces of the active run that synchronous accessors need.
#[derive(Clone)]
struct RunView {
    generation: u64,
    source: SourceId,
    cancel: CancellationToken,
    timer: TimerHandle,
    signal: Arc<TickSignal>,
    frame_size: (u32, u32),
}

struct ActiveRun {
    generation: u64,
    source: SourceId,
    cancel: CancellationToken,
    timer: Timer,
    producer: JoinHandle<ProducerExit>,
    consumer: JoinHandle<u64>,
}

struct RunSettings {
    frame_rate: f64,
    analysis_timeout: Duration,
}

struct Inner<R> {
    backend: Arc<dyn CaptureBackend>,
    config: GrabberConfig,
    events: Arc<EventHub<R>>,
    trigger: Arc<StdMutex<TriggerPolicy>>,
    analyzer: StdMutex<Option<SharedAnalyzer<R>>>,
    settings: StdMutex<RunSettings>,
    // Serializes start and stop; whoever holds it owns the run.
    run: Mutex<Option<ActiveRun>>,
    view: StdMutex<Option<RunView>>,
    state: watch::Sender<PipelineState>,
    generation: AtomicU64,
    camera_count: StdMutex<Option<usize>>,
    counters: Arc<PipelineCounters>,
}

impl<R: Send + 'static> Inner<R> {
    fn view(&self) -> Option<RunView> {
        self.view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stops the active run. With a generation, only that particular run is stopped.
    async fn stop(&self, generation: Option<u64>) {
        let mut run = self.run.lock().await;
        let matches = run
            .as_ref()
            .is_some_and(|active| generation.map_or(true, |g| g == active.generation));
        if !matches {
            return;
        }
        if let Some(active) = run.take() {
            self.shutdown(active).await;
        }
    }

    async fn shutdown(&self, active: ActiveRun) {
        info!("Stopping processing of {}", active.source);
        self.state.send_replace(PipelineState::Stopping);
        self.events.publish(&GrabberEvent::ProcessingStopping);

        active.cancel.cancel();
        match active.producer.await {
            Ok(exit) => debug!("Producer finished: {:?}", exit),
            Err(e) => error!("Producer task failed: {}", e),
        }
        active.timer.join().await;
        match active.consumer.await {
            Ok(delivered) => debug!("Consumer drained after {} result(s)", delivered),
            Err(e) => error!("Consumer task failed: {}", e),
        }

        *self.view.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.state.send_replace(PipelineState::Idle);
        self.events.publish(&GrabberEvent::ProcessingStopped);
        info!("Stopped processing of {}", active.source);
    }

    fn launch(
        self: &Arc<Self>,
        run: &mut Option<ActiveRun>,
        source_id: SourceId,
        frame_rate: Option<f64>,
    ) -> Result<(), GrabberError> {
        self.state.send_replace(PipelineState::Starting);
        let source = match self.backend.open(&source_id) {
            Ok(source) => source,
            Err(e) => {
                error!("Failed to open {}: {}", source_id, e);
                self.state.send_replace(PipelineState::Idle);
                return Err(e.into());
            }
        };

        let frame_rate = frame_rate
            .or_else(|| source.frame_rate().filter(|rate| frame_period(*rate).is_ok()))
            .unwrap_or(self.config.default_frame_rate);
        let period = match frame_period(frame_rate) {
            Ok(period) => period,
            Err(e) => {
                error!("Cannot capture {} at {} fps: {}", source_id, frame_rate, e);
                self.state.send_replace(PipelineState::Idle);
                return Err(e);
            }
        };
        self.events.publish(&GrabberEvent::ProcessingStarting);
        let frame_size = (source.frame_width(), source.frame_height());
        let analysis_timeout = {
            let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
            settings.frame_rate = frame_rate;
            settings.analysis_timeout
        };

        self.trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        self.counters.reset();

        let executor = self
            .analyzer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .map(|analyzer| {
                AnalysisExecutor::new(analyzer, analysis_timeout, self.config.cancel_on_timeout)
            });
        if executor.is_none() {
            warn!("No analyzer set, frames from {} will not be analyzed", source_id);
        } else {
            let pending = worst_case_pending(period, analysis_timeout);
            if pending > self.config.max_pending_analyses as u128 {
                warn!(
                    "Result queue holds {} analyses but up to {} may be pending at {:.1} fps \
                     with a {:?} timeout; triggered frames beyond that will not be analyzed",
                    self.config.max_pending_analyses, pending, frame_rate, analysis_timeout
                );
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let signal = Arc::new(TickSignal::new());
        let (queue_tx, queue_rx) = mpsc::channel(self.config.max_pending_analyses);

        let consumer = tokio::spawn(run_consumer(
            queue_rx,
            self.events.clone(),
            self.counters.clone(),
        ));

        let producer = Producer {
            source,
            kind: source_id.kind(),
            signal: signal.clone(),
            cancel: cancel.clone(),
            trigger: self.trigger.clone(),
            executor,
            queue: queue_tx,
            events: self.events.clone(),
            counters: self.counters.clone(),
            auto_stop_after: self.config.auto_stop_after(),
        };
        let owner = Arc::downgrade(self);
        let producer = tokio::spawn(async move {
            let exit = producer.run().await;
            if exit.needs_stop() {
                schedule_stop(owner, generation);
            }
            exit
        });

        let timer = Timer::start(period, signal.clone(), cancel.clone());

        *self.view.lock().unwrap_or_else(PoisonError::into_inner) = Some(RunView {
            generation,
            source: source_id.clone(),
            cancel: cancel.clone(),
            timer: timer.handle(),
            signal,
            frame_size,
        });
        *run = Some(ActiveRun {
            generation,
            source: source_id.clone(),
            cancel,
            timer,
            producer,
            consumer,
        });

        self.state.send_replace(PipelineState::Running);
        self.events.publish(&GrabberEvent::ProcessingStarted);
        info!(
            "Started processing {} at {:.1} fps ({}x{})",
            source_id, frame_rate, frame_size.0, frame_size.1
        );
        Ok(())
    }
}

impl<R> Drop for Inner<R> {
    fn drop(&mut self) {
        let view = self
            .view
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(view) = view {
            view.cancel.cancel();
        }
    }
}

// Tears a run down from a detached task, used when the run ends itself.
fn schedule_stop<R: Send + 'static>(owner: Weak<Inner<R>>, generation: u64) {
    tokio::spawn(async move {
        if let Some(inner) = owner.upgrade() {
            inner.stop(Some(generation)).await;
        }
    });
}

/// Captures frames from one source at a steady rate, analyzes the frames selected by the
/// trigger policy, and publishes results in the order the frames were submitted.
///
/// Cloning yields another handle to the same grabber.
pub struct FrameGrabber<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for FrameGrabber<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Send + 'static> FrameGrabber<R> {
    pub fn builder() -> FrameGrabberBuilder<R> {
        FrameGrabberBuilder::new(GrabberConfig::default())
    }

    /// Starts capturing from a camera, stopping any other source first.
    /// Without `frame_rate` the camera's own rate is used, then the configured default.
    pub async fn start_camera(
        &self,
        index: usize,
        frame_rate: Option<f64>,
    ) -> Result<(), GrabberError> {
        self.start(SourceId::Camera(index), frame_rate).await
    }

    /// Plays back a file source. The run stops by itself at the end of the file.
    pub async fn start_file(&self, path: impl Into<PathBuf>) -> Result<(), GrabberError> {
        self.start(SourceId::File(path.into()), None).await
    }

    /// Starting the source that is already running is a no-op.
    #[instrument(skip(self))]
    pub async fn start(
        &self,
        source: SourceId,
        frame_rate: Option<f64>,
    ) -> Result<(), GrabberError> {
        if let Some(rate) = frame_rate {
            frame_period(rate)?;
        }

        let mut run = self.inner.run.lock().await;
        if let Some(active) = run.as_ref() {
            if active.source == source && !active.cancel.is_cancelled() {
                debug!("Already processing {}, ignoring start", source);
                return Ok(());
            }
        }
        if let Some(active) = run.take() {
            self.inner.shutdown(active).await;
        }
        self.inner.launch(&mut run, source, frame_rate)
    }

    /// Stops the current run and waits until every queued analysis has been delivered.
    /// Safe to call repeatedly or concurrently; the drain happens once.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.inner.stop(None).await;
    }

    /// Non-blocking stop, safe to call from inside an event handler. Must be called from
    /// within the tokio runtime. Returns false when nothing was running.
    pub fn request_stop(&self) -> bool {
        request_stop(&self.inner)
    }

    /// A handle that can request a stop without keeping the grabber alive.
    pub fn stop_handle(&self) -> StopHandle<R> {
        StopHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of cameras the backend can open. Probes each device the first time, so it is
    /// refused while a run is active until a count has been cached.
    pub fn get_camera_count(&self) -> Result<usize, GrabberError> {
        let mut cached = self
            .inner
            .camera_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = *cached {
            return Ok(count);
        }
        if self.state().is_active() {
            return Err(GrabberError::Busy);
        }
        let count = probe_device_count(
            self.inner.backend.as_ref(),
            self.inner.config.camera_probe_limit,
        );
        *cached = Some(count);
        Ok(count)
    }

    pub fn set_trigger(&self, policy: TriggerPolicy) {
        *self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = policy;
    }

    pub fn set_trigger_interval(&self, interval: Duration) {
        self.set_trigger(TriggerPolicy::interval(interval));
    }

    pub fn set_trigger_predicate<F>(&self, predicate: F)
    where
        F: FnMut(&Frame, bool) -> bool + Send + 'static,
    {
        self.set_trigger(TriggerPolicy::predicate(predicate));
    }

    /// Replaces the analysis capability. A running pipeline keeps the one it started with.
    pub fn set_analyzer<A>(&self, analyzer: A)
    where
        A: FrameAnalyzer<Output = R> + 'static,
    {
        self.set_shared_analyzer(Arc::new(analyzer));
    }

    pub fn set_shared_analyzer(&self, analyzer: SharedAnalyzer<R>) {
        *self
            .inner
            .analyzer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(analyzer);
    }

    pub fn clear_analyzer(&self) {
        *self
            .inner
            .analyzer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Applies to runs started afterwards.
    pub fn set_analysis_timeout(&self, timeout: Duration) -> Result<(), GrabberError> {
        if timeout.is_zero() {
            return Err(GrabberError::InvalidConfig(
                "analysis timeout must be greater than 0".to_string(),
            ));
        }
        self.inner
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .analysis_timeout = timeout;
        Ok(())
    }

    pub fn analysis_timeout(&self) -> Duration {
        self.inner
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .analysis_timeout
    }

    /// Changes the capture rate. A running timer picks it up on its next fire.
    pub fn set_frame_rate(&self, frame_rate: f64) -> Result<(), GrabberError> {
        let period = frame_period(frame_rate)?;
        self.inner
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frame_rate = frame_rate;
        if let Some(view) = self.inner.view() {
            view.timer.reconfigure(period);
        }
        Ok(())
    }

    pub fn frame_rate(&self) -> f64 {
        self.inner
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frame_rate
    }

    /// Width and height reported by the open source.
    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.inner.view().map(|view| view.frame_size)
    }

    pub fn current_source(&self) -> Option<SourceId> {
        self.inner.view().map(|view| view.source)
    }

    pub fn state(&self) -> PipelineState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.inner.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    /// Ticks of the current run that fired while the previous one was still pending.
    pub fn missed_ticks(&self) -> u64 {
        self.inner
            .view()
            .map(|view| view.signal.missed())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> GrabberStats {
        self.inner.counters.snapshot()
    }

    pub fn events(&self) -> &EventHub<R> {
        &self.inner.events
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&GrabberEvent<R>) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn on_frame_captured<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SharedFrame) + Send + Sync + 'static,
    {
        self.inner.events.on_frame_captured(handler)
    }

    pub fn on_result_available<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ResultEnvelope<R>) + Send + Sync + 'static,
    {
        self.inner.events.on_result_available(handler)
    }

    pub fn on_processing_starting<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .events
            .on_lifecycle(EventKind::ProcessingStarting, handler)
    }

    pub fn on_processing_started<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .events
            .on_lifecycle(EventKind::ProcessingStarted, handler)
    }

    pub fn on_processing_stopping<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .events
            .on_lifecycle(EventKind::ProcessingStopping, handler)
    }

    pub fn on_processing_stopped<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .events
            .on_lifecycle(EventKind::ProcessingStopped, handler)
    }
}

fn request_stop<R: Send + 'static>(inner: &Arc<Inner<R>>) -> bool {
    match inner.view() {
        Some(view) => {
            view.cancel.cancel();
            schedule_stop(Arc::downgrade(inner), view.generation);
            true
        }
        None => false,
    }
}

/// Weak stop trigger, handy inside event handlers.
pub struct StopHandle<R> {
    inner: Weak<Inner<R>>,
}

impl<R> Clone for StopHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Send + 'static> StopHandle<R> {
    pub fn request_stop(&self) -> bool {
        self.inner
            .upgrade()
            .map(|inner| request_stop(&inner))
            .unwrap_or(false)
    }
}

pub struct FrameGrabberBuilder<R> {
    configuration: GrabberConfig,
    backend: Option<Arc<dyn CaptureBackend>>,
    analyzer: Option<SharedAnalyzer<R>>,
    trigger: Option<TriggerPolicy>,
}

impl<R: Send + 'static> FrameGrabberBuilder<R> {
    pub fn new(configuration: GrabberConfig) -> Self {
        Self {
            configuration,
            backend: None,
            analyzer: None,
            trigger: None,
        }
    }

    pub fn backend<B>(mut self, backend: B) -> Self
    where
        B: CaptureBackend + 'static,
    {
        self.backend = Some(Arc::new(backend));
        self
    }

    pub fn shared_backend(mut self, backend: Arc<dyn CaptureBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    // Replaces the whole configuration, including values set earlier on the builder.
    pub fn configuration(mut self, configuration: GrabberConfig) -> Self {
        self.configuration = configuration;
        self
    }

    // Sets the analysis timeout, this will override the default configuration.
    pub fn analysis_timeout(mut self, timeout: Duration) -> Self {
        self.configuration.analysis_timeout_ms = millis_ceil(timeout);
        self
    }

    // Sets the fallback frame rate, this will override the default configuration.
    pub fn default_frame_rate(mut self, frame_rate: f64) -> Self {
        self.configuration.default_frame_rate = frame_rate;
        self
    }

    // Adjusts the result queue size, this will override the default configuration.
    pub fn max_pending_analyses(mut self, max_pending: usize) -> Self {
        self.configuration.max_pending_analyses = max_pending;
        self
    }

    pub fn cancel_on_timeout(mut self, cancel: bool) -> Self {
        self.configuration.cancel_on_timeout = cancel;
        self
    }

    pub fn auto_stop_after(mut self, limit: Duration) -> Self {
        self.configuration.auto_stop_after_ms = Some(millis_ceil(limit));
        self
    }

    pub fn analyzer<A>(mut self, analyzer: A) -> Self
    where
        A: FrameAnalyzer<Output = R> + 'static,
    {
        self.analyzer = Some(Arc::new(analyzer));
        self
    }

    // Without a trigger the grabber analyzes on the configured interval.
    pub fn trigger(mut self, trigger: TriggerPolicy) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn build(self) -> Result<FrameGrabber<R>, GrabberError> {
        let backend = self.backend.ok_or_else(|| {
            GrabberError::InvalidConfig("capture backend not set".to_string())
        })?;
        self.configuration.validate()?;

        let trigger = self
            .trigger
            .unwrap_or_else(|| TriggerPolicy::interval(self.configuration.analysis_interval()));
        let (state, _) = watch::channel(PipelineState::Idle);
        let settings = RunSettings {
            frame_rate: self.configuration.default_frame_rate,
            analysis_timeout: self.configuration.analysis_timeout(),
        };

        Ok(FrameGrabber {
            inner: Arc::new(Inner {
                backend,
                config: self.configuration,
                events: Arc::new(EventHub::new()),
                trigger: Arc::new(StdMutex::new(trigger)),
                analyzer: StdMutex::new(self.analyzer),
                settings: StdMutex::new(settings),
                run: Mutex::new(None),
                view: StdMutex::new(None),
                state,
                generation: AtomicU64::new(0),
                camera_count: StdMutex::new(None),
                counters: Arc::new(PipelineCounters::default()),
            }),
        })
    }
}
