use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Single-slot tick flag shared by the timer and the producer loop.
/// Firing while the slot is still set counts as a missed tick instead of queueing another one.
#[derive(Debug, Default)]
pub struct TickSignal {
    slot: Mutex<bool>,
    notify: Notify,
    fired: AtomicU64,
    missed: AtomicU64,
}

impl TickSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the slot. Returns false when the previous tick was never consumed.
    pub fn fire(&self) -> bool {
        let was_set = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, true)
        };
        let tick = self.fired.fetch_add(1, Ordering::Relaxed);
        if was_set {
            self.missed.fetch_add(1, Ordering::Relaxed);
            warn!("Timer: missed frame-grab {}", tick.saturating_sub(1));
        }
        self.notify.notify_one();
        !was_set
    }

    /// Clears the slot, returning whether a tick was pending.
    pub fn take(&self) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, false)
    }

    /// Waits for the next tick. Returns false as soon as `cancel` fires, even if a tick is pending.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        loop {
            let notified = self.notify.notified();
            if cancel.is_cancelled() {
                return false;
            }
            if self.take() {
                return true;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = notified => {}
            }
        }
    }

    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }
}

/// Cloneable handle used to change the period of a running timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    period_tx: watch::Sender<Duration>,
}

impl TimerHandle {
    /// Takes effect on the next fire.
    pub fn reconfigure(&self, period: Duration) {
        self.period_tx.send_replace(period.max(MIN_PERIOD));
    }

    pub fn period(&self) -> Duration {
        *self.period_tx.borrow()
    }
}

/// Periodically sets a [`TickSignal`] until cancelled. The first tick fires immediately.
pub struct Timer {
    handle: TimerHandle,
    task: JoinHandle<()>,
}

impl Timer {
    pub fn start(period: Duration, signal: Arc<TickSignal>, cancel: CancellationToken) -> Self {
        let period = period.max(MIN_PERIOD);
        let (period_tx, mut period_rx) = watch::channel(period);
        let task = tokio::spawn(async move {
            let mut ticker = Self::ticker(interval(period));
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    changed = period_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let period = *period_rx.borrow_and_update();
                        debug!("Timer: period changed to {:?}", period);
                        ticker = Self::ticker(interval_at(Instant::now() + period, period));
                    }
                    _ = ticker.tick() => {
                        signal.fire();
                    }
                }
            }
            debug!("Timer: stopped after {} tick(s)", signal.fired());
        });

        Self {
            handle: TimerHandle { period_tx },
            task,
        }
    }

    fn ticker(mut ticker: Interval) -> Interval {
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    pub fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }

    /// Waits for the timer task to exit. The caller cancels the token first.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Timer task ended abnormally: {}", e);
        }
    }
}
