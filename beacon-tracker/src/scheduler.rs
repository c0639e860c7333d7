//! Flush scheduling.
//!
//! A single control loop owns all flush timing decisions. Lifecycle signals
//! arrive in order on an unbounded command channel and are never dropped.
//! Enqueue notifications are coalesced into a single wakeup, so a burst of
//! tracked events costs the loop one iteration. Timer ticks come from an
//! interval the loop arms and disarms itself:
//! - **Enqueue / Foreground**: arm the timer if work is pending
//! - **TimerTick**: flush every `flush_interval` while armed
//! - **Background**: flush immediately unless inside the debounce window
//! - **Shutdown**: one last flush, then stop for good
//!
//! The timer is disarmed whenever a flush leaves the queue empty.

use crate::error::{TrackerError, TrackerResult};
use crate::queue::{EventQueue, FlushOutcome};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// Inputs to the scheduler's control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// The host app came to the foreground.
    Foreground,
    /// The host app moved to the background.
    Background,
    /// An event was added to the queue.
    Enqueue,
    /// The flush interval elapsed.
    TimerTick,
    /// Stop the scheduler.
    Shutdown,
}

/// Lifecycle of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No timer armed; nothing pending.
    Idle,
    /// Timer armed.
    Scheduled,
    Flushing,
    Stopped,
}

/// Handle for feeding events into a running [`FlushScheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::UnboundedSender<SchedulerEvent>,
    enqueued: Arc<Notify>,
}

impl SchedulerHandle {
    /// Delivers an event without waiting.
    ///
    /// `Enqueue` only stores a wakeup permit; any number of them before the
    /// loop runs collapse into one. Every other event is queued in order.
    pub fn notify(&self, event: SchedulerEvent) -> TrackerResult<()> {
        if event == SchedulerEvent::Enqueue {
            if !self.is_running() {
                return Err(TrackerError::SchedulerStopped);
            }
            self.enqueued.notify_one();
            return Ok(());
        }
        self.command_tx
            .send(event)
            .map_err(|_| TrackerError::SchedulerStopped)
    }

    /// Asks the scheduler to flush once more and stop.
    pub fn shutdown(&self) -> TrackerResult<()> {
        self.notify(SchedulerEvent::Shutdown)
    }

    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }
}

/// The flush control loop. Run it with [`FlushScheduler::run`].
pub struct FlushScheduler {
    queue: Arc<EventQueue>,
    command_rx: mpsc::UnboundedReceiver<SchedulerEvent>,
    enqueued: Arc<Notify>,
    flush_interval: Duration,
    debounce_window: Duration,
    /// Earliest time a background flush may fire again.
    debounce_until: Option<Instant>,
    timer: Option<Interval>,
    state: SchedulerState,
}

/// Creates a scheduler over `queue` and the handle that drives it.
pub fn create_flush_scheduler(
    queue: Arc<EventQueue>,
    flush_interval: Duration,
    debounce_window: Duration,
) -> (SchedulerHandle, FlushScheduler) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let enqueued = Arc::new(Notify::new());
    let scheduler = FlushScheduler {
        queue,
        command_rx,
        enqueued: enqueued.clone(),
        flush_interval,
        debounce_window,
        debounce_until: None,
        timer: None,
        state: SchedulerState::Idle,
    };
    (
        SchedulerHandle {
            command_tx,
            enqueued,
        },
        scheduler,
    )
}

impl FlushScheduler {
    /// Runs the control loop until `Shutdown` or until every handle is dropped.
    pub async fn run(mut self) {
        info!(
            "flush scheduler started (interval {:?}, debounce {:?})",
            self.flush_interval, self.debounce_window
        );

        // Events restored from a previous run go out on the first tick.
        if !self.queue.is_empty() {
            self.arm_timer();
        }

        loop {
            let event = tokio::select! {
                _ = next_tick(&mut self.timer) => SchedulerEvent::TimerTick,
                _ = self.enqueued.notified() => SchedulerEvent::Enqueue,
                received = self.command_rx.recv() => match received {
                    Some(event) => event,
                    None => {
                        info!("scheduler channel closed, stopping");
                        SchedulerEvent::Shutdown
                    }
                },
            };

            if self.handle(event).await.is_break() {
                break;
            }
        }

        self.command_rx.close();
        self.timer = None;
        self.state = SchedulerState::Stopped;
        info!("flush scheduler stopped");
    }

    /// Applies one event to the scheduler state.
    pub async fn handle(&mut self, event: SchedulerEvent) -> ControlFlow<()> {
        if self.state == SchedulerState::Stopped {
            return ControlFlow::Break(());
        }

        match event {
            SchedulerEvent::Enqueue => {
                if self.timer.is_none() {
                    self.arm_timer();
                }
            }
            SchedulerEvent::Foreground => {
                debug!("app in foreground");
                if self.timer.is_none() && !self.queue.is_empty() {
                    self.arm_timer();
                }
            }
            SchedulerEvent::Background => {
                let now = Instant::now();
                if self.debounce_until.is_some_and(|until| now < until) {
                    debug!("background flush suppressed by debounce window");
                } else {
                    self.debounce_until = Some(now + self.debounce_window);
                    debug!("app in background, flushing");
                    self.flush().await;
                }
            }
            SchedulerEvent::TimerTick => {
                self.flush().await;
            }
            SchedulerEvent::Shutdown => {
                info!("flush scheduler stopping");
                self.flush().await;
                self.timer = None;
                self.state = SchedulerState::Stopped;
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    async fn flush(&mut self) -> FlushOutcome {
        self.state = SchedulerState::Flushing;
        let outcome = self.queue.flush().await;
        debug!("flush finished: {outcome:?}");

        if self.queue.is_empty() {
            self.timer = None;
            self.state = SchedulerState::Idle;
        } else {
            if self.timer.is_none() {
                self.arm_timer();
            }
            self.state = SchedulerState::Scheduled;
        }
        outcome
    }

    fn arm_timer(&mut self) {
        let mut timer =
            tokio::time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
        self.state = SchedulerState::Scheduled;
        debug!("flush timer armed ({:?})", self.flush_interval);
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
