//! Engagement heartbeats.
//!
//! Each tracked content unit gets its own session task. The task sleeps for
//! the delay returned by the [`IntervalCalculator`] (always evaluated against
//! the session start), then emits a heartbeat carrying the time since the
//! previous heartbeat (`inc`) and the time since the session started (`tt`).
//!
//! Sessions are keyed by content id. `stop` aborts the task and also raises
//! a cancellation flag that the task checks after every wake-up, so a
//! heartbeat whose timer already fired is still suppressed.

use crate::clock::Clock;
use crate::event_builder::heartbeat_event;
use crate::heartbeat::IntervalCalculator;
use beacon_types::Event;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Destination for events produced outside the host's own calls.
pub trait EventSink: Send + Sync {
    fn enqueue(&self, event: Event);
}

/// Timing state of one session, owned by its task.
#[derive(Debug, Clone)]
pub struct EngagementState {
    pub content_id: String,
    pub started_at: Instant,
    /// Active time since the session started, in whole milliseconds.
    pub total_time: Duration,
    /// Active time between the last two heartbeats.
    pub incremental_time: Duration,
}

impl EngagementState {
    pub fn new(content_id: impl Into<String>, started_at: Instant) -> Self {
        Self {
            content_id: content_id.into(),
            started_at,
            total_time: Duration::ZERO,
            incremental_time: Duration::ZERO,
        }
    }

    /// Advances the timings to `now`.
    ///
    /// Both values are truncated to milliseconds and `incremental_time` is
    /// derived from the change in `total_time`, so successive `tt` values
    /// differ by exactly `inc`.
    pub fn record_heartbeat(&mut self, now: Instant) {
        let total_ms = now.saturating_duration_since(self.started_at).as_millis() as u64;
        let total = Duration::from_millis(total_ms).max(self.total_time);
        self.incremental_time = total - self.total_time;
        self.total_time = total;
    }
}

struct Session {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Session {
    fn cancel(self) {
        self.cancelled.store(true, Ordering::Release);
        self.task.abort();
    }
}

/// Runs heartbeat sessions keyed by content id.
pub struct EngagementManager {
    runtime: Handle,
    sink: Arc<dyn EventSink>,
    calculator: Arc<dyn IntervalCalculator>,
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl EngagementManager {
    /// Session tasks are spawned on `runtime`, so `start` may be called
    /// from threads outside it.
    pub fn new(
        runtime: Handle,
        sink: Arc<dyn EventSink>,
        calculator: Arc<dyn IntervalCalculator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            runtime,
            sink,
            calculator,
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a fresh session, replacing any running one for the same id.
    pub fn start(&self, content_id: impl Into<String>, base_event: Event) {
        let content_id = content_id.into();
        let cancelled = Arc::new(AtomicBool::new(false));
        let task = self.runtime.spawn(run_session(
            EngagementState::new(content_id.clone(), Instant::now()),
            base_event,
            self.sink.clone(),
            self.calculator.clone(),
            self.clock.clone(),
            cancelled.clone(),
        ));

        let previous = self
            .lock_sessions()
            .insert(content_id.clone(), Session { cancelled, task });
        if let Some(previous) = previous {
            debug!("restarting engagement session for {content_id}");
            previous.cancel();
        } else {
            debug!("started engagement session for {content_id}");
        }
    }

    /// Stops the session for `content_id`. Returns false if none was running.
    pub fn stop(&self, content_id: &str) -> bool {
        let session = self.lock_sessions().remove(content_id);
        match session {
            Some(session) => {
                session.cancel();
                debug!("stopped engagement session for {content_id}");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let sessions: Vec<Session> = self.lock_sessions().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.cancel();
        }
    }

    pub fn is_running(&self, content_id: &str) -> bool {
        self.lock_sessions()
            .get(content_id)
            .is_some_and(|s| !s.task.is_finished())
    }

    pub fn active_count(&self) -> usize {
        self.lock_sessions().len()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EngagementManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn run_session(
    mut state: EngagementState,
    base_event: Event,
    sink: Arc<dyn EventSink>,
    calculator: Arc<dyn IntervalCalculator>,
    clock: Arc<dyn Clock>,
    cancelled: Arc<AtomicBool>,
) {
    loop {
        let delay = calculator.calculate(state.started_at);
        tokio::time::sleep(delay).await;
        if cancelled.load(Ordering::Acquire) {
            break;
        }

        state.record_heartbeat(Instant::now());
        debug!(
            "heartbeat for {}: inc={:?} tt={:?}",
            state.content_id, state.incremental_time, state.total_time
        );
        sink.enqueue(heartbeat_event(
            &base_event,
            state.incremental_time,
            state.total_time,
            clock.now_millis(),
        ));
    }
}
