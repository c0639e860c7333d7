//! Shared test doubles for tracker integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use beacon_storage::DurableOverflowStore;
use beacon_tracker::clock::Clock;
use beacon_tracker::engagement::EventSink;
use beacon_tracker::transport::EventTransport;
use beacon_tracker::{Event, EventAction, EventQueue, TrackerError, TrackerResult};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

pub const SITE_ID: &str = "site-123";

/// Transport that records every batch and succeeds unless told to fail.
#[derive(Default)]
pub struct RecordingTransport {
    batches: Mutex<Vec<Vec<Event>>>,
    /// Status to reject with; zero means accept.
    reject_status: AtomicU16,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails every batch with a retryable 503.
    pub fn failing() -> Arc<Self> {
        Self::rejecting(503)
    }

    pub fn rejecting(status: u16) -> Arc<Self> {
        let transport = Self::default();
        transport.reject_status.store(status, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn set_failing(&self, failing: bool) {
        let status = if failing { 503 } else { 0 };
        self.reject_status.store(status, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl EventTransport for RecordingTransport {
    async fn send(&self, events: &[Event]) -> TrackerResult<()> {
        self.batches.lock().unwrap().push(events.to_vec());
        let status = self.reject_status.load(Ordering::SeqCst);
        if status != 0 {
            return Err(TrackerError::Rejected { status });
        }
        Ok(())
    }
}

/// Transport that blocks inside `send` until released.
#[derive(Default)]
pub struct GatedTransport {
    pub entered: Notify,
    pub release: Notify,
    pub sent: Mutex<Vec<Vec<Event>>>,
}

#[async_trait]
impl EventTransport for GatedTransport {
    async fn send(&self, events: &[Event]) -> TrackerResult<()> {
        self.entered.notify_one();
        self.release.notified().await;
        self.sent.lock().unwrap().push(events.to_vec());
        Ok(())
    }
}

/// Sink that keeps every event it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn enqueue(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}

pub fn pageview(n: usize) -> Event {
    Event::builder(EventAction::Pageview, SITE_ID)
        .field("url", format!("https://example.com/{n}"))
        .build()
}

pub fn url_of(event: &Event) -> &str {
    event.get("url").and_then(|v| v.as_str()).unwrap_or_default()
}

pub fn open_queue(
    dir: &TempDir,
    transport: Arc<dyn EventTransport>,
    queue_limit: usize,
    storage_limit: usize,
) -> EventQueue {
    let store = DurableOverflowStore::open(dir.path().join("events.json"), storage_limit).unwrap();
    EventQueue::new(store, transport, queue_limit)
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
