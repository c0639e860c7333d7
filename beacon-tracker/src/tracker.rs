//! Host-facing tracker.
//!
//! Owns the event queue, the flush scheduler task and two engagement
//! managers (pages and videos). Tracking calls never fail: invalid input
//! and internal errors are logged and the call becomes a no-op.

use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::engagement::{EngagementManager, EventSink};
use crate::error::{TrackerError, TrackerResult};
use crate::event_builder::EventBuilder;
use crate::heartbeat::{BackoffIntervalCalculator, IntervalCalculator};
use crate::queue::{EventQueue, FlushOutcome};
use crate::scheduler::{create_flush_scheduler, SchedulerEvent, SchedulerHandle};
use crate::transport::{DryRunTransport, EventTransport, HttpTransport};
use beacon_types::{ContentMetadata, Event, EventAction, VideoMetadata};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Routes events into the queue and wakes the scheduler.
struct QueueSink {
    queue: Arc<EventQueue>,
    scheduler: SchedulerHandle,
}

impl EventSink for QueueSink {
    fn enqueue(&self, event: Event) {
        self.queue.enqueue(event);
        if let Err(e) = self.scheduler.notify(SchedulerEvent::Enqueue) {
            debug!("event queued while scheduler is down: {e}");
        }
    }
}

#[derive(Debug, Clone)]
struct LastPageview {
    url: String,
    pageview_id: String,
}

#[derive(Debug, Clone)]
struct CurrentVideo {
    video_id: String,
    url: String,
}

/// The telemetry tracker a host application talks to.
pub struct Tracker {
    config: TrackerConfig,
    queue: Arc<EventQueue>,
    sink: Arc<QueueSink>,
    scheduler: SchedulerHandle,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
    builder: EventBuilder,
    engagement: EngagementManager,
    video_engagement: EngagementManager,
    last_pageview: Mutex<Option<LastPageview>>,
    current_video: Mutex<Option<CurrentVideo>>,
}

impl Tracker {
    /// Creates a tracker sending to `config.collector_url` (or logging only,
    /// in dry-run mode).
    ///
    /// Must be called from within a Tokio runtime; background work stays on
    /// that runtime, and the tracking calls may then come from any thread.
    pub fn new(config: TrackerConfig) -> TrackerResult<Self> {
        config.validate()?;
        let transport: Arc<dyn EventTransport> = if config.dry_run {
            Arc::new(DryRunTransport)
        } else {
            Arc::new(HttpTransport::new(config.collector_url.clone())?)
        };
        Self::with_transport(config, transport)
    }

    /// Creates a tracker with a caller-supplied transport.
    pub fn with_transport(
        config: TrackerConfig,
        transport: Arc<dyn EventTransport>,
    ) -> TrackerResult<Self> {
        Self::from_parts(
            config,
            transport,
            Arc::new(BackoffIntervalCalculator),
            Arc::new(SystemClock),
        )
    }

    /// Creates a tracker from explicit components.
    pub fn from_parts(
        config: TrackerConfig,
        transport: Arc<dyn EventTransport>,
        calculator: Arc<dyn IntervalCalculator>,
        clock: Arc<dyn Clock>,
    ) -> TrackerResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| TrackerError::NoRuntime)?;

        let queue = Arc::new(EventQueue::open(&config, transport));
        let (scheduler, flush_scheduler) = create_flush_scheduler(
            queue.clone(),
            config.flush_interval(),
            config.debounce_window(),
        );
        let scheduler_task = runtime.spawn(flush_scheduler.run());

        let sink = Arc::new(QueueSink {
            queue: queue.clone(),
            scheduler: scheduler.clone(),
        });
        let engagement = EngagementManager::new(
            runtime.clone(),
            sink.clone(),
            calculator.clone(),
            clock.clone(),
        );
        let video_engagement =
            EngagementManager::new(runtime, sink.clone(), calculator, clock.clone());

        info!("tracker initialized for site {}", config.site_id);
        Ok(Self {
            builder: EventBuilder::new(config.site_id.clone(), clock),
            config,
            queue,
            sink,
            scheduler,
            scheduler_task: Mutex::new(Some(scheduler_task)),
            engagement,
            video_engagement,
            last_pageview: Mutex::new(None),
            current_video: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    // ── Pageviews and engagement ──

    /// Records a pageview of `url`, tagged with a fresh pageview id.
    pub fn track_pageview(
        &self,
        url: &str,
        url_ref: Option<&str>,
        metadata: Option<&ContentMetadata>,
        extra_data: Option<Map<String, Value>>,
    ) {
        if url.trim().is_empty() {
            warn!("track_pageview: url must not be empty");
            return;
        }

        let pageview_id = Uuid::new_v4().to_string();
        let event = self.builder.build(
            EventAction::Pageview,
            url,
            url_ref,
            Some(pageview_id.as_str()),
            metadata.map(ContentMetadata::to_value),
            extra_data,
        );
        *lock(&self.last_pageview) = Some(LastPageview {
            url: url.to_string(),
            pageview_id,
        });
        self.sink.enqueue(event);
    }

    /// Starts heartbeats for the content at `url`, restarting any running
    /// session for it. Heartbeats carry the pageview id of the last
    /// pageview when it was for the same url.
    pub fn start_engagement(
        &self,
        url: &str,
        url_ref: Option<&str>,
        extra_data: Option<Map<String, Value>>,
    ) {
        if url.trim().is_empty() {
            warn!("start_engagement: url must not be empty");
            return;
        }

        let pageview_id = lock(&self.last_pageview)
            .as_ref()
            .filter(|last| last.url == url)
            .map(|last| last.pageview_id.clone());
        let base = self.builder.build(
            EventAction::Heartbeat,
            url,
            url_ref,
            pageview_id.as_deref(),
            None,
            extra_data,
        );
        self.engagement.start(url, base);
    }

    /// Stops heartbeats for the content at `url`.
    pub fn stop_engagement(&self, url: &str) {
        if !self.engagement.stop(url) {
            debug!("stop_engagement: no session running for {url}");
        }
    }

    pub fn is_engaged(&self, url: &str) -> bool {
        self.engagement.is_running(url)
    }

    // ── Video ──

    /// Records a video start and begins video heartbeats.
    ///
    /// Playing the video that is already playing does nothing. Resuming a
    /// paused video restarts heartbeats without a new `videostart`. Playing
    /// a different video stops the current one first.
    pub fn track_play(
        &self,
        url: &str,
        url_ref: Option<&str>,
        video: &VideoMetadata,
        extra_data: Option<Map<String, Value>>,
    ) {
        let video_id = video.video_id();
        if video_id.is_empty() {
            warn!("track_play: video metadata must carry a video id");
            return;
        }

        let mut current = lock(&self.current_video);
        let same_video = current
            .as_ref()
            .is_some_and(|c| c.video_id == video_id && c.url == url);
        if same_video && self.video_engagement.is_running(video_id) {
            debug!("track_play: {video_id} is already playing");
            return;
        }

        if !same_video {
            if let Some(previous) = current.take() {
                self.video_engagement.stop(&previous.video_id);
            }
            let start = self.builder.build(
                EventAction::VideoStart,
                url,
                url_ref,
                None,
                Some(video.to_value()),
                extra_data.clone(),
            );
            self.sink.enqueue(start);
            *current = Some(CurrentVideo {
                video_id: video_id.to_string(),
                url: url.to_string(),
            });
        }

        let base = self.builder.build(
            EventAction::VideoHeartbeat,
            url,
            url_ref,
            None,
            Some(video.to_value()),
            extra_data,
        );
        self.video_engagement.start(video_id, base);
    }

    /// Pauses heartbeats for the current video.
    pub fn track_pause(&self) {
        if let Some(current) = lock(&self.current_video).as_ref() {
            self.video_engagement.stop(&current.video_id);
        }
    }

    /// Stops and forgets the current video.
    pub fn reset_video(&self) {
        if let Some(previous) = lock(&self.current_video).take() {
            self.video_engagement.stop(&previous.video_id);
        }
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.current_video)
            .as_ref()
            .is_some_and(|c| self.video_engagement.is_running(&c.video_id))
    }

    // ── Lifecycle and queue ──

    pub fn on_foreground(&self) {
        self.notify(SchedulerEvent::Foreground);
    }

    pub fn on_background(&self) {
        self.notify(SchedulerEvent::Background);
    }

    /// Flushes now, outside the schedule.
    pub async fn flush_event_queue(&self) -> FlushOutcome {
        self.queue.flush().await
    }

    /// Events waiting in memory.
    pub fn queue_size(&self) -> usize {
        self.queue.pending_count()
    }

    /// Events waiting in the overflow store.
    pub fn stored_event_count(&self) -> usize {
        self.queue.stored_count()
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Stops all heartbeats, flushes once more and stops the scheduler.
    pub async fn shutdown(&self) {
        self.engagement.stop_all();
        self.video_engagement.stop_all();

        if let Err(e) = self.scheduler.shutdown() {
            debug!("shutdown: {e}");
        }
        let task = lock(&self.scheduler_task).take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!("flush scheduler task failed: {e}");
        }
        info!("tracker shut down");
    }

    fn notify(&self, event: SchedulerEvent) {
        if let Err(e) = self.scheduler.notify(event) {
            warn!("dropping {event:?}: {e}");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
