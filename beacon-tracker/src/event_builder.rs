//! Construction of the events sent to the collector.

use crate::clock::Clock;
use beacon_types::{Event, EventAction};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Builds events stamped with the site id and the current time.
#[derive(Clone)]
pub struct EventBuilder {
    site_id: String,
    clock: Arc<dyn Clock>,
}

impl EventBuilder {
    pub fn new(site_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            site_id: site_id.into(),
            clock,
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Builds an event for `url`.
    ///
    /// `extra_data` is merged into the `data` map before `ts` is stamped,
    /// so a caller-supplied `ts` is always overwritten.
    pub fn build(
        &self,
        action: EventAction,
        url: &str,
        url_ref: Option<&str>,
        pageview_id: Option<&str>,
        metadata: Option<Value>,
        extra_data: Option<Map<String, Value>>,
    ) -> Event {
        Event::builder(action, self.site_id.as_str())
            .field("url", url)
            .field("urlref", url_ref.unwrap_or_default())
            .optional_field("pvid", pageview_id)
            .optional_field("metadata", metadata)
            .merge_data(extra_data.unwrap_or_default())
            .data_field("ts", self.clock.now_millis())
            .build()
    }
}

/// Derives a heartbeat from a session's base event.
///
/// Timings are whole milliseconds. `data.ts` is replaced with `now_millis`;
/// every other base field is carried over unchanged.
pub fn heartbeat_event(base: &Event, incremental: Duration, total: Duration, now_millis: i64) -> Event {
    base.to_builder()
        .field("inc", incremental.as_millis() as u64)
        .field("tt", total.as_millis() as u64)
        .data_field("ts", now_millis)
        .build()
}
