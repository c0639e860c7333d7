//! Delivery of event batches to the collector.

use crate::error::{TrackerError, TrackerResult};
use async_trait::async_trait;
use beacon_types::Event;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends one batch of events. `Ok` means the collector accepted all of them.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(&self, events: &[Event]) -> TrackerResult<()>;
}

/// Request body for a batch upload.
#[derive(Serialize)]
struct BatchRequest<'a> {
    events: &'a [Event],
}

/// Posts batches as JSON over HTTP. Any 2xx status counts as success.
pub struct HttpTransport {
    client: Client,
    collector_url: String,
}

impl HttpTransport {
    pub fn new(collector_url: impl Into<String>) -> TrackerResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            collector_url: collector_url.into(),
        })
    }

    pub fn collector_url(&self) -> &str {
        &self.collector_url
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn send(&self, events: &[Event]) -> TrackerResult<()> {
        let resp = self
            .client
            .post(&self.collector_url)
            .json(&BatchRequest { events })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TrackerError::Rejected {
                status: status.as_u16(),
            });
        }

        debug!("collector accepted {} events ({status})", events.len());
        Ok(())
    }
}

/// Logs batches instead of sending them and always reports success.
#[derive(Debug, Default)]
pub struct DryRunTransport;

#[async_trait]
impl EventTransport for DryRunTransport {
    async fn send(&self, events: &[Event]) -> TrackerResult<()> {
        let body = serde_json::to_string(&BatchRequest { events })?;
        info!("dry run: not sending {} events: {body}", events.len());
        Ok(())
    }
}
