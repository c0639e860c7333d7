//! Client-side telemetry pipeline for the Beacon SDK.
//!
//! Provides:
//! - A bounded in-memory event queue that spills to a durable overflow log
//! - A flush scheduler driven by a fixed interval and app lifecycle signals
//! - Engagement heartbeats with a backoff interval anchored to session start
//! - An HTTP transport posting `{"events": [...]}` batches to the collector
//!
//! [`Tracker`] ties the pieces together and is the host-facing entry point.

pub mod clock;
pub mod config;
pub mod engagement;
pub mod error;
pub mod event_builder;
pub mod heartbeat;
pub mod logging;
pub mod queue;
pub mod scheduler;
pub mod tracker;
pub mod transport;

pub use config::TrackerConfig;
pub use error::{TrackerError, TrackerResult};
pub use queue::{EventQueue, FlushOutcome};
pub use tracker::Tracker;

pub use beacon_types::{ContentMetadata, Event, EventAction, VideoMetadata};
