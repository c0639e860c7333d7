//! Core types for the Beacon telemetry SDK.
//!
//! This crate defines the value types that flow through the pipeline:
//! - [`Event`]: an immutable, ordered field map sent to the collector
//! - [`EventAction`]: the `action` discriminator carried by every event
//! - [`ContentMetadata`] / [`VideoMetadata`]: optional content descriptors

mod event;
mod metadata;

pub use event::{Event, EventAction, EventBuilder, EventError};
pub use metadata::{ContentMetadata, VideoMetadata};
