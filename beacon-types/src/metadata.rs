//! Descriptors for tracked content.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata describing a piece of content, sent under the `metadata` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetadata {
    /// Canonical URL (or identifier) of the content.
    #[serde(rename = "link", skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_url: Option<String>,

    /// Publication time in epoch milliseconds.
    #[serde(rename = "pub_date_tmsp", skip_serializing_if = "Option::is_none")]
    pub pub_date_millis: Option<i64>,
}

impl ContentMetadata {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Metadata for a video. The canonical URL doubles as the video identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    #[serde(flatten)]
    pub content: ContentMetadata,

    /// Duration in seconds.
    pub duration: u64,
}

impl VideoMetadata {
    pub fn new(video_id: impl Into<String>, duration: u64) -> Self {
        Self {
            content: ContentMetadata {
                canonical_url: Some(video_id.into()),
                ..ContentMetadata::default()
            },
            duration,
        }
    }

    pub fn video_id(&self) -> &str {
        self.content.canonical_url.as_deref().unwrap_or_default()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
