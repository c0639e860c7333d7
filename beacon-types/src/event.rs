//! The tracked event value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

const ACTION_FIELD: &str = "action";
const SITE_ID_FIELD: &str = "idsite";
const DATA_FIELD: &str = "data";

/// Errors raised while constructing an [`Event`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EventError {
    #[error("event is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("event field `{field}` must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// Discriminator stored under the `action` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Pageview,
    Heartbeat,
    #[serde(rename = "videostart")]
    VideoStart,
    #[serde(rename = "vheartbeat")]
    VideoHeartbeat,
}

impl EventAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pageview => "pageview",
            Self::Heartbeat => "heartbeat",
            Self::VideoStart => "videostart",
            Self::VideoHeartbeat => "vheartbeat",
        }
    }

    /// Parses the wire name of an action.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pageview" => Some(Self::Pageview),
            "heartbeat" => Some(Self::Heartbeat),
            "videostart" => Some(Self::VideoStart),
            "vheartbeat" => Some(Self::VideoHeartbeat),
            _ => None,
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tracked event: an ordered mapping from field name to JSON value.
///
/// Events always carry an `action` and an `idsite` field. Once built they
/// are never mutated; derived events (heartbeats with fresh timings) are
/// produced with [`Event::to_builder`]. Deserialization goes through
/// [`Event::from_fields`], so a stored or received map missing either
/// field is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Event(Map<String, Value>);

impl TryFrom<Map<String, Value>> for Event {
    type Error = EventError;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        Self::from_fields(fields)
    }
}

impl From<Event> for Map<String, Value> {
    fn from(event: Event) -> Self {
        event.0
    }
}

impl Event {
    /// Starts a builder with the two mandatory fields set.
    pub fn builder(action: EventAction, site_id: impl Into<String>) -> EventBuilder {
        let mut fields = Map::new();
        fields.insert(ACTION_FIELD.into(), Value::String(action.as_str().into()));
        fields.insert(SITE_ID_FIELD.into(), Value::String(site_id.into()));
        EventBuilder { fields }
    }

    /// Wraps an existing field map, checking the mandatory fields.
    pub fn from_fields(fields: Map<String, Value>) -> Result<Self, EventError> {
        for field in [ACTION_FIELD, SITE_ID_FIELD] {
            match fields.get(field) {
                None => return Err(EventError::MissingField(field)),
                Some(Value::String(_)) => {}
                Some(_) => {
                    return Err(EventError::InvalidField {
                        field,
                        expected: "a string",
                    });
                }
            }
        }
        if let Some(data) = fields.get(DATA_FIELD)
            && !data.is_object()
        {
            return Err(EventError::InvalidField {
                field: DATA_FIELD,
                expected: "an object",
            });
        }
        Ok(Self(fields))
    }

    /// Raw `action` string.
    pub fn action_name(&self) -> &str {
        self.0
            .get(ACTION_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Parsed `action`, if it is one of the known actions.
    pub fn action(&self) -> Option<EventAction> {
        EventAction::parse(self.action_name())
    }

    pub fn site_id(&self) -> &str {
        self.0
            .get(SITE_ID_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The nested `data` map, if present.
    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.0.get(DATA_FIELD).and_then(Value::as_object)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    /// Copies this event's fields into a new builder.
    pub fn to_builder(&self) -> EventBuilder {
        EventBuilder {
            fields: self.0.clone(),
        }
    }
}

/// Incremental constructor for [`Event`].
#[derive(Debug, Clone)]
pub struct EventBuilder {
    fields: Map<String, Value>,
}

impl EventBuilder {
    /// Sets a top-level field, replacing any previous value.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets a field only when a value is present.
    pub fn optional_field(self, name: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self,
        }
    }

    /// Merges entries into the nested `data` map, overriding existing keys.
    pub fn merge_data(mut self, entries: Map<String, Value>) -> Self {
        let data = self
            .fields
            .entry(DATA_FIELD)
            .or_insert_with(|| Value::Object(Map::new()));
        if !data.is_object() {
            *data = Value::Object(Map::new());
        }
        if let Value::Object(map) = data {
            map.extend(entries);
        }
        self
    }

    /// Sets a single key inside the nested `data` map.
    pub fn data_field(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut entry = Map::new();
        entry.insert(name.into(), value.into());
        self.merge_data(entry)
    }

    pub fn build(self) -> Event {
        Event(self.fields)
    }
}
