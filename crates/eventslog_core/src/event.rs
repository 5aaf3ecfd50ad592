use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::{EventsLogError, EventsLogResult};

/// A change event as delivered by the event source.
///
/// Only `project` and `eventCreatedOn` are interpreted; every other field is
/// carried through to the stored payload untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub event_created_on: i64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ProjectEvent {
    pub fn new(event_type: impl Into<String>, project: Option<&str>, event_created_on: i64) -> Self {
        Self {
            event_type: event_type.into(),
            project: project.map(str::to_string),
            event_created_on,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// The project the event belongs to, if it carries one.
    pub fn project_name(&self) -> Option<&str> {
        self.project.as_deref().filter(|name| !name.is_empty())
    }

    /// Creation time as a UTC wall-clock value.
    pub fn created_at(&self) -> EventsLogResult<PrimitiveDateTime> {
        let at = OffsetDateTime::from_unix_timestamp(self.event_created_on).map_err(|err| {
            EventsLogError::storage(format!(
                "event timestamp {} out of range: {err}",
                self.event_created_on
            ))
        })?;
        Ok(PrimitiveDateTime::new(at.date(), at.time()))
    }

    pub fn to_payload(&self) -> EventsLogResult<String> {
        serde_json::to_string(self)
            .map_err(|err| EventsLogError::storage(format!("serialize event: {err}")))
    }

    /// Row to insert for this event, or `None` when there is no project to
    /// index it by.
    pub fn to_record(&self) -> EventsLogResult<Option<NewRecord>> {
        let Some(project) = self.project_name() else {
            return Ok(None);
        };
        Ok(Some(NewRecord {
            project: project.to_string(),
            occurred_at: self.created_at()?,
            payload: self.to_payload()?,
        }))
    }
}

/// Ordering key assigned by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderingKey {
    Serial(i64),
    Generated(String),
}

/// Row values supplied on insert; the ordering key is generated by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRecord {
    pub project: String,
    pub occurred_at: PrimitiveDateTime,
    pub payload: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub key: OrderingKey,
    pub project: String,
    pub occurred_at: PrimitiveDateTime,
    pub payload: String,
}

impl EventRecord {
    /// The row as it would be re-inserted elsewhere, keeping project,
    /// timestamp and payload.
    pub fn to_new_record(&self) -> NewRecord {
        NewRecord {
            project: self.project.clone(),
            occurred_at: self.occurred_at,
            payload: self.payload.clone(),
        }
    }
}

/// Records grouped by project name.
pub type ProjectEvents = HashMap<String, Vec<EventRecord>>;
