//! Container lifecycle events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use weave_common::WeaveResult;

/// Lifecycle event kinds weave distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Container created.
    Create,
    /// Container started.
    Start,
    /// Container process exited.
    Die,
    /// Container stopped.
    Stop,
    /// Container removed.
    Destroy,
    /// Anything else (`exec_start`, `attach`, ...).
    Other(String),
}

impl EventKind {
    /// Parse a runtime action such as `start` or `exec_start: sh -c true`.
    #[must_use]
    pub fn parse(action: &str) -> Self {
        let action = action.split(':').next().unwrap_or(action).trim();
        match action {
            "create" => Self::Create,
            "start" => Self::Start,
            "die" => Self::Die,
            "stop" => Self::Stop,
            "destroy" => Self::Destroy,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Start => write!(f, "start"),
            Self::Die => write!(f, "die"),
            Self::Stop => write!(f, "stop"),
            Self::Destroy => write!(f, "destroy"),
            Self::Other(action) => write!(f, "{action}"),
        }
    }
}

/// One container lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    /// When the runtime recorded the event.
    pub timestamp: DateTime<Utc>,
    /// Full container id.
    pub container_id: String,
    /// What happened.
    pub kind: EventKind,
}

impl LifecycleEvent {
    /// Create an event stamped with the current time.
    pub fn now(container_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            container_id: container_id.into(),
            kind,
        }
    }

    /// Decode one line of `docker events --format '{{json .}}'`.
    ///
    /// Returns `Ok(None)` for events about anything other than containers.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not a valid event record.
    pub fn from_json(line: &str) -> WeaveResult<Option<Self>> {
        let raw: RawEvent = serde_json::from_str(line)?;

        let kind = raw.kind.as_deref().unwrap_or("container");
        if kind != "container" {
            return Ok(None);
        }

        let Some(container_id) = raw.actor.and_then(|a| a.id).or(raw.id) else {
            return Ok(None);
        };
        let Some(action) = raw.action.or(raw.status) else {
            return Ok(None);
        };

        let timestamp = match (raw.time_nano, raw.time) {
            (Some(nanos), _) => DateTime::from_timestamp_nanos(nanos),
            (None, Some(secs)) => DateTime::from_timestamp(secs, 0).unwrap_or_default(),
            (None, None) => Utc::now(),
        };

        Ok(Some(Self {
            timestamp,
            container_id,
            kind: EventKind::parse(&action),
        }))
    }
}

/// Event record as emitted by docker. Older engines only set the
/// lowercase `status`/`id` fields, newer ones only `Action`/`Actor`.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "Type")]
    kind: Option<String>,
    #[serde(rename = "Action")]
    action: Option<String>,
    #[serde(rename = "Actor")]
    actor: Option<RawActor>,
    status: Option<String>,
    id: Option<String>,
    time: Option<i64>,
    #[serde(rename = "timeNano")]
    time_nano: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawActor {
    #[serde(rename = "ID")]
    id: Option<String>,
}
