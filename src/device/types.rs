use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::graph::Rows;

/// A coordinate-bearing node on a planned path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waypoint {
    pub name: String,
    pub x: i64,
    pub y: i64,
}

impl Waypoint {
    pub fn new(name: impl Into<String>, x: i64, y: i64) -> Self {
        Self {
            name: name.into(),
            x,
            y,
        }
    }
}

/// Waypoint shapes produced by the store and the reasoning service:
/// `["name", x, y]` triples, `{name, x, y}` objects (coordinates possibly
/// missing) and arbitrarily nested lists of either.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawWaypoint {
    Triple(String, i64, i64),
    Point {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        x: Option<i64>,
        #[serde(default)]
        y: Option<i64>,
    },
    Nested(Vec<RawWaypoint>),
    Other(Value),
}

impl RawWaypoint {
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(RawWaypoint::Other(value))
    }

    /// One raw waypoint per row, keyed by column name
    pub fn from_rows(rows: &Rows) -> Vec<Self> {
        rows.records()
            .into_iter()
            .map(|record| Self::from_value(Value::Object(record)))
            .collect()
    }
}

/// Flatten raw waypoints into a canonical list. Entries without both
/// coordinates are dropped with a warning.
pub fn normalize(raw: impl IntoIterator<Item = RawWaypoint>) -> Vec<Waypoint> {
    let mut normalized = Vec::new();
    for item in raw {
        flatten_into(item, &mut normalized);
    }
    normalized
}

fn flatten_into(item: RawWaypoint, out: &mut Vec<Waypoint>) {
    match item {
        RawWaypoint::Triple(name, x, y) => out.push(Waypoint { name, x, y }),
        RawWaypoint::Point {
            name,
            x: Some(x),
            y: Some(y),
        } => out.push(Waypoint {
            name: name.unwrap_or_else(|| "Unknown".to_string()),
            x,
            y,
        }),
        RawWaypoint::Point { name, .. } => {
            warn!(
                "[normalize] dropping {} without coordinates",
                name.as_deref().unwrap_or("unnamed entry")
            );
        }
        RawWaypoint::Nested(items) => {
            for inner in items {
                flatten_into(inner, out);
            }
        }
        RawWaypoint::Other(value) => {
            warn!("[normalize] dropping unknown waypoint shape: {}", value);
        }
    }
}

/// Result type for device primitives
pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tap/hold sequences
pub type ActionResult<T> = Result<T, ActionError>;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("no coordinate-bearing waypoints to act on")]
    EmptyPath,

    #[error("no waypoint was tapped")]
    NothingTapped,

    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}
