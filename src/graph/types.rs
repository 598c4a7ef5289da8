use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Query parameters, bound by name (`$name`) inside a query
pub type Params = serde_json::Map<String, Value>;

/// Result type for graph store operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors reported while executing a query
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    /// The store rejected the query (syntax error, unknown function, ...)
    #[error("store error {code}: {message}")]
    Store { code: String, message: String },

    /// The request never produced a store answer
    #[error("transport error: {0}")]
    Transport(String),

    /// The store answered with something that is not a result set
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

/// Node labels of the navigation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Screen,
    #[serde(rename = "UIElement")]
    UiElement,
    Action,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Screen => "Screen",
            NodeKind::UiElement => "UIElement",
            NodeKind::Action => "Action",
        }
    }

    /// Map a store label to a node kind. Action nodes carry their own kind
    /// label (Tap, Hold, Pinch, ...), so anything unknown is an action.
    pub fn from_label(label: &str) -> Self {
        match label {
            "Screen" => NodeKind::Screen,
            "UIElement" => NodeKind::UiElement,
            _ => NodeKind::Action,
        }
    }
}

/// Row set returned by a query, with named columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Rows {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Value of `column` in row `index`
    pub fn get(&self, index: usize, column: &str) -> Option<&Value> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(index)?.get(col)
    }

    /// String value of `column` in the first row
    pub fn first_str(&self, column: &str) -> Option<&str> {
        self.get(0, column).and_then(Value::as_str)
    }

    /// Rows as JSON objects keyed by column name
    pub fn records(&self) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// Downstream effect of tapping a UI element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub action_name: Option<String>,
    pub screen_name: Option<String>,
}

/// A UI element on a screen, as offered to the delegation sub-loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub name: String,
    pub x: Option<i64>,
    pub y: Option<i64>,
    pub action: Option<String>,
}
