//! Graph store client used by the navigation core.
//!
//! Every call opens a session, runs one query under a timeout and releases
//! the session when the call returns, fails or is cancelled.

use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use super::queries;
use super::store::GraphStore;
use super::types::{ElementInfo, NodeKind, Params, QueryError, QueryResult, Rows, TriggerInfo};
use crate::config::TOP_LEVEL_SCREENS;

/// An open store session. Released on drop.
pub struct SessionGuard {
    open: Arc<AtomicUsize>,
}

impl SessionGuard {
    fn acquire(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self { open: Arc::clone(open) }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct GraphClient {
    store: Arc<dyn GraphStore>,
    open_sessions: Arc<AtomicUsize>,
    timeout: Duration,
}

impl GraphClient {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            open_sessions: Arc::new(AtomicUsize::new(0)),
            timeout: Duration::from_secs(crate::config::DEFAULT_GRAPH_TIMEOUT),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of sessions currently held open
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Run a raw query with no parameters
    pub async fn run(&self, query: &str) -> QueryResult<Rows> {
        self.run_with(query, Params::new()).await
    }

    /// Run a query in its own session
    pub async fn run_with(&self, query: &str, params: Params) -> QueryResult<Rows> {
        let _session = SessionGuard::acquire(&self.open_sessions);
        match tokio::time::timeout(self.timeout, self.store.execute(query, &params)).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout(self.timeout)),
        }
    }

    /// Whether a node of `kind` named `name` exists
    pub async fn exists(&self, kind: NodeKind, name: &str) -> QueryResult<bool> {
        let rows = self
            .run_with(
                queries::NODE_EXISTS,
                params([("name", json!(name)), ("label", json!(kind.label()))]),
            )
            .await?;
        Ok(rows.get(0, "count").and_then(Value::as_i64).unwrap_or(0) > 0)
    }

    /// Kind of the node named `name`, if any
    pub async fn kind_of(&self, name: &str) -> QueryResult<Option<NodeKind>> {
        let rows = self
            .run_with(queries::LABEL_OF, params([("name", json!(name))]))
            .await?;
        Ok(rows.first_str("label").map(NodeKind::from_label))
    }

    /// Nearest top-level screen to the node named `name`
    pub async fn nearest_screen(&self, name: &str) -> QueryResult<Option<String>> {
        if TOP_LEVEL_SCREENS.contains(&name) {
            return Ok(Some(name.to_string()));
        }
        let rows = self
            .run_with(
                queries::NEAREST_SCREEN,
                params([("name", json!(name)), ("screens", json!(TOP_LEVEL_SCREENS))]),
            )
            .await?;
        Ok(rows.first_str("screen_name").map(str::to_string))
    }

    /// Action and screen reached by tapping the element named `name`
    pub async fn trigger_of(&self, name: &str) -> QueryResult<Option<TriggerInfo>> {
        let rows = self
            .run_with(queries::TRIGGER_OF, params([("name", json!(name))]))
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let info = TriggerInfo {
            action_name: rows.first_str("action_name").map(str::to_string),
            screen_name: rows.first_str("screen_name").map(str::to_string),
        };
        debug!("[graph] trigger of {}: {:?}", name, info);
        Ok(Some(info))
    }

    /// Whether `element` is reachable from `screen` through CONTAINS/TRIGGERS
    pub async fn is_contained(&self, screen: &str, element: &str) -> QueryResult<bool> {
        let rows = self
            .run_with(
                queries::IS_CONTAINED,
                params([("screen", json!(screen)), ("element", json!(element))]),
            )
            .await?;
        Ok(rows.get(0, "contained").and_then(Value::as_bool).unwrap_or(false))
    }

    pub async fn screen_description(&self, screen: &str) -> QueryResult<Option<String>> {
        let rows = self
            .run_with(queries::SCREEN_DESCRIPTION, params([("name", json!(screen))]))
            .await?;
        Ok(rows.first_str("description").map(str::to_string))
    }

    /// UI elements directly contained in the node named `name`
    pub async fn contained_elements(&self, name: &str) -> QueryResult<Vec<ElementInfo>> {
        let rows = self
            .run_with(queries::CONTAINED_ELEMENTS, params([("name", json!(name))]))
            .await?;
        let elements = (0..rows.len())
            .filter_map(|i| {
                let name = rows.get(i, "name")?.as_str()?.to_string();
                Some(ElementInfo {
                    name,
                    x: rows.get(i, "x").and_then(Value::as_i64),
                    y: rows.get(i, "y").and_then(Value::as_i64),
                    action: rows.get(i, "action").and_then(Value::as_str).map(str::to_string),
                })
            })
            .collect();
        Ok(elements)
    }
}

fn params<const N: usize>(entries: [(&str, Value); N]) -> Params {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
