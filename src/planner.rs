//! Path planner and query synthesizer.
//!
//! The first query is always the deterministic shortest-path template.
//! When the store rejects it, the reasoning service is asked for a
//! corrected query, seeded with every failed query so far. At most
//! `MAX_REPAIR_ATTEMPTS` queries are executed per plan.

use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{self, MAX_REPAIR_ATTEMPTS};
use crate::device::{RawWaypoint, Waypoint, normalize};
use crate::graph::{GraphClient, NodeKind, QueryError, queries};
use crate::position::Position;
use crate::reasoning::{Reasoner, ReasoningError, ReasoningRequest};

/// Result type for planning
pub type PlanResult<T> = Result<T, PlanError>;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("query still failing after {attempts} attempts: {last_error}")]
    Exhausted { attempts: usize, last_error: QueryError },

    #[error("query repair request failed: {0}")]
    Repair(#[from] ReasoningError),

    #[error("query repair timed out after {0:?}")]
    RepairTimeout(Duration),
}

/// Typed waypoints for one navigation, ready for the executor
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub waypoints: Vec<Waypoint>,
    /// The path starts at a UI element the agent is already on
    pub element_start: bool,
    /// Query that produced the waypoints
    pub query: String,
    /// Number of executed queries, template included
    pub attempts: usize,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Node the executor should skip if it heads the path: the element
    /// the agent already sits on
    pub fn avoid<'a>(&self, start: &'a Position) -> Option<&'a str> {
        self.element_start.then_some(start.name.as_str())
    }
}

pub struct PathPlanner {
    graph: GraphClient,
    reasoner: Arc<dyn Reasoner>,
    schema: String,
    repair_timeout: Duration,
}

impl PathPlanner {
    pub fn new(graph: GraphClient, reasoner: Arc<dyn Reasoner>, schema: impl Into<String>) -> Self {
        Self {
            graph,
            reasoner,
            schema: schema.into(),
            repair_timeout: Duration::from_secs(config::get().reasoning.resolve_timeout),
        }
    }

    pub fn repair_timeout(mut self, timeout: Duration) -> Self {
        self.repair_timeout = timeout;
        self
    }

    /// Plan from `start` to the UI element `target`
    pub async fn plan(&self, start: &Position, target: &str) -> PlanResult<Plan> {
        self.plan_to(start, NodeKind::UiElement, target).await
    }

    /// Plan from `start` to the node `target` of kind `target_kind`
    pub async fn plan_to(
        &self,
        start: &Position,
        target_kind: NodeKind,
        target: &str,
    ) -> PlanResult<Plan> {
        let element_start = !start.is_screen;
        let mut query = queries::shortest_path(start.kind(), &start.name, target_kind, target);
        let mut failures: Vec<String> = Vec::new();

        for attempt in 1..=MAX_REPAIR_ATTEMPTS {
            debug!("[planner] attempt {}:\n{}", attempt, query);
            match self.graph.run(&query).await {
                Ok(rows) => {
                    let waypoints = normalize(RawWaypoint::from_rows(&rows));
                    info!(
                        "[planner] {} -> {}: {} waypoint(s) after {} attempt(s)",
                        start.name,
                        target,
                        waypoints.len(),
                        attempt
                    );
                    return Ok(Plan {
                        waypoints,
                        element_start,
                        query,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    warn!("[planner] attempt {} failed: {}", attempt, e);
                    failures.push(format!("Query:\n{}\nError:\n{}\n", query, e));
                    if attempt == MAX_REPAIR_ATTEMPTS {
                        return Err(PlanError::Exhausted {
                            attempts: attempt,
                            last_error: e,
                        });
                    }
                    query = self.repair(start, target_kind, target, &failures).await?;
                }
            }
        }

        // MAX_REPAIR_ATTEMPTS is non-zero, so the loop always returns
        Err(PlanError::Exhausted {
            attempts: MAX_REPAIR_ATTEMPTS,
            last_error: QueryError::InvalidResponse("no attempts made".to_string()),
        })
    }

    async fn repair(
        &self,
        start: &Position,
        target_kind: NodeKind,
        target: &str,
        failures: &[String],
    ) -> PlanResult<String> {
        let prompt = build_repair_prompt(&self.schema, start, target_kind, target, failures);
        let response = tokio::time::timeout(
            self.repair_timeout,
            self.reasoner.complete(ReasoningRequest::new().user(prompt)),
        )
        .await
        .map_err(|_| PlanError::RepairTimeout(self.repair_timeout))??;
        Ok(extract_query(&response))
    }
}

fn start_description(start: &Position) -> String {
    if start.is_screen {
        format!("the screen \"{}\"", start.name)
    } else {
        format!(
            "the previously tapped UI element \"{}\" (a UIElement node in the graph)",
            start.name
        )
    }
}

pub fn build_repair_prompt(
    schema: &str,
    start: &Position,
    target_kind: NodeKind,
    target: &str,
    failures: &[String],
) -> String {
    format!(
        r#"You are an expert in Neo4j Cypher query generation.

Graph Schema:
{schema}

Previous failed queries:
{failures}

Goal:
Find the (x, y) coordinates of the UIElement nodes on the way to the {kind} node named "{target}", starting from {start}.

The Cypher query must:
- Find the shortest path from the start node to the target node
- Traverse only these relationships, forward only: [:CONTAINS], [:TRIGGERS], [:LEADS_TO]
- Use `WITH n` after `UNWIND` before any `WHERE`
- Only return UIElement nodes that have both coordinates (n.x IS NOT NULL AND n.y IS NOT NULL)
- Order results by path position using apoc.coll.indexOf(nodes(path), n)
- Return: n.name AS name, n.x AS x, n.y AS y

Explain your reasoning briefly, then give the final query in a ```cypher code block."#,
        schema = schema.trim(),
        failures = failures.join("\n"),
        kind = target_kind.label(),
        target = target,
        start = start_description(start),
    )
}

/// Body of the last ```cypher fence, or the trimmed text if there is none
pub fn extract_query(text: &str) -> String {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:cypher)?\s*\n(.*?)```").ok())
        .as_ref();
    fence
        .and_then(|re| re.captures_iter(text).last())
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str().trim().to_string())
        .unwrap_or_else(|| text.trim().to_string())
}
