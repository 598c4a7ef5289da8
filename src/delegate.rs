//! Delegation sub-loop for actions the executor cannot express as one
//! tap or hold (typing a value one key at a time, multi-part gestures).
//!
//! Each iteration shows the reasoning service the current screen and its
//! elements and asks for exactly one next atomic action. The loop ends
//! when the service reports completion, a call times out or the iteration
//! budget runs out.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{self, MAX_DELEGATION_ITERATIONS};
use crate::device::{ActionError, ActionExecutor, Waypoint};
use crate::graph::{ElementInfo, GraphClient, QueryError};
use crate::position::Position;
use crate::reasoning::{Reasoner, ReasoningError, ReasoningRequest};
use crate::resolver::extract_json_object;

/// Result type for delegation
pub type DelegationResult<T> = Result<T, DelegationError>;

#[derive(Debug, thiserror::Error)]
pub enum DelegationError {
    #[error("graph lookup failed: {0}")]
    Graph(#[from] QueryError),

    #[error("reasoning service failed: {0}")]
    Service(#[from] ReasoningError),

    #[error("device action failed: {0}")]
    Action(#[from] ActionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    BudgetExhausted,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationOutcome {
    /// Last element the sub-loop interacted with
    pub last_element: Option<String>,
    pub stop: StopReason,
    pub iterations: usize,
    /// One line per iteration
    pub trace: Vec<String>,
}

impl DelegationOutcome {
    pub fn completed(&self) -> bool {
        self.stop == StopReason::Completed
    }
}

/// The interaction handed to the sub-loop
#[derive(Debug, Clone)]
pub struct DelegationGoal<'a> {
    pub step_text: &'a str,
    pub action: &'a str,
    pub action_data: &'a Value,
    pub expected: &'a str,
}

#[derive(Debug, Deserialize)]
struct NextAction {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    element: Option<String>,
}

pub struct Delegator {
    graph: GraphClient,
    executor: Arc<ActionExecutor>,
    reasoner: Arc<dyn Reasoner>,
    call_timeout: Duration,
    max_iterations: usize,
}

impl Delegator {
    pub fn new(graph: GraphClient, executor: Arc<ActionExecutor>, reasoner: Arc<dyn Reasoner>) -> Self {
        Self {
            graph,
            executor,
            reasoner,
            call_timeout: Duration::from_secs(config::get().reasoning.delegate_timeout),
            max_iterations: MAX_DELEGATION_ITERATIONS,
        }
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub async fn run(&self, goal: &DelegationGoal<'_>, from: &Position) -> DelegationResult<DelegationOutcome> {
        let screen = if from.is_screen {
            from.name.clone()
        } else {
            self.graph
                .nearest_screen(&from.name)
                .await?
                .unwrap_or_else(|| from.name.clone())
        };
        let description = self
            .graph
            .screen_description(&screen)
            .await?
            .unwrap_or_else(|| "No specific description found for this screen.".to_string());
        let elements = self.graph.contained_elements(&screen).await?;
        info!(
            "[delegate] {} on {} ({} elements)",
            goal.action,
            screen,
            elements.len()
        );

        let mut outcome = DelegationOutcome {
            last_element: None,
            stop: StopReason::BudgetExhausted,
            iterations: 0,
            trace: Vec::new(),
        };

        while outcome.iterations < self.max_iterations {
            outcome.iterations += 1;
            let prompt = build_delegation_prompt(goal, &screen, &description, &elements, &outcome.trace);
            let request = ReasoningRequest::new().user(prompt);

            let answer = match tokio::time::timeout(self.call_timeout, self.reasoner.complete(request)).await {
                Ok(answer) => answer?,
                Err(_) => {
                    warn!("[delegate] call timed out after {:?}", self.call_timeout);
                    outcome.trace.push(format!("timed out after {:?}", self.call_timeout));
                    outcome.stop = StopReason::TimedOut;
                    return Ok(outcome);
                }
            };
            debug!("[delegate] answer: {}", answer);

            let Some(next) = extract_json_object(&answer)
                .and_then(|json| serde_json::from_str::<NextAction>(json).ok())
            else {
                outcome.trace.push(format!("unreadable answer: {}", answer.trim()));
                continue;
            };

            if next.done {
                outcome.trace.push("done".to_string());
                outcome.stop = StopReason::Completed;
                return Ok(outcome);
            }

            let Some(name) = next.element else {
                outcome.trace.push("answer named no element".to_string());
                continue;
            };
            let Some(waypoint) = placed(&elements, &name) else {
                warn!("[delegate] unknown element {}", name);
                outcome.trace.push(format!("unknown element {}", name));
                continue;
            };

            let action = next.action.unwrap_or_else(|| "tap".to_string()).to_lowercase();
            if action == "hold" {
                self.executor.hold(std::slice::from_ref(&waypoint), None).await?;
            } else {
                self.executor.tap(std::slice::from_ref(&waypoint), None).await?;
            }
            outcome.trace.push(format!("{} {}", action, waypoint.name));
            outcome.last_element = Some(waypoint.name);
        }

        warn!("[delegate] budget of {} iterations exhausted", self.max_iterations);
        Ok(outcome)
    }
}

fn placed(elements: &[ElementInfo], name: &str) -> Option<Waypoint> {
    elements
        .iter()
        .find(|e| e.name == name)
        .and_then(|e| Some(Waypoint::new(e.name.clone(), e.x?, e.y?)))
}

pub fn build_delegation_prompt(
    goal: &DelegationGoal<'_>,
    screen: &str,
    description: &str,
    elements: &[ElementInfo],
    history: &[String],
) -> String {
    let element_lines = elements
        .iter()
        .map(|e| {
            let coords = match (e.x, e.y) {
                (Some(x), Some(y)) => format!("({}, {})", x, y),
                _ => "(no coordinates)".to_string(),
            };
            format!(
                "- {} {} -> {}",
                e.name,
                coords,
                e.action.as_deref().unwrap_or("nothing")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let history = if history.is_empty() {
        "(none)".to_string()
    } else {
        history.join("\n")
    };

    format!(
        r#"You automate a mobile app one atomic interaction at a time.

Step: {step}
Interaction: {action}
Interaction data: {data}
Expected result: {expected}

Current screen: {screen}
Screen notes: {description}

UI elements on this screen (name, coordinates, triggered action):
{elements}

Actions already performed:
{history}

Reply with exactly one JSON object:
- {{"action": "tap", "element": "<element name>"}} for the next interaction ("hold" is also allowed)
- {{"done": true}} when the interaction is complete"#,
        step = goal.step_text.trim(),
        action = goal.action,
        data = goal.action_data,
        expected = goal.expected.trim(),
        screen = screen,
        description = description.trim(),
        elements = element_lines,
        history = history,
    )
}
