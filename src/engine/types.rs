use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{self, ARRIVAL_CHECK_ATTEMPTS, ARRIVAL_CHECK_INTERVAL, MAX_DELEGATION_ITERATIONS, RELAUNCH_SETTLE};
use crate::delegate::DelegationError;
use crate::device::{ActionError, DeviceError};
use crate::graph::QueryError;
use crate::planner::PlanError;
use crate::resolver::ResolutionError;
use crate::verify::Verdict;

/// Outcome of a single step
pub type StepOutcome = Verdict;

/// Where the engine is within the current step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Resolving,
    Planning,
    Acting,
    Delegating,
    Verifying,
    Done(StepOutcome),
}

/// Result of one executed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_text: String,
    pub outcome: StepOutcome,
    pub reason: String,

    /// What each stage saw, in order
    pub evidence_trace: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Uncertain,
}

/// Aggregate over a test case run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub status: RunStatus,
    pub log_lines: Vec<String>,
    pub last_step: Option<StepResult>,
}

impl Default for RunResult {
    fn default() -> Self {
        Self::new()
    }
}

impl RunResult {
    pub fn new() -> Self {
        Self {
            status: RunStatus::Success,
            log_lines: Vec::new(),
            last_step: None,
        }
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        self.log_lines.push(format!("[INFO] {}", message.as_ref()));
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        self.log_lines.push(format!("[WARN] {}", message.as_ref()));
    }

    /// Record an abort. The line is written before the status changes.
    pub fn fail(&mut self, message: impl AsRef<str>) {
        self.log_lines.push(format!("[FAIL] {}", message.as_ref()));
        self.status = RunStatus::Failed;
    }

    /// Fold a step into the aggregate: failed beats uncertain beats success
    pub fn record(&mut self, step: StepResult) {
        let line = match step.outcome {
            Verdict::Success => format!("[PASS] {}", step.step_text),
            Verdict::Fail => format!("[FAIL] {}: {}", step.step_text, step.reason),
            Verdict::Uncertain => format!("[WARN] {}: {}", step.step_text, step.reason),
        };
        self.log_lines.push(line);

        self.status = match (self.status, step.outcome) {
            (RunStatus::Failed, _) | (_, Verdict::Fail) => RunStatus::Failed,
            (RunStatus::Uncertain, _) | (_, Verdict::Uncertain) => RunStatus::Uncertain,
            _ => RunStatus::Success,
        };
        self.last_step = Some(step);
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Joined log, one line per entry
    pub fn log(&self) -> String {
        self.log_lines.join("\n")
    }
}

/// Why a step stopped before verification, or was flagged during it
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("could not resolve step: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("no usable path: {0}")]
    Plan(#[from] PlanError),

    #[error("action failed: {0}")]
    Action(#[from] ActionError),

    #[error("delegation failed: {0}")]
    Delegation(#[from] DelegationError),

    #[error("delegated interaction unfinished after {iterations} iteration(s)")]
    DelegationTimeout { iterations: usize },

    #[error("neither evidence channel confirmed success: {0}")]
    VerificationInconclusive(String),

    #[error("graph lookup failed: {0}")]
    Query(#[from] QueryError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("expected to reach {screen}, last screen log: {last_line}")]
    ArrivalNotConfirmed { screen: String, last_line: String },

    #[error("unknown node {0}")]
    UnknownNode(String),
}

/// One step of a test case as authored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStep {
    pub action: String,
    pub description: String,
    #[serde(default)]
    pub expected_result: String,
}

impl TestStep {
    pub fn new(
        action: impl Into<String>,
        description: impl Into<String>,
        expected_result: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            description: description.into(),
            expected_result: expected_result.into(),
        }
    }

    /// `"{index}. ({action}) {description}"`
    pub fn text(&self, index: usize) -> String {
        format!("{}. ({}) {}", index, self.action.trim(), self.description.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Canonical screen the case starts from and returns to
    pub test_screen: String,
    /// The case's original natural-language goal
    pub goal: String,
    pub steps: Vec<TestStep>,
}

/// Engine policy and timing
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Skip remaining steps once the run is failed or uncertain
    pub stop_on_failure: bool,
    pub tap_delay: Duration,
    pub hold_duration: Duration,
    pub relaunch_settle: Duration,
    pub resolve_timeout: Duration,
    pub verify_timeout: Duration,
    pub delegate_timeout: Duration,
    pub max_delegation_iterations: usize,
    pub arrival_attempts: usize,
    pub arrival_interval: Duration,
    /// Where verification screenshots go
    pub screenshot_dir: PathBuf,
}

impl Default for EngineOptions {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            stop_on_failure: cfg.engine.stop_on_failure,
            tap_delay: Duration::from_millis(cfg.device.tap_delay_ms),
            hold_duration: Duration::from_millis(cfg.device.hold_ms),
            relaunch_settle: RELAUNCH_SETTLE,
            resolve_timeout: Duration::from_secs(cfg.reasoning.resolve_timeout),
            verify_timeout: Duration::from_secs(cfg.reasoning.verify_timeout),
            delegate_timeout: Duration::from_secs(cfg.reasoning.delegate_timeout),
            max_delegation_iterations: MAX_DELEGATION_ITERATIONS,
            arrival_attempts: ARRIVAL_CHECK_ATTEMPTS,
            arrival_interval: ARRIVAL_CHECK_INTERVAL,
            screenshot_dir: PathBuf::from(config::session_base_dir()),
        }
    }
}

impl EngineOptions {
    pub fn stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    pub fn screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = dir.into();
        self
    }

    /// Zero every delay, for driving fakes
    pub fn without_delays(mut self) -> Self {
        self.tap_delay = Duration::ZERO;
        self.hold_duration = Duration::ZERO;
        self.relaunch_settle = Duration::ZERO;
        self.arrival_interval = Duration::ZERO;
        self
    }

    pub fn timeouts(mut self, resolve: Duration, verify: Duration, delegate: Duration) -> Self {
        self.resolve_timeout = resolve;
        self.verify_timeout = verify;
        self.delegate_timeout = delegate;
        self
    }
}
