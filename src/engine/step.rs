//! The step execution state machine.
//!
//! `Idle -> Resolving -> Planning -> Acting -> [Delegating] -> Verifying -> Done`
//!
//! Every abort writes a `[FAIL]` line to the run log, rolls the position
//! back to the last confirmed value and folds a failed step into the run.

use std::sync::Arc;
use tracing::{info, warn};

use super::types::{
    EngineOptions, EngineState, RunResult, StepError, StepResult, TestCase, TestStep,
};
use crate::config::{self, HOME_SCREEN, SCREEN_START_KEYWORD};
use crate::delegate::{DelegationGoal, Delegator};
use crate::device::{ActionExecutor, DeviceControl};
use crate::graph::{GraphClient, NodeKind};
use crate::logs::LogWindow;
use crate::planner::PathPlanner;
use crate::position::{Position, PositionTracker};
use crate::reasoning::Reasoner;
use crate::resolver::{ActionKind, AliasTable, CanonicalResolver};
use crate::session::Session;
use crate::verify::{Verdict, Verifier};

/// External collaborators of an engine
pub struct EngineContext {
    pub graph: GraphClient,
    pub device: Arc<dyn DeviceControl>,
    pub reasoner: Arc<dyn Reasoner>,
    pub logs: Arc<dyn LogWindow>,
    pub aliases: AliasTable,
    /// Graph schema description shown to the reasoning service
    pub schema: String,
}

/// What `return_to_test_screen` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    AlreadyThere,
    Navigated,
    Failed,
}

pub struct StepEngine {
    options: EngineOptions,
    state: EngineState,
    graph: GraphClient,
    logs: Arc<dyn LogWindow>,
    resolver: CanonicalResolver,
    planner: PathPlanner,
    executor: Arc<ActionExecutor>,
    delegator: Delegator,
    verifier: Verifier,
    tracker: PositionTracker,
    run: RunResult,
    goal: String,
    session: Option<Session>,
}

impl StepEngine {
    pub fn new(ctx: EngineContext, options: EngineOptions) -> Self {
        let executor = Arc::new(
            ActionExecutor::new(Arc::clone(&ctx.device))
                .tap_delay(options.tap_delay)
                .hold_duration(options.hold_duration),
        );
        let resolver = CanonicalResolver::new(Arc::clone(&ctx.reasoner), ctx.aliases, ctx.schema.clone())
            .timeout(options.resolve_timeout);
        let planner = PathPlanner::new(ctx.graph.clone(), Arc::clone(&ctx.reasoner), ctx.schema)
            .repair_timeout(options.resolve_timeout);
        let delegator = Delegator::new(ctx.graph.clone(), Arc::clone(&executor), Arc::clone(&ctx.reasoner))
            .call_timeout(options.delegate_timeout)
            .max_iterations(options.max_delegation_iterations);
        let verifier = Verifier::new(
            Arc::clone(&ctx.reasoner),
            Arc::clone(&ctx.device),
            Arc::clone(&ctx.logs),
            options.screenshot_dir.clone(),
        )
        .timeout(options.verify_timeout);
        let tracker = PositionTracker::new(ctx.graph.clone(), ctx.device).settle(options.relaunch_settle);

        Self {
            options,
            state: EngineState::Idle,
            graph: ctx.graph,
            logs: ctx.logs,
            resolver,
            planner,
            executor,
            delegator,
            verifier,
            tracker,
            run: RunResult::new(),
            goal: String::new(),
            session: None,
        }
    }

    /// Write `report.json` into this session at the end of `run_case`
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn position(&self) -> &Position {
        self.tracker.current()
    }

    pub fn result(&self) -> &RunResult {
        &self.run
    }

    pub fn graph(&self) -> &GraphClient {
        &self.graph
    }

    /// Start a new test case: fresh aggregate, Home position, new log window
    pub fn reset(&mut self, goal: &str) {
        self.run = RunResult::new();
        self.tracker.reset(Position::home());
        self.logs.mark();
        self.state = EngineState::Idle;
        self.goal = goal.to_string();
    }

    /// Run a whole test case and return its aggregate
    pub async fn run_case(&mut self, case: &TestCase) -> RunResult {
        info!("[engine] test case on {}: {}", case.test_screen, case.goal);
        self.reset(&case.goal);
        self.generate_step0(HOME_SCREEN, &case.test_screen).await;

        for (idx, step) in case.steps.iter().enumerate() {
            let text = step.text(idx + 1);
            if is_observation(step) {
                self.observe(&text, &step.expected_result).await;
            } else {
                self.run_step(&text, &step.expected_result).await;
            }
        }

        self.leave_case(&case.test_screen).await;
        self.state = EngineState::Idle;

        if let Some(session) = &self.session {
            match session.write_report(&self.run) {
                Ok(path) => info!("[engine] report written to {}", path.display()),
                Err(e) => warn!("[engine] could not write report: {}", e),
            }
        }
        self.run.clone()
    }

    /// Execute one step. Returns `None` when the step was skipped because
    /// the run already failed and the stop-on-failure policy is on.
    pub async fn run_step(&mut self, step_text: &str, expected: &str) -> Option<StepResult> {
        if self.skipping(step_text) {
            return None;
        }
        self.run.info(format!("Executing step: {}", step_text));
        self.tracker.checkpoint();
        self.logs.mark();

        let mut trace = Vec::new();
        let result = match self.execute(step_text, expected, &mut trace).await {
            Ok(result) => result,
            Err(e) => self.abort(step_text, e, trace),
        };
        Some(self.finish(result))
    }

    /// A check-only step: verification without any device action
    pub async fn observe(&mut self, step_text: &str, expected: &str) -> Option<StepResult> {
        if self.skipping(step_text) {
            return None;
        }
        self.run.info(format!("Observing: {}", step_text));
        let mut trace = Vec::new();
        let result = self.verify(step_text, expected, &mut trace).await;
        Some(self.finish(result))
    }

    fn skipping(&mut self, step_text: &str) -> bool {
        if self.options.stop_on_failure && !self.run.is_success() {
            self.run
                .info(format!("Skipping step due to previous failure: {}", step_text));
            return true;
        }
        false
    }

    fn finish(&mut self, result: StepResult) -> StepResult {
        info!("[engine] {} -> {}", result.step_text, result.outcome.as_str());
        self.state = EngineState::Done(result.outcome);
        self.run.record(result.clone());
        result
    }

    async fn execute(
        &mut self,
        step_text: &str,
        expected: &str,
        trace: &mut Vec<String>,
    ) -> Result<StepResult, StepError> {
        self.state = EngineState::Resolving;
        let screen = self.current_screen().await;
        let resolved = self
            .resolver
            .resolve(step_text, &self.goal, &screen, expected)
            .await?;
        self.run.info(format!(
            "Mapped to: {}, Action: {}, Data: {}",
            resolved.canonical_name,
            resolved.action.as_str(),
            resolved.action_data
        ));
        trace.push(format!(
            "resolved {} ({}) from {}",
            resolved.canonical_name,
            resolved.action.as_str(),
            screen
        ));

        self.state = EngineState::Planning;
        let start = self.tracker.current().clone();
        let plan = self.planner.plan(&start, &resolved.canonical_name).await?;
        trace.push(format!(
            "planned {} waypoint(s) in {} attempt(s)",
            plan.waypoints.len(),
            plan.attempts
        ));

        self.state = EngineState::Acting;
        let avoid = plan.avoid(&start);
        let tapped = match resolved.action {
            ActionKind::Hold => self.executor.hold(&plan.waypoints, avoid).await?,
            _ => self.executor.tap(&plan.waypoints, avoid).await?,
        };
        trace.push(format!("{} {}", resolved.action.as_str(), tapped.name));
        if let Some(planned) = plan.waypoints.last()
            && planned.name != tapped.name
        {
            let note = format!("Path stopped at {} before reaching {}", tapped.name, planned.name);
            self.run.warn(&note);
            trace.push(note);
        }
        let position = self.tracker.after_action(&tapped.name).await.clone();
        self.tracker.checkpoint();
        self.run
            .info(format!("Action successful. Current location: {}", position.name));

        if !resolved.action.is_primitive() {
            self.state = EngineState::Delegating;
            let goal = DelegationGoal {
                step_text,
                action: resolved.action.as_str(),
                action_data: &resolved.action_data,
                expected: &resolved.expected_result,
            };
            let outcome = self.delegator.run(&goal, &position).await?;
            trace.extend(outcome.trace.iter().map(|line| format!("delegate: {}", line)));

            if let Some(last) = &outcome.last_element {
                self.tracker.after_action(last).await;
            }
            self.tracker.checkpoint();
            self.run.info(format!(
                "Additional action completed. Current location: {}",
                self.tracker.current().name
            ));

            if !outcome.completed() {
                let flag = StepError::DelegationTimeout {
                    iterations: outcome.iterations,
                };
                warn!("[engine] {}", flag);
                self.run.warn(flag.to_string());
                trace.push(flag.to_string());
            }
        }

        Ok(self.verify(step_text, &resolved.expected_result, trace).await)
    }

    async fn verify(&mut self, step_text: &str, expected: &str, trace: &mut Vec<String>) -> StepResult {
        self.state = EngineState::Verifying;
        let verification = self.verifier.verify(step_text, expected).await;
        trace.extend(verification.trace());

        let reason = match verification.verdict {
            Verdict::Uncertain => StepError::VerificationInconclusive(verification.reason()).to_string(),
            _ => verification.reason(),
        };
        StepResult {
            step_text: step_text.to_string(),
            outcome: verification.verdict,
            reason,
            evidence_trace: std::mem::take(trace),
        }
    }

    fn abort(&mut self, step_text: &str, error: StepError, mut trace: Vec<String>) -> StepResult {
        warn!("[engine] aborting {}: {}", step_text, error);
        let position = self.tracker.rollback().clone();
        trace.push(format!("aborted: {}", error));
        trace.push(format!("position restored to {}", position));
        StepResult {
            step_text: step_text.to_string(),
            outcome: Verdict::Fail,
            reason: error.to_string(),
            evidence_trace: trace,
        }
    }

    /// Canonical screen of the current position
    async fn current_screen(&self) -> String {
        let here = self.tracker.current();
        if here.is_screen {
            return here.name.clone();
        }
        match self.graph.nearest_screen(&here.name).await {
            Ok(Some(screen)) => screen,
            Ok(None) => here.name.clone(),
            Err(e) => {
                warn!("[engine] nearest screen lookup failed: {}", e);
                here.name.clone()
            }
        }
    }

    /// Navigate back to `target` unless the position already is, or lies
    /// within, that screen.
    pub async fn return_to_test_screen(&mut self, target: &str) -> Navigation {
        match self.try_return(target).await {
            Ok(navigation) => navigation,
            Err(e) => {
                self.tracker.rollback();
                self.run
                    .fail(format!("Failed to return to test screen {}: {}", target, e));
                Navigation::Failed
            }
        }
    }

    /// End-of-case return. The steps already decided the run, so a failed
    /// return only warns and clears any popup left open.
    async fn leave_case(&mut self, target: &str) {
        let Err(e) = self.try_return(target).await else {
            return;
        };
        self.tracker.rollback();
        self.run
            .warn(format!("Could not return to test screen {}: {}", target, e));
        if let Err(e) = self.executor.dismiss().await {
            warn!("[engine] dismiss after failed return: {}", e);
        }
    }

    async fn try_return(&mut self, target: &str) -> Result<Navigation, StepError> {
        let here = self.tracker.current().clone();
        let kind = here.kind();
        if !self.graph.exists(kind, &here.name).await? {
            return Err(StepError::UnknownNode(here.name.clone()));
        }

        if kind == NodeKind::Screen && here.name == target {
            info!("[engine] already on {}", target);
            return Ok(Navigation::AlreadyThere);
        }
        if kind == NodeKind::UiElement && self.graph.is_contained(target, &here.name).await? {
            info!("[engine] {} is within {}", here.name, target);
            return Ok(Navigation::AlreadyThere);
        }

        let plan = self.planner.plan_to(&here, NodeKind::Screen, target).await?;
        let tapped = self.executor.tap(&plan.waypoints, plan.avoid(&here)).await?;
        self.executor.dismiss().await?;
        self.tracker.set_screen(target);
        self.run
            .info(format!("Returned to screen: {} (last tap {})", target, tapped.name));
        Ok(Navigation::Navigated)
    }

    /// Bring the device from `from` to `to` before the first step
    pub async fn generate_step0(&mut self, from: &str, to: &str) -> bool {
        self.logs.mark();
        self.run.info(format!("Moving from {} to {}", from, to));
        match self.try_step0(from, to).await {
            Ok(()) => true,
            Err(e) => {
                self.tracker.rollback();
                self.run.fail(format!("Step 0 failed: {}", e));
                false
            }
        }
    }

    async fn try_step0(&mut self, from: &str, to: &str) -> Result<(), StepError> {
        if to == HOME_SCREEN {
            self.tracker.force_home().await?;
            self.run.info("Relaunched application on Home");
            return Ok(());
        }
        if from == to {
            self.tracker.set_screen(to);
            return Ok(());
        }

        let start = Position::screen(from);
        let plan = self.planner.plan_to(&start, NodeKind::Screen, to).await?;
        let tapped = self.executor.tap(&plan.waypoints, None).await?;
        self.tracker.after_action(&tapped.name).await;
        self.tracker.checkpoint();

        let marker = config::screen_marker(to);
        let mut last_line = String::from("none");
        for attempt in 0..self.options.arrival_attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(self.options.arrival_interval).await;
            }
            if let Some(line) = self.logs.search(SCREEN_START_KEYWORD) {
                if line.to_lowercase().contains(&marker) {
                    self.tracker.set_screen(to);
                    self.run.info(format!("Successfully moved to {} screen.", to));
                    return Ok(());
                }
                last_line = line;
            }
        }

        Err(StepError::ArrivalNotConfirmed {
            screen: to.to_string(),
            last_line,
        })
    }
}

fn is_observation(step: &TestStep) -> bool {
    matches!(
        step.action.trim().to_lowercase().as_str(),
        "observe" | "observation" | "verify" | "check"
    )
}
