//! In-memory stand-ins for the graph store, the device, the reasoning
//! service and the log window.

#![allow(dead_code)]

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use step_pilot::device::{DeviceControl, DeviceError, DeviceResult};
use step_pilot::engine::{EngineContext, EngineOptions, StepEngine};
use step_pilot::graph::{GraphClient, GraphStore, Params, QueryError, QueryResult, Rows, queries};
use step_pilot::logs::LogWindow;
use step_pilot::reasoning::{Reasoner, ReasoningError, ReasoningRequest, ReasoningResult};
use step_pilot::resolver::AliasTable;

// ============================================================================
// Graph
// ============================================================================

/// Navigation graph answering the lookups by query text. Anything else is
/// treated as a path query between the first two quoted `name`s.
#[derive(Default)]
pub struct FakeGraph {
    /// Labels per name, in insertion order; a name may exist under several kinds
    labels: HashMap<String, Vec<String>>,
    paths: HashMap<(String, String), Vec<(String, i64, i64)>>,
    triggers: HashMap<String, (String, Option<String>)>,
    contains: HashSet<(String, String)>,
    nearest: HashMap<String, String>,
    descriptions: HashMap<String, String>,
    elements: HashMap<String, Vec<(String, i64, i64)>>,
    path_failures: AtomicUsize,
    pub queries: Mutex<Vec<String>>,
}

impl FakeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn screen(mut self, name: &str) -> Self {
        self.label(name, "Screen");
        self
    }

    fn label(&mut self, name: &str, label: &str) {
        let labels = self.labels.entry(name.to_string()).or_default();
        if !labels.iter().any(|l| l == label) {
            labels.push(label.to_string());
        }
    }

    /// UI element placed inside `screen`
    pub fn element(mut self, screen: &str, name: &str, x: i64, y: i64) -> Self {
        self.label(name, "UIElement");
        self.contains.insert((screen.to_string(), name.to_string()));
        self.nearest.insert(name.to_string(), screen.to_string());
        self.elements
            .entry(screen.to_string())
            .or_default()
            .push((name.to_string(), x, y));
        self
    }

    pub fn path(mut self, start: &str, target: &str, waypoints: &[(&str, i64, i64)]) -> Self {
        self.paths.insert(
            (start.to_string(), target.to_string()),
            waypoints.iter().map(|(n, x, y)| (n.to_string(), *x, *y)).collect(),
        );
        self
    }

    /// Tapping `element` runs `action`, optionally landing on `screen`
    pub fn trigger(mut self, element: &str, action: &str, screen: Option<&str>) -> Self {
        self.triggers.insert(
            element.to_string(),
            (action.to_string(), screen.map(str::to_string)),
        );
        if let Some(screen) = screen {
            self.label(screen, "Screen");
        }
        self
    }

    pub fn description(mut self, screen: &str, text: &str) -> Self {
        self.descriptions.insert(screen.to_string(), text.to_string());
        self
    }

    /// Fail the next `count` path queries with a syntax error
    pub fn failing_paths(self, count: usize) -> Self {
        self.path_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn path_queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| !is_lookup(q))
            .cloned()
            .collect()
    }

    fn answer_path(&self, query: &str) -> QueryResult<Rows> {
        let remaining = self.path_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.path_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(QueryError::Store {
                code: "Neo.ClientError.Statement.SyntaxError".to_string(),
                message: "Unknown function 'apoc.coll.indexOf'".to_string(),
            });
        }

        let names: Vec<String> = Regex::new(r#"\{name: "([^"]*)"\}"#)
            .unwrap()
            .captures_iter(query)
            .map(|c| c[1].to_string())
            .collect();
        let waypoints = match names.as_slice() {
            [start, target, ..] => self
                .paths
                .get(&(start.clone(), target.clone()))
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        Ok(rows(
            &["name", "x", "y"],
            waypoints
                .into_iter()
                .map(|(n, x, y)| vec![json!(n), json!(x), json!(y)])
                .collect(),
        ))
    }
}

fn is_lookup(query: &str) -> bool {
    [
        queries::NODE_EXISTS,
        queries::LABEL_OF,
        queries::NEAREST_SCREEN,
        queries::TRIGGER_OF,
        queries::IS_CONTAINED,
        queries::SCREEN_DESCRIPTION,
        queries::CONTAINED_ELEMENTS,
    ]
    .contains(&query)
}

fn param<'a>(params: &'a Params, key: &str) -> &'a str {
    params.get(key).and_then(Value::as_str).unwrap_or_default()
}

pub fn rows(columns: &[&str], data: Vec<Vec<Value>>) -> Rows {
    Rows::new(columns.iter().map(|c| c.to_string()).collect(), data)
}

#[async_trait]
impl GraphStore for FakeGraph {
    async fn execute(&self, query: &str, params: &Params) -> QueryResult<Rows> {
        self.queries.lock().unwrap().push(query.to_string());
        let name = param(params, "name");

        if query == queries::LABEL_OF {
            // Unlabeled match: whichever node was added last wins
            let data = match self.labels.get(name).and_then(|l| l.last()) {
                Some(label) => vec![vec![json!(label)]],
                None => vec![],
            };
            return Ok(rows(&["label"], data));
        }
        if query == queries::NODE_EXISTS {
            let label = param(params, "label");
            let found = self.labels.get(name).is_some_and(|l| l.iter().any(|x| x == label));
            return Ok(rows(&["count"], vec![vec![json!(found as i64)]]));
        }
        if query == queries::NEAREST_SCREEN {
            let data = match self.nearest.get(name) {
                Some(screen) => vec![vec![json!(screen), json!(1)]],
                None => vec![],
            };
            return Ok(rows(&["screen_name", "distance"], data));
        }
        if query == queries::TRIGGER_OF {
            let data = match self.triggers.get(name) {
                Some((action, screen)) => vec![vec![json!(action), json!(screen)]],
                None => vec![],
            };
            return Ok(rows(&["action_name", "screen_name"], data));
        }
        if query == queries::IS_CONTAINED {
            let key = (param(params, "screen").to_string(), param(params, "element").to_string());
            return Ok(rows(&["contained"], vec![vec![json!(self.contains.contains(&key))]]));
        }
        if query == queries::SCREEN_DESCRIPTION {
            let data = match self.descriptions.get(name) {
                Some(text) => vec![vec![json!(text)]],
                None => vec![],
            };
            return Ok(rows(&["description"], data));
        }
        if query == queries::CONTAINED_ELEMENTS {
            let data = self
                .elements
                .get(name)
                .map(|els| {
                    els.iter()
                        .map(|(n, x, y)| vec![json!(n), json!(x), json!(y), Value::Null])
                        .collect()
                })
                .unwrap_or_default();
            return Ok(rows(&["name", "x", "y", "action"], data));
        }
        self.answer_path(query)
    }
}

// ============================================================================
// Device
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Tap(i64, i64),
    LongPress(i64, i64),
    Screenshot,
    Relaunch,
}

#[derive(Default)]
pub struct RecordingDevice {
    calls: Mutex<Vec<DeviceCall>>,
    failing: Mutex<HashSet<(i64, i64)>>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make taps and long-presses at `(x, y)` fail
    pub fn fail_at(&self, x: i64, y: i64) {
        self.failing.lock().unwrap().insert((x, y));
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Taps and long-presses only
    pub fn touches(&self) -> Vec<DeviceCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, DeviceCall::Tap(..) | DeviceCall::LongPress(..)))
            .collect()
    }

    fn touch(&self, call: DeviceCall, x: i64, y: i64) -> DeviceResult<()> {
        if self.failing.lock().unwrap().contains(&(x, y)) {
            return Err(DeviceError::CommandFailed {
                command: format!("input tap {} {}", x, y),
                status: "exit status: 1".to_string(),
                stderr: "device offline".to_string(),
            });
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl DeviceControl for RecordingDevice {
    async fn tap(&self, x: i64, y: i64) -> DeviceResult<()> {
        self.touch(DeviceCall::Tap(x, y), x, y)
    }

    async fn long_press(&self, x: i64, y: i64, _duration: Duration) -> DeviceResult<()> {
        self.touch(DeviceCall::LongPress(x, y), x, y)
    }

    async fn screenshot(&self, path: &Path) -> DeviceResult<()> {
        self.calls.lock().unwrap().push(DeviceCall::Screenshot);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        image::RgbImage::new(8, 16)
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| DeviceError::CommandFailed {
                command: "screencap".to_string(),
                status: "encode".to_string(),
                stderr: e.to_string(),
            })?;
        Ok(())
    }

    async fn relaunch(&self) -> DeviceResult<()> {
        self.calls.lock().unwrap().push(DeviceCall::Relaunch);
        Ok(())
    }
}

// ============================================================================
// Reasoning service
// ============================================================================

/// Prompt fragments that identify each kind of request
pub const RESOLVE: &str = "Alias Mappings:";
pub const REPAIR: &str = "expert in Neo4j Cypher";
pub const LOG_CHECK: &str = "[Logs]";
pub const VISION: &str = "Does the current screen show";
pub const DELEGATE: &str = "one atomic interaction at a time";

#[derive(Debug, Clone)]
pub enum Answer {
    Text(String),
    Error,
    Hang,
}

/// Answers requests whose prompt contains a registered fragment. Each
/// fragment has a queue; its last answer repeats once the queue drains.
#[derive(Default)]
pub struct ScriptedReasoner {
    script: Mutex<Vec<(String, VecDeque<Answer>)>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, fragment: &str, answer: &str) -> Self {
        self.push(fragment, Answer::Text(answer.to_string()));
        self
    }

    pub fn on_answer(self, fragment: &str, answer: Answer) -> Self {
        self.push(fragment, answer);
        self
    }

    fn push(&self, fragment: &str, answer: Answer) {
        let mut script = self.script.lock().unwrap();
        match script.iter_mut().find(|(f, _)| f == fragment) {
            Some((_, queue)) => queue.push_back(answer),
            None => script.push((fragment.to_string(), VecDeque::from([answer]))),
        }
    }

    /// Number of requests whose prompt contained `fragment`
    pub fn count(&self, fragment: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(fragment))
            .count()
    }

    fn next(&self, prompt: &str) -> Option<Answer> {
        let mut script = self.script.lock().unwrap();
        let (_, queue) = script.iter_mut().find(|(f, _)| prompt.contains(f.as_str()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn complete(&self, request: ReasoningRequest) -> ReasoningResult<String> {
        let prompt = request.text();
        self.prompts.lock().unwrap().push(prompt.clone());
        match self.next(&prompt) {
            Some(Answer::Text(text)) => Ok(text),
            Some(Answer::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ReasoningError::Timeout(Duration::from_secs(3600)))
            }
            Some(Answer::Error) | None => Err(ReasoningError::ConnectionFailed(
                "no scripted answer".to_string(),
            )),
        }
    }
}

pub fn resolved(name: &str, action: &str, expected: &str) -> String {
    json!({
        "canonical_name": name,
        "action_type": action,
        "action_data": null,
        "expected_result": expected,
    })
    .to_string()
}

pub fn log_verdict(result: &str, reason: &str) -> String {
    format!("```json\n{}\n```", json!({"result": result, "reason": reason}))
}

// ============================================================================
// Logs
// ============================================================================

#[derive(Default)]
pub struct FakeLogs {
    lines: Mutex<Vec<String>>,
    marks: AtomicUsize,
}

impl FakeLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    pub fn marks(&self) -> usize {
        self.marks.load(Ordering::SeqCst)
    }
}

impl LogWindow for FakeLogs {
    fn mark(&self) {
        self.marks.fetch_add(1, Ordering::SeqCst);
    }

    fn search(&self, keyword: &str) -> Option<String> {
        let keyword = keyword.to_lowercase();
        self.lines
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|l| l.to_lowercase().contains(&keyword))
            .cloned()
    }

    fn tail(&self, limit: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap();
        lines[lines.len().saturating_sub(limit)..].to_vec()
    }
}

// ============================================================================
// Engine wiring
// ============================================================================

pub struct Harness {
    pub graph: Arc<FakeGraph>,
    pub client: GraphClient,
    pub device: Arc<RecordingDevice>,
    pub reasoner: Arc<ScriptedReasoner>,
    pub logs: Arc<FakeLogs>,
    pub screenshots: tempfile::TempDir,
}

impl Harness {
    pub fn new(graph: FakeGraph, reasoner: ScriptedReasoner) -> Self {
        let graph = Arc::new(graph);
        Self {
            client: GraphClient::new(Arc::clone(&graph) as Arc<dyn GraphStore>),
            graph,
            device: Arc::new(RecordingDevice::new()),
            reasoner: Arc::new(reasoner),
            logs: Arc::new(FakeLogs::new()),
            screenshots: tempfile::tempdir().unwrap(),
        }
    }

    pub fn options(&self) -> EngineOptions {
        EngineOptions::default()
            .without_delays()
            .timeouts(
                Duration::from_millis(200),
                Duration::from_millis(200),
                Duration::from_millis(200),
            )
            .screenshot_dir(self.screenshots.path())
    }

    pub fn engine(&self, options: EngineOptions) -> StepEngine {
        let aliases = AliasTable::from_json(
            r#"{"Wifi": {"type": "UIElement", "aliases": ["Wi-Fi", "wireless"]}}"#,
        )
        .unwrap();
        let ctx = EngineContext {
            graph: self.client.clone(),
            device: Arc::clone(&self.device) as Arc<dyn DeviceControl>,
            reasoner: Arc::clone(&self.reasoner) as Arc<dyn Reasoner>,
            logs: Arc::clone(&self.logs) as Arc<dyn LogWindow>,
            aliases,
            schema: "(:Screen)-[:CONTAINS]->(:UIElement)".to_string(),
        };
        StepEngine::new(ctx, options)
    }
}

/// Home contains Settings; Settings contains Wifi, which opens WifiPopup
pub fn settings_graph() -> FakeGraph {
    FakeGraph::new()
        .screen("Home")
        .screen("Settings")
        .element("Home", "SettingsTab", 50, 900)
        .element("Settings", "Wifi", 100, 200)
        .element("WifiPopup", "Connect", 300, 400)
        .trigger("SettingsTab", "OpenSettings", Some("Settings"))
        .trigger("Wifi", "OpenWifi", Some("WifiPopup"))
        .path("Home", "Settings", &[("SettingsTab", 50, 900)])
        .path("Settings", "Wifi", &[("Wifi", 100, 200)])
        .path("WifiPopup", "Connect", &[("Connect", 300, 400)])
        .path("Connect", "Settings", &[("Connect", 300, 400), ("Back", 20, 20)])
        .path("WifiPopup", "Settings", &[("Close", 700, 100)])
}
