//! Verification arbiter.
//!
//! Two evidence channels decide a step's outcome:
//! 1. Log channel: the reasoning service correlates the expected result
//!    with the recent device log window.
//! 2. Vision channel: only when the log channel did not report success,
//!    a fresh screenshot and a rule-annotated yes/no question.
//!
//! Either channel reporting success wins. The outcome is a failure only
//! when both channels explicitly fail; anything else is uncertain. Neither
//! channel returns an error: timeouts and malformed answers become
//! `Verdict::Uncertain`.

use image::GenericImageView;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{self, SCREEN_START_KEYWORD};
use crate::device::DeviceControl;
use crate::logs::LogWindow;
use crate::reasoning::{Reasoner, ReasoningRequest};
use crate::resolver::extract_json_object;

/// Lines of the log window sent to the log channel
pub const LOG_WINDOW_LINES: usize = 200;

/// Screenshots larger than this on their longest edge are downscaled
pub const MAX_IMAGE_EDGE: u32 = 1600;

/// Keywords whose most recent line is always shown to the log channel
pub const EVIDENCE_KEYWORDS: [&str; 3] = ["[Msg]", "Toast.Show", SCREEN_START_KEYWORD];

const VISION_RULES: &str = "You are a precise UI analyst. Follow these rules when reading the screen:\n\
- A selection control (radio buttons, segmented options) always has exactly one option selected. Describe the state of each option before answering.\n\
- Connection state is decided by the colour of the connection indicator (green means connected), not by the Wi-Fi icon.\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Fail,
    Uncertain,
}

impl Verdict {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "success" | "pass" | "passed" => Some(Verdict::Success),
            "fail" | "failed" | "failure" => Some(Verdict::Fail),
            "uncertain" | "unknown" => Some(Verdict::Uncertain),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Success => "success",
            Verdict::Fail => "fail",
            Verdict::Uncertain => "uncertain",
        }
    }
}

/// Combine the channel verdicts. `vision` is `None` when it was not consulted.
pub fn combine(log: Verdict, vision: Option<Verdict>) -> Verdict {
    match (log, vision) {
        (Verdict::Success, _) | (_, Some(Verdict::Success)) => Verdict::Success,
        (Verdict::Fail, Some(Verdict::Fail)) => Verdict::Fail,
        _ => Verdict::Uncertain,
    }
}

/// What one channel concluded and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelVerdict {
    pub verdict: Verdict,
    pub reason: String,
}

impl ChannelVerdict {
    fn uncertain(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Uncertain,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub verdict: Verdict,
    pub log: ChannelVerdict,
    pub vision: Option<ChannelVerdict>,
}

impl Verification {
    /// One line per consulted channel, for the step's evidence trace
    pub fn trace(&self) -> Vec<String> {
        let mut trace = vec![format!(
            "log: {} ({})",
            self.log.verdict.as_str(),
            self.log.reason
        )];
        if let Some(vision) = &self.vision {
            trace.push(format!("vision: {} ({})", vision.verdict.as_str(), vision.reason));
        }
        trace
    }

    pub fn reason(&self) -> String {
        match (&self.vision, self.verdict) {
            (Some(vision), Verdict::Success) if self.log.verdict != Verdict::Success => {
                vision.reason.clone()
            }
            (Some(vision), Verdict::Fail | Verdict::Uncertain) => {
                format!("{}; {}", self.log.reason, vision.reason)
            }
            _ => self.log.reason.clone(),
        }
    }
}

pub struct Verifier {
    reasoner: Arc<dyn Reasoner>,
    device: Arc<dyn DeviceControl>,
    logs: Arc<dyn LogWindow>,
    screenshot_dir: PathBuf,
    timeout: Duration,
    captures: AtomicUsize,
}

impl Verifier {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        device: Arc<dyn DeviceControl>,
        logs: Arc<dyn LogWindow>,
        screenshot_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            reasoner,
            device,
            logs,
            screenshot_dir: screenshot_dir.into(),
            timeout: Duration::from_secs(config::get().reasoning.verify_timeout),
            captures: AtomicUsize::new(0),
        }
    }

    /// Per-channel timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn verify(&self, step_text: &str, expected: &str) -> Verification {
        let log = self.check_logs(step_text, expected).await;
        info!("[verify] log channel: {} ({})", log.verdict.as_str(), log.reason);

        let vision = if log.verdict == Verdict::Success {
            None
        } else {
            let vision = self.check_screen(expected).await;
            info!(
                "[verify] vision channel: {} ({})",
                vision.verdict.as_str(),
                vision.reason
            );
            Some(vision)
        };

        Verification {
            verdict: combine(log.verdict, vision.as_ref().map(|v| v.verdict)),
            log,
            vision,
        }
    }

    /// Log lines handed to the log channel
    pub fn log_evidence(&self) -> Vec<String> {
        let mut evidence: Vec<String> = EVIDENCE_KEYWORDS
            .iter()
            .filter_map(|keyword| self.logs.search(keyword))
            .collect();
        evidence.extend(self.logs.tail(LOG_WINDOW_LINES));
        evidence
    }

    async fn check_logs(&self, step_text: &str, expected: &str) -> ChannelVerdict {
        let prompt = build_log_prompt(step_text, expected, &self.log_evidence());
        let request = ReasoningRequest::new().user(prompt);

        match tokio::time::timeout(self.timeout, self.reasoner.complete(request)).await {
            Ok(Ok(text)) => parse_log_verdict(&text),
            Ok(Err(e)) => {
                warn!("[verify] log channel failed: {}", e);
                ChannelVerdict::uncertain(format!("log analysis failed: {}", e))
            }
            Err(_) => {
                warn!("[verify] log channel timed out");
                ChannelVerdict::uncertain(format!("log analysis timed out after {:?}", self.timeout))
            }
        }
    }

    async fn check_screen(&self, expected: &str) -> ChannelVerdict {
        let index = self.captures.fetch_add(1, Ordering::SeqCst);
        let path = self.screenshot_dir.join(format!("verify_{:03}.png", index));

        let png = match self.capture(&path).await {
            Ok(png) => png,
            Err(reason) => {
                warn!("[verify] {}", reason);
                return ChannelVerdict::uncertain(reason);
            }
        };

        let request = ReasoningRequest::new()
            .user(build_vision_question(expected))
            .image_png(&png);
        match tokio::time::timeout(self.timeout, self.reasoner.complete(request)).await {
            Ok(Ok(answer)) => ChannelVerdict {
                verdict: parse_yes_no(&answer),
                reason: first_line(&answer),
            },
            Ok(Err(e)) => ChannelVerdict::uncertain(format!("vision check failed: {}", e)),
            Err(_) => {
                ChannelVerdict::uncertain(format!("vision check timed out after {:?}", self.timeout))
            }
        }
    }

    async fn capture(&self, path: &Path) -> Result<Vec<u8>, String> {
        tokio::time::timeout(self.timeout, self.device.screenshot(path))
            .await
            .map_err(|_| "screenshot timed out".to_string())?
            .map_err(|e| format!("screenshot failed: {}", e))?;
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| format!("cannot read screenshot {}: {}", path.display(), e))?;
        downscale_png(&raw, MAX_IMAGE_EDGE)
    }
}

/// Shrink a PNG so its longest edge is at most `max_edge`. Smaller images
/// are returned unchanged.
pub fn downscale_png(raw: &[u8], max_edge: u32) -> Result<Vec<u8>, String> {
    let img = image::load_from_memory(raw).map_err(|e| format!("invalid screenshot: {}", e))?;
    let (width, height) = img.dimensions();
    if width.max(height) <= max_edge {
        return Ok(raw.to_vec());
    }

    debug!("[verify] downscaling {}x{} screenshot", width, height);
    let resized = img.resize(max_edge, max_edge, image::imageops::FilterType::Triangle);
    let mut png = Vec::new();
    resized
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| format!("failed to encode screenshot: {}", e))?;
    Ok(png)
}

pub fn build_log_prompt(step_text: &str, expected: &str, logs: &[String]) -> String {
    format!(
        r#"Below are a test step that was just performed, the result expected when it succeeds, and the device logs collected since.

[Step]
{step}

[Expected result]
{expected}

[Logs]
{logs}

Decide whether the step succeeded, failed, or whether the logs cannot tell.
Answer in JSON with exactly two keys:
- "result": "success" | "fail" | "uncertain"
- "reason": a short explanation"#,
        step = step_text.trim(),
        expected = expected.trim(),
        logs = logs.join("\n"),
    )
}

pub fn build_vision_question(expected: &str) -> String {
    format!(
        "{}Question: Does the current screen show the following? \"{}\"\n\
         Start your answer with Yes or No, then explain briefly.",
        VISION_RULES,
        expected.trim()
    )
}

/// Read `{"result", "reason"}`; a bare verdict word is accepted too.
pub fn parse_log_verdict(text: &str) -> ChannelVerdict {
    if let Some(json) = extract_json_object(text)
        && let Ok(value) = serde_json::from_str::<serde_json::Value>(json)
    {
        let verdict = value["result"].as_str().and_then(Verdict::parse);
        let reason = value["reason"].as_str().unwrap_or("").trim().to_string();
        return match verdict {
            Some(verdict) => ChannelVerdict { verdict, reason },
            None => ChannelVerdict::uncertain(format!("unrecognised log verdict: {}", text.trim())),
        };
    }

    let first_word = text
        .split(|c: char| !c.is_alphabetic())
        .find(|word| !word.is_empty())
        .unwrap_or("");
    match Verdict::parse(first_word) {
        Some(verdict) => ChannelVerdict {
            verdict,
            reason: first_line(text),
        },
        None => ChannelVerdict::uncertain(format!("unparseable log verdict: {}", text.trim())),
    }
}

/// A leading yes/no decides; anything else is uncertain
pub fn parse_yes_no(answer: &str) -> Verdict {
    let first_word = answer
        .split(|c: char| !c.is_alphabetic())
        .find(|word| !word.is_empty())
        .unwrap_or("")
        .to_lowercase();
    match first_word.as_str() {
        "yes" => Verdict::Success,
        "no" => Verdict::Fail,
        _ => Verdict::Uncertain,
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .to_string()
}
