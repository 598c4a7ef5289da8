//! Canonical resolver: maps step text to a graph target and action.
//!
//! The reasoning service answers with loosely structured JSON. It is
//! validated once here into a [`Resolution`]; everything downstream works
//! with [`ResolvedStep`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config;
use crate::reasoning::{Reasoner, ReasoningError, ReasoningRequest};

/// Result type for resolution
pub type ResolutionResult<T> = Result<T, ResolutionError>;

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("malformed resolver output ({reason}): {raw_text}")]
    Malformed { raw_text: String, reason: String },

    #[error("reasoning service failed: {0}")]
    Service(#[from] ReasoningError),

    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not load alias table: {0}")]
    Aliases(String),
}

/// Interaction requested by a step. Anything other than tap/hold is
/// carried out by the delegation sub-loop after the primary action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum ActionKind {
    Tap,
    Hold,
    Pinch,
    Other(String),
}

impl ActionKind {
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "tap" => ActionKind::Tap,
            "hold" => ActionKind::Hold,
            "pinch" => ActionKind::Pinch,
            other => ActionKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Tap => "tap",
            ActionKind::Hold => "hold",
            ActionKind::Pinch => "pinch",
            ActionKind::Other(tag) => tag,
        }
    }

    /// Whether the executor alone can carry out this action
    pub fn is_primitive(&self) -> bool {
        matches!(self, ActionKind::Tap | ActionKind::Hold)
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedStep {
    pub canonical_name: String,
    pub action: ActionKind,
    pub action_data: Value,
    pub expected_result: String,
}

/// Validated resolver output
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(ResolvedStep),
    Malformed { raw_text: String, reason: String },
}

#[derive(Deserialize)]
struct RawResolution {
    canonical_name: Option<String>,
    action_type: Option<String>,
    #[serde(default)]
    action_data: Value,
    expected_result: Option<Value>,
}

impl Resolution {
    /// Validate a raw response. `expected` fills in a missing expected result.
    pub fn parse(raw_text: &str, expected: &str) -> Self {
        let malformed = |reason: &str| Resolution::Malformed {
            raw_text: raw_text.to_string(),
            reason: reason.to_string(),
        };

        let Some(json) = extract_json_object(raw_text) else {
            return malformed("no JSON object");
        };
        let raw: RawResolution = match serde_json::from_str(json) {
            Ok(raw) => raw,
            Err(_) => return malformed("not a resolver object"),
        };

        let canonical_name = match raw.canonical_name.map(|s| s.trim().to_string()) {
            Some(name) if !name.is_empty() => name,
            _ => return malformed("missing canonical_name"),
        };
        let action = match raw.action_type.as_deref().map(str::trim) {
            Some(tag) if !tag.is_empty() => ActionKind::parse(tag),
            _ => return malformed("missing action_type"),
        };
        if action == ActionKind::Other("observation".to_string()) {
            return malformed("observation is not an action");
        }

        let expected_result = match raw.expected_result {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::Null) | None => expected.to_string(),
            Some(Value::String(_)) => expected.to_string(),
            Some(other) => other.to_string(),
        };

        Resolution::Resolved(ResolvedStep {
            canonical_name,
            action,
            action_data: raw.action_data,
            expected_result,
        })
    }
}

/// Return the JSON object in `text`: a ```json fenced block if present,
/// otherwise the first balanced `{...}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").ok())
        .as_ref();
    if let Some(body) = fence.and_then(|re| re.captures(text)).and_then(|c| c.get(1)) {
        return Some(body.as_str());
    }

    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AliasEntry {
    #[serde(rename = "type", default = "unknown_type")]
    pub kind: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn unknown_type() -> String {
    "Unknown".to_string()
}

/// Canonical name -> type and aliases. Read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct AliasTable {
    entries: BTreeMap<String, AliasEntry>,
}

impl AliasTable {
    pub fn from_json(text: &str) -> ResolutionResult<Self> {
        serde_json::from_str(text).map_err(|e| ResolutionError::Aliases(e.to_string()))
    }

    pub fn load(path: &Path) -> ResolutionResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ResolutionError::Aliases(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn get(&self, canonical: &str) -> Option<&AliasEntry> {
        self.entries.get(canonical)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One `- Canonical (Type): alias, alias` line per entry, sorted by name
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(canonical, entry)| {
                format!("- {} ({}): {}", canonical, entry.kind, entry.aliases.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Graph schema text shown in prompts. A missing file is tolerated; the
/// prompts just go without it.
pub fn load_schema(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(schema) => schema,
        Err(e) => {
            warn!("[resolver] no graph schema at {}: {}", path.display(), e);
            String::new()
        }
    }
}

pub struct CanonicalResolver {
    reasoner: Arc<dyn Reasoner>,
    aliases: AliasTable,
    schema: String,
    timeout: Duration,
}

impl CanonicalResolver {
    pub fn new(reasoner: Arc<dyn Reasoner>, aliases: AliasTable, schema: impl Into<String>) -> Self {
        Self {
            reasoner,
            aliases,
            schema: schema.into(),
            timeout: Duration::from_secs(config::get().reasoning.resolve_timeout),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn resolve(
        &self,
        step_text: &str,
        goal: &str,
        current_screen: &str,
        expected: &str,
    ) -> ResolutionResult<ResolvedStep> {
        let request = ReasoningRequest::new().user(build_resolution_prompt(
            &self.aliases.render(),
            &self.schema,
            step_text,
            goal,
            current_screen,
            expected,
        ));

        let raw = tokio::time::timeout(self.timeout, self.reasoner.complete(request))
            .await
            .map_err(|_| ResolutionError::Timeout(self.timeout))??;
        debug!("[resolver] raw: {}", raw);

        match Resolution::parse(&raw, expected) {
            Resolution::Resolved(step) => {
                info!(
                    "[resolver] {} -> {} ({})",
                    step_text,
                    step.canonical_name,
                    step.action.as_str()
                );
                Ok(step)
            }
            Resolution::Malformed { raw_text, reason } => {
                Err(ResolutionError::Malformed { raw_text, reason })
            }
        }
    }
}

pub fn build_resolution_prompt(
    alias_mapping: &str,
    schema: &str,
    step_text: &str,
    goal: &str,
    current_screen: &str,
    expected: &str,
) -> String {
    format!(
        r#"You are given a user instruction step and a set of canonical UI elements with their aliases and types.

Alias Mappings:
{alias_mapping}

Graph Schema:
{schema}

Original User Input:
{goal}

Current User Step:
{step}

Current Screen:
{screen}

Question:
Which canonical UIElement or Screen name does this step refer to?
Additionally, identify the required action type, any associated data, and the expected result after performing the action.

For action_type:
- Use "tap", "hold", "pinch", or another user action type if none of these fits.
- Never use "observation". Checks belong to a separate verification step.
- "hold" means pressing and holding the UI element until a condition occurs.
- "tap" means a single tap on the UI element.
- "pinch" means a pinch gesture.
- For more complicated interactions, name the interaction instead of a simple type.

For expected_result:
- Describe what the user should see after completing this step (e.g., "Popup window opens").

Return your answer as JSON:
{{
  "canonical_name": "Wi-Fi Option",
  "action_type": "tap",
  "action_data": null,
  "expected_result": "{expected}"
}}"#,
        alias_mapping = alias_mapping.trim(),
        schema = schema.trim(),
        goal = goal.trim(),
        step = step_text.trim(),
        screen = current_screen.trim(),
        expected = expected.trim(),
    )
}
