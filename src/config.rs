//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for step-pilot, supporting:
//! - Environment variables for all configurable values
//! - Defaults that match a local device lab setup
//! - Builder-style setters on the per-component config types
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `STEP_PILOT_REASONING_ENDPOINT` | Chat completions endpoint | `http://127.0.0.1:8080/v1/chat/completions` |
//! | `STEP_PILOT_REASONING_MODEL` | Model name | `gpt-4o` |
//! | `STEP_PILOT_REASONING_API_KEY` | Bearer token (falls back to `OPENAI_API_KEY`) | unset |
//! | `STEP_PILOT_REASONING_MAX_TOKENS` | Maximum tokens in a response | `1024` |
//! | `STEP_PILOT_RESOLVE_TIMEOUT` | Resolution call timeout (seconds) | `60` |
//! | `STEP_PILOT_VERIFY_TIMEOUT` | Verification call timeout (seconds) | `60` |
//! | `STEP_PILOT_DELEGATE_TIMEOUT` | Delegation call timeout (seconds) | `120` |
//! | `STEP_PILOT_GRAPH_URL` | Graph database HTTP base URL (falls back to `NEO4J_URI`) | `http://localhost:7474` |
//! | `STEP_PILOT_GRAPH_DATABASE` | Database name | `neo4j` |
//! | `STEP_PILOT_GRAPH_USER` | User (falls back to `NEO4J_USER`) | `neo4j` |
//! | `STEP_PILOT_GRAPH_PASSWORD` | Password (falls back to `NEO4J_PASSWORD`) | empty |
//! | `STEP_PILOT_GRAPH_TIMEOUT` | Per-query timeout (seconds) | `30` |
//! | `STEP_PILOT_ADB_PATH` | Path to the `adb` binary | `adb` |
//! | `STEP_PILOT_APP_PACKAGE` | Application package under test | `com.neuromeka.conty3` |
//! | `STEP_PILOT_TAP_DELAY_MS` | Delay after each tap (ms) | `500` |
//! | `STEP_PILOT_HOLD_MS` | Long-press duration (ms) | `10000` |
//! | `STEP_PILOT_LOG_WINDOW_MINUTES` | Age limit of the device log window | `10` |
//! | `STEP_PILOT_SESSION_DIR` | Base directory for run sessions | `/tmp/step-pilot` |
//! | `STEP_PILOT_STOP_ON_FAILURE` | Skip remaining steps after fail/uncertain | `true` |
//! | `STEP_PILOT_ALIAS_PATH` | Alias table JSON | `resource/ui_alias.json` |
//! | `STEP_PILOT_SCHEMA_PATH` | Graph schema description | `resource/graph_structure.txt` |

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

// ============================================================================
// Default Values
// ============================================================================

pub const DEFAULT_REASONING_ENDPOINT: &str = "http://127.0.0.1:8080/v1/chat/completions";
pub const DEFAULT_REASONING_MODEL: &str = "gpt-4o";
pub const DEFAULT_REASONING_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_RESOLVE_TIMEOUT: u64 = 60;
pub const DEFAULT_VERIFY_TIMEOUT: u64 = 60;
pub const DEFAULT_DELEGATE_TIMEOUT: u64 = 120;

pub const DEFAULT_GRAPH_URL: &str = "http://localhost:7474";
pub const DEFAULT_GRAPH_DATABASE: &str = "neo4j";
pub const DEFAULT_GRAPH_USER: &str = "neo4j";
pub const DEFAULT_GRAPH_TIMEOUT: u64 = 30;

pub const DEFAULT_ADB_PATH: &str = "adb";
pub const DEFAULT_APP_PACKAGE: &str = "com.neuromeka.conty3";
pub const DEFAULT_TAP_DELAY_MS: u64 = 500;
pub const DEFAULT_HOLD_MS: u64 = 10_000;

pub const DEFAULT_LOG_WINDOW_MINUTES: i64 = 10;
pub const DEFAULT_SESSION_DIR: &str = "/tmp/step-pilot";
pub const DEFAULT_ALIAS_PATH: &str = "resource/ui_alias.json";
pub const DEFAULT_SCHEMA_PATH: &str = "resource/graph_structure.txt";

/// Maximum number of query executions in one planning call (template + repairs)
pub const MAX_REPAIR_ATTEMPTS: usize = 5;

/// Maximum number of iterations of the delegation sub-loop
pub const MAX_DELEGATION_ITERATIONS: usize = 20;

/// Neutral screen region tapped by the dismiss primitive
pub const DISMISS_POINT: (i64, i64) = (810, 50);

/// Name of the anchor screen reached by a forced relaunch
pub const HOME_SCREEN: &str = "Home";

/// Top-level screens used by the nearest-canonical-screen lookup
pub const TOP_LEVEL_SCREENS: [&str; 6] = ["Home", "Settings", "Run", "Move", "System", "Program"];

/// Time the application gets to settle after a relaunch
pub const RELAUNCH_SETTLE: Duration = Duration::from_secs(6);

/// Log keyword emitted by the application when a screen fragment starts
pub const SCREEN_START_KEYWORD: &str = "StartFragment :";

/// How often arrival on a screen is re-checked in the log before giving up
pub const ARRIVAL_CHECK_ATTEMPTS: usize = 5;

/// Pause between arrival checks
pub const ARRIVAL_CHECK_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_REASONING_ENDPOINT: &str = "STEP_PILOT_REASONING_ENDPOINT";
pub const ENV_REASONING_MODEL: &str = "STEP_PILOT_REASONING_MODEL";
pub const ENV_REASONING_API_KEY: &str = "STEP_PILOT_REASONING_API_KEY";
pub const ENV_REASONING_MAX_TOKENS: &str = "STEP_PILOT_REASONING_MAX_TOKENS";
pub const ENV_RESOLVE_TIMEOUT: &str = "STEP_PILOT_RESOLVE_TIMEOUT";
pub const ENV_VERIFY_TIMEOUT: &str = "STEP_PILOT_VERIFY_TIMEOUT";
pub const ENV_DELEGATE_TIMEOUT: &str = "STEP_PILOT_DELEGATE_TIMEOUT";
pub const ENV_GRAPH_URL: &str = "STEP_PILOT_GRAPH_URL";
pub const ENV_GRAPH_DATABASE: &str = "STEP_PILOT_GRAPH_DATABASE";
pub const ENV_GRAPH_USER: &str = "STEP_PILOT_GRAPH_USER";
pub const ENV_GRAPH_PASSWORD: &str = "STEP_PILOT_GRAPH_PASSWORD";
pub const ENV_GRAPH_TIMEOUT: &str = "STEP_PILOT_GRAPH_TIMEOUT";
pub const ENV_ADB_PATH: &str = "STEP_PILOT_ADB_PATH";
pub const ENV_APP_PACKAGE: &str = "STEP_PILOT_APP_PACKAGE";
pub const ENV_TAP_DELAY_MS: &str = "STEP_PILOT_TAP_DELAY_MS";
pub const ENV_HOLD_MS: &str = "STEP_PILOT_HOLD_MS";
pub const ENV_LOG_WINDOW_MINUTES: &str = "STEP_PILOT_LOG_WINDOW_MINUTES";
pub const ENV_SESSION_DIR: &str = "STEP_PILOT_SESSION_DIR";
pub const ENV_STOP_ON_FAILURE: &str = "STEP_PILOT_STOP_ON_FAILURE";
pub const ENV_ALIAS_PATH: &str = "STEP_PILOT_ALIAS_PATH";
pub const ENV_SCHEMA_PATH: &str = "STEP_PILOT_SCHEMA_PATH";

// ============================================================================
// Legacy Environment Variable Support
// ============================================================================

pub const ENV_API_KEY_LEGACY: &str = "OPENAI_API_KEY";
pub const ENV_GRAPH_URL_LEGACY: &str = "NEO4J_URI";
pub const ENV_GRAPH_USER_LEGACY: &str = "NEO4J_USER";
pub const ENV_GRAPH_PASSWORD_LEGACY: &str = "NEO4J_PASSWORD";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for step-pilot
#[derive(Debug, Clone)]
pub struct Config {
    pub reasoning: ReasoningSettings,
    pub graph: GraphSettings,
    pub device: DeviceSettings,
    pub engine: EngineSettings,
    pub session: SessionSettings,
}

/// Reasoning-service settings
#[derive(Debug, Clone)]
pub struct ReasoningSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    /// Timeout for resolution and query repair calls (seconds)
    pub resolve_timeout: u64,
    /// Timeout for each verification channel (seconds)
    pub verify_timeout: u64,
    /// Timeout for each delegation iteration (seconds)
    pub delegate_timeout: u64,
}

/// Graph store settings
#[derive(Debug, Clone)]
pub struct GraphSettings {
    pub url: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub timeout: u64,
}

/// Device control settings
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub adb_path: String,
    pub app_package: String,
    pub tap_delay_ms: u64,
    pub hold_ms: u64,
}

/// Engine policy and resource locations
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub log_window_minutes: i64,
    pub stop_on_failure: bool,
    pub alias_path: PathBuf,
    pub schema_path: PathBuf,
}

/// Session-related settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub base_dir: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            reasoning: ReasoningSettings::from_env(),
            graph: GraphSettings::from_env(),
            device: DeviceSettings::from_env(),
            engine: EngineSettings::from_env(),
            session: SessionSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            reasoning: ReasoningSettings::defaults(),
            graph: GraphSettings::defaults(),
            device: DeviceSettings::defaults(),
            engine: EngineSettings::defaults(),
            session: SessionSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ReasoningSettings {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_REASONING_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_REASONING_ENDPOINT.to_string()),
            model: env::var(ENV_REASONING_MODEL)
                .unwrap_or_else(|_| DEFAULT_REASONING_MODEL.to_string()),
            api_key: env::var(ENV_REASONING_API_KEY)
                .or_else(|_| env::var(ENV_API_KEY_LEGACY))
                .ok()
                .filter(|key| !key.is_empty()),
            max_tokens: parse_env(ENV_REASONING_MAX_TOKENS).unwrap_or(DEFAULT_REASONING_MAX_TOKENS),
            resolve_timeout: parse_env(ENV_RESOLVE_TIMEOUT).unwrap_or(DEFAULT_RESOLVE_TIMEOUT),
            verify_timeout: parse_env(ENV_VERIFY_TIMEOUT).unwrap_or(DEFAULT_VERIFY_TIMEOUT),
            delegate_timeout: parse_env(ENV_DELEGATE_TIMEOUT).unwrap_or(DEFAULT_DELEGATE_TIMEOUT),
        }
    }

    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_REASONING_ENDPOINT.to_string(),
            model: DEFAULT_REASONING_MODEL.to_string(),
            api_key: None,
            max_tokens: DEFAULT_REASONING_MAX_TOKENS,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
            delegate_timeout: DEFAULT_DELEGATE_TIMEOUT,
        }
    }
}

impl GraphSettings {
    pub fn from_env() -> Self {
        Self {
            url: env::var(ENV_GRAPH_URL)
                .or_else(|_| env::var(ENV_GRAPH_URL_LEGACY))
                .map(|url| http_base_url(&url))
                .unwrap_or_else(|_| DEFAULT_GRAPH_URL.to_string()),
            database: env::var(ENV_GRAPH_DATABASE)
                .unwrap_or_else(|_| DEFAULT_GRAPH_DATABASE.to_string()),
            user: env::var(ENV_GRAPH_USER)
                .or_else(|_| env::var(ENV_GRAPH_USER_LEGACY))
                .unwrap_or_else(|_| DEFAULT_GRAPH_USER.to_string()),
            password: env::var(ENV_GRAPH_PASSWORD)
                .or_else(|_| env::var(ENV_GRAPH_PASSWORD_LEGACY))
                .unwrap_or_default(),
            timeout: parse_env(ENV_GRAPH_TIMEOUT).unwrap_or(DEFAULT_GRAPH_TIMEOUT),
        }
    }

    pub fn defaults() -> Self {
        Self {
            url: DEFAULT_GRAPH_URL.to_string(),
            database: DEFAULT_GRAPH_DATABASE.to_string(),
            user: DEFAULT_GRAPH_USER.to_string(),
            password: String::new(),
            timeout: DEFAULT_GRAPH_TIMEOUT,
        }
    }
}

impl DeviceSettings {
    pub fn from_env() -> Self {
        Self {
            adb_path: env::var(ENV_ADB_PATH).unwrap_or_else(|_| DEFAULT_ADB_PATH.to_string()),
            app_package: env::var(ENV_APP_PACKAGE)
                .unwrap_or_else(|_| DEFAULT_APP_PACKAGE.to_string()),
            tap_delay_ms: parse_env(ENV_TAP_DELAY_MS).unwrap_or(DEFAULT_TAP_DELAY_MS),
            hold_ms: parse_env(ENV_HOLD_MS).unwrap_or(DEFAULT_HOLD_MS),
        }
    }

    pub fn defaults() -> Self {
        Self {
            adb_path: DEFAULT_ADB_PATH.to_string(),
            app_package: DEFAULT_APP_PACKAGE.to_string(),
            tap_delay_ms: DEFAULT_TAP_DELAY_MS,
            hold_ms: DEFAULT_HOLD_MS,
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Self {
        Self {
            log_window_minutes: parse_env(ENV_LOG_WINDOW_MINUTES)
                .unwrap_or(DEFAULT_LOG_WINDOW_MINUTES),
            stop_on_failure: env::var(ENV_STOP_ON_FAILURE)
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(true),
            alias_path: env::var(ENV_ALIAS_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_ALIAS_PATH)),
            schema_path: env::var(ENV_SCHEMA_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SCHEMA_PATH)),
        }
    }

    pub fn defaults() -> Self {
        Self {
            log_window_minutes: DEFAULT_LOG_WINDOW_MINUTES,
            stop_on_failure: true,
            alias_path: PathBuf::from(DEFAULT_ALIAS_PATH),
            schema_path: PathBuf::from(DEFAULT_SCHEMA_PATH),
        }
    }
}

impl SessionSettings {
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_SESSION_DIR)
                .unwrap_or_else(|_| DEFAULT_SESSION_DIR.to_string()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_SESSION_DIR.to_string(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Legacy URIs point at the bolt port; the HTTP API lives on 7474.
fn http_base_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("bolt://").or_else(|| url.strip_prefix("neo4j://")) {
        let host = rest.split(':').next().unwrap_or("localhost");
        format!("http://{}:7474", host)
    } else {
        url.trim_end_matches('/').to_string()
    }
}

/// Log marker expected in the `StartFragment` line when `screen` is shown
pub fn screen_marker(screen: &str) -> String {
    match screen {
        "Settings" => "setup".to_string(),
        other => other.to_lowercase(),
    }
}

/// Get the reasoning endpoint (convenience function)
pub fn reasoning_endpoint() -> String {
    get().reasoning.endpoint.clone()
}

/// Get session base directory (convenience function)
pub fn session_base_dir() -> String {
    get().session.base_dir.clone()
}
