//! Step Pilot - graph-guided mobile UI test driver.
//!
//! This crate provides:
//! - Resolution of natural-language test steps to canonical graph nodes
//! - Shortest-path planning over a screen/element/action graph, with
//!   bounded query repair through a reasoning service
//! - Tap, long-press and relaunch primitives over `adb`
//! - Position tracking across screens and UI elements
//! - Pass/fail/uncertain verification from device logs and screenshots
//! - Session directories holding screenshots and run reports
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use step_pilot::config;
//! use step_pilot::engine::{EngineContext, EngineOptions, StepEngine, TestCase, TestStep};
//! use step_pilot::graph::{GraphClient, HttpGraphStore};
//! use step_pilot::device::AdbDevice;
//! use step_pilot::logs::LogCollector;
//! use step_pilot::reasoning::{ChatClient, ReasoningConfig};
//! use step_pilot::resolver::{AliasTable, load_schema};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = config::get();
//! let ctx = EngineContext {
//!     graph: GraphClient::new(Arc::new(HttpGraphStore::new(&cfg.graph)?)),
//!     device: Arc::new(AdbDevice::new(&cfg.device)),
//!     reasoner: Arc::new(ChatClient::new(ReasoningConfig::default())?),
//!     logs: Arc::new(LogCollector::start(&cfg.device.adb_path, cfg.engine.log_window_minutes)?),
//!     aliases: AliasTable::load(&cfg.engine.alias_path)?,
//!     schema: load_schema(&cfg.engine.schema_path),
//! };
//! let mut engine = StepEngine::new(ctx, EngineOptions::default());
//! let result = engine
//!     .run_case(&TestCase {
//!         test_screen: "Settings".into(),
//!         goal: "Connect to the robot over Wi-Fi".into(),
//!         steps: vec![TestStep::new("Tap", "Open the Wi-Fi popup", "Wi-Fi popup opens")],
//!     })
//!     .await;
//! println!("{:?}", result.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod delegate;
pub mod device;
pub mod engine;
pub mod graph;
pub mod logs;
pub mod planner;
pub mod position;
pub mod reasoning;
pub mod resolver;
pub mod session;
pub mod verify;

// Re-export engine types
pub use engine::{
    EngineContext, EngineOptions, EngineState, Navigation, RunResult, RunStatus, StepEngine,
    StepError, StepOutcome, StepResult, TestCase, TestStep,
};

// Re-export collaborators
pub use device::{ActionExecutor, AdbDevice, DeviceControl, Waypoint};
pub use graph::{GraphClient, GraphStore, HttpGraphStore, QueryError};
pub use logs::{LogCollector, LogWindow};
pub use position::{Position, PositionTracker};
pub use reasoning::{ChatClient, Reasoner, ReasoningConfig, ReasoningError, check_health};
pub use resolver::{AliasTable, CanonicalResolver, ResolutionError};
pub use session::Session;
pub use verify::Verdict;
