//! Where the test currently is.
//!
//! The tracker owns the single authoritative `Position` of an engine. It
//! only moves after a device action went through, after a forced relaunch,
//! or on an explicit reset. Moves made by `after_action` stay provisional
//! until `checkpoint`; `rollback` returns to the last confirmed value.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{HOME_SCREEN, RELAUNCH_SETTLE};
use crate::device::{DeviceControl, DeviceResult};
use crate::graph::{GraphClient, NodeKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub name: String,
    #[serde(rename = "isScreen")]
    pub is_screen: bool,
}

impl Position {
    pub fn screen(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_screen: true,
        }
    }

    pub fn element(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_screen: false,
        }
    }

    pub fn home() -> Self {
        Self::screen(HOME_SCREEN)
    }

    /// Graph label used when planning from this position
    pub fn kind(&self) -> NodeKind {
        if self.is_screen {
            NodeKind::Screen
        } else {
            NodeKind::UiElement
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_screen { "screen" } else { "element" };
        write!(f, "{} ({})", self.name, kind)
    }
}

pub struct PositionTracker {
    current: Position,
    confirmed: Position,
    graph: GraphClient,
    device: Arc<dyn DeviceControl>,
    settle: Duration,
}

impl PositionTracker {
    pub fn new(graph: GraphClient, device: Arc<dyn DeviceControl>) -> Self {
        Self {
            current: Position::home(),
            confirmed: Position::home(),
            graph,
            device,
            settle: RELAUNCH_SETTLE,
        }
    }

    /// Time given to the application after a relaunch
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn current(&self) -> &Position {
        &self.current
    }

    /// Record a completed action on `tapped`. The position moves to the
    /// screen it triggers, or stays on the element when it triggers none.
    pub async fn after_action(&mut self, tapped: &str) -> &Position {
        let next = match self.graph.trigger_of(tapped).await {
            Ok(Some(trigger)) => match trigger.screen_name {
                Some(screen) => Position::screen(screen),
                None => Position::element(tapped),
            },
            Ok(None) => Position::element(tapped),
            Err(e) => {
                warn!("[position] trigger lookup for {} failed: {}", tapped, e);
                Position::element(tapped)
            }
        };
        info!("[position] {} -> {}", self.current, next);
        self.current = next;
        &self.current
    }

    /// Restart the application and anchor on Home without any graph lookup
    pub async fn force_home(&mut self) -> DeviceResult<()> {
        info!("[position] relaunching application");
        self.device.relaunch().await?;
        tokio::time::sleep(self.settle).await;
        self.commit(Position::home());
        Ok(())
    }

    /// Anchor on a screen reached by verified navigation
    pub fn set_screen(&mut self, screen: &str) {
        self.commit(Position::screen(screen));
    }

    /// Fresh start for a new test case
    pub fn reset(&mut self, start: Position) {
        self.current = start.clone();
        self.confirmed = start;
    }

    /// Mark the current position as the one to return to on abort
    pub fn checkpoint(&mut self) {
        self.confirmed = self.current.clone();
    }

    /// Restore the last confirmed position
    pub fn rollback(&mut self) -> &Position {
        if self.current != self.confirmed {
            info!("[position] rolling back {} -> {}", self.current, self.confirmed);
            self.current = self.confirmed.clone();
        }
        &self.current
    }

    fn commit(&mut self, position: Position) {
        self.current = position.clone();
        self.confirmed = position;
    }
}
