//! Tap/hold dispatch over a planned waypoint list.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::adb::DeviceControl;
use super::types::{ActionError, ActionResult, Waypoint};
use crate::config::{self, DISMISS_POINT};

pub struct ActionExecutor {
    device: Arc<dyn DeviceControl>,
    tap_delay: Duration,
    hold_duration: Duration,
}

impl ActionExecutor {
    pub fn new(device: Arc<dyn DeviceControl>) -> Self {
        let settings = &config::get().device;
        Self {
            device,
            tap_delay: Duration::from_millis(settings.tap_delay_ms),
            hold_duration: Duration::from_millis(settings.hold_ms),
        }
    }

    pub fn tap_delay(mut self, delay: Duration) -> Self {
        self.tap_delay = delay;
        self
    }

    pub fn hold_duration(mut self, duration: Duration) -> Self {
        self.hold_duration = duration;
        self
    }

    /// Tap every waypoint in order, skipping a first entry named `avoid`.
    /// Returns the last waypoint that was tapped.
    pub async fn tap(&self, waypoints: &[Waypoint], avoid: Option<&str>) -> ActionResult<Waypoint> {
        self.dispatch(waypoints, avoid, false).await
    }

    /// Like `tap`, but the final waypoint receives a long-press.
    pub async fn hold(&self, waypoints: &[Waypoint], avoid: Option<&str>) -> ActionResult<Waypoint> {
        self.dispatch(waypoints, avoid, true).await
    }

    /// Tap the neutral screen region to close popups and keyboards
    pub async fn dismiss(&self) -> ActionResult<()> {
        let (x, y) = DISMISS_POINT;
        self.device.tap(x, y).await?;
        tokio::time::sleep(self.tap_delay).await;
        Ok(())
    }

    async fn dispatch(
        &self,
        waypoints: &[Waypoint],
        avoid: Option<&str>,
        hold_last: bool,
    ) -> ActionResult<Waypoint> {
        if waypoints.is_empty() {
            return Err(ActionError::EmptyPath);
        }

        let skip_first = matches!((avoid, waypoints.first()), (Some(a), Some(first)) if first.name == a);
        let last_index = waypoints.len() - 1;
        let mut last_tapped: Option<&Waypoint> = None;

        for (idx, waypoint) in waypoints.iter().enumerate() {
            if idx == 0 && skip_first {
                info!("Skipping {} (already there)", waypoint.name);
                continue;
            }

            let result = if hold_last && idx == last_index {
                info!(
                    "Holding {} at ({}, {}) for {:?}",
                    waypoint.name, waypoint.x, waypoint.y, self.hold_duration
                );
                self.device
                    .long_press(waypoint.x, waypoint.y, self.hold_duration)
                    .await
            } else {
                info!("Tapping {} at ({}, {})", waypoint.name, waypoint.x, waypoint.y);
                self.device.tap(waypoint.x, waypoint.y).await
            };

            // Later waypoints assume this one landed; stop on the first failure.
            if let Err(e) = result {
                warn!("Device action on {} failed: {}", waypoint.name, e);
                return match last_tapped {
                    Some(w) => Ok(w.clone()),
                    None => Err(ActionError::Device(e)),
                };
            }

            tokio::time::sleep(self.tap_delay).await;
            last_tapped = Some(waypoint);
        }

        last_tapped.cloned().ok_or(ActionError::NothingTapped)
    }
}
