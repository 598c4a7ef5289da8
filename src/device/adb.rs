//! Device control surface.
//!
//! `DeviceControl` is what the executor and verifier need from a device:
//! tap, long-press, screenshot and application relaunch. `AdbDevice`
//! drives an Android device through the `adb` binary.

use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::types::{DeviceError, DeviceResult};
use crate::config::DeviceSettings;

#[async_trait]
pub trait DeviceControl: Send + Sync {
    async fn tap(&self, x: i64, y: i64) -> DeviceResult<()>;

    async fn long_press(&self, x: i64, y: i64, duration: Duration) -> DeviceResult<()>;

    /// Capture the current screen as PNG into `path`
    async fn screenshot(&self, path: &Path) -> DeviceResult<()>;

    /// Stop and restart the application under test
    async fn relaunch(&self) -> DeviceResult<()>;
}

/// Android device driven through `adb`
#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb_path: String,
    package: String,
    serial: Option<String>,
    command_timeout: Duration,
}

impl AdbDevice {
    pub fn new(settings: &DeviceSettings) -> Self {
        Self {
            adb_path: settings.adb_path.clone(),
            package: settings.app_package.clone(),
            serial: None,
            command_timeout: Duration::from_secs(30),
        }
    }

    /// Target a specific device when several are attached
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    fn base_args(&self) -> Vec<String> {
        match &self.serial {
            Some(serial) => vec!["-s".to_string(), serial.clone()],
            None => Vec::new(),
        }
    }

    async fn run(&self, args: &[String]) -> DeviceResult<Output> {
        let mut full = self.base_args();
        full.extend(args.iter().cloned());
        let command = format!("{} {}", self.adb_path, full.join(" "));
        debug!("[adb] {}", command);

        let output = tokio::time::timeout(
            self.command_timeout,
            Command::new(&self.adb_path).args(&full).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| DeviceError::Timeout {
            command: command.clone(),
            timeout: self.command_timeout,
        })??;

        if !output.status.success() {
            return Err(DeviceError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn shell(&self, args: &[&str]) -> DeviceResult<()> {
        let mut full = vec!["shell".to_string()];
        full.extend(args.iter().map(|s| s.to_string()));
        self.run(&full).await.map(|_| ())
    }
}

#[async_trait]
impl DeviceControl for AdbDevice {
    async fn tap(&self, x: i64, y: i64) -> DeviceResult<()> {
        self.shell(&["input", "tap", &x.to_string(), &y.to_string()])
            .await
    }

    async fn long_press(&self, x: i64, y: i64, duration: Duration) -> DeviceResult<()> {
        let (x, y) = (x.to_string(), y.to_string());
        let ms = duration.as_millis().to_string();
        self.shell(&["input", "swipe", &x, &y, &x, &y, &ms]).await
    }

    async fn screenshot(&self, path: &Path) -> DeviceResult<()> {
        let output = self
            .run(&["exec-out".to_string(), "screencap".to_string(), "-p".to_string()])
            .await?;
        if output.stdout.is_empty() {
            return Err(DeviceError::CommandFailed {
                command: "screencap".to_string(),
                status: output.status.to_string(),
                stderr: "empty screenshot".to_string(),
            });
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &output.stdout).await?;
        Ok(())
    }

    async fn relaunch(&self) -> DeviceResult<()> {
        self.shell(&["am", "force-stop", &self.package]).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.shell(&[
            "monkey",
            "-p",
            &self.package,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ])
        .await
    }
}
