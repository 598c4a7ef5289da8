//! Device log collection.
//!
//! A reader thread pulls lines from `adb logcat -v time *:I` (or any
//! `BufRead` source) and is the only writer of a shared `LogBuffer`. The
//! buffer holds at most `DEFAULT_CAPACITY` lines, so a slow consumer never
//! lets the backlog grow and never stalls the reader.

use chrono::{Datelike, Duration, Local, NaiveDateTime};
use regex::Regex;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use tracing::{debug, info, warn};

use super::buffer::{LogBuffer, LogLine};
use crate::device::{DeviceError, DeviceResult};

/// What the engine needs from a log source
pub trait LogWindow: Send + Sync {
    /// Start a fresh window at the current time
    fn mark(&self);

    /// Most recent visible line containing `keyword`, case-insensitive
    fn search(&self, keyword: &str) -> Option<String>;

    /// The last `limit` visible lines, oldest first
    fn tail(&self, limit: usize) -> Vec<String>;
}

type Clock = Box<dyn Fn() -> NaiveDateTime + Send + Sync>;

struct Shared {
    buffer: Mutex<LogBuffer>,
    clock: Clock,
}

impl Shared {
    fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    /// Timestamp a raw line and append it. Returns false once the buffer
    /// is unusable.
    fn push(&self, text: String) -> bool {
        let now = self.now();
        let timestamp = parse_logcat_timestamp(&text, now.year()).unwrap_or(now);
        match self.buffer.lock() {
            Ok(mut buffer) => {
                buffer.push(LogLine { timestamp, text });
                true
            }
            Err(_) => false,
        }
    }
}

pub struct LogCollector {
    shared: Arc<Shared>,
    child: Mutex<Option<Child>>,
}

impl LogCollector {
    /// Start `adb logcat` and collect its output
    pub fn start(adb_path: &str, window_minutes: i64) -> DeviceResult<Self> {
        let command = format!("{} logcat -v time *:I", adb_path);
        info!("[logs] starting `{}`", command);

        let mut child = Command::new(adb_path)
            .args(["logcat", "-v", "time", "*:I"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| DeviceError::CommandFailed {
            command,
            status: "running".to_string(),
            stderr: "stdout not captured".to_string(),
        })?;

        let collector = Self::spawn(BufReader::new(stdout), window_minutes);
        if let Ok(mut slot) = collector.child.lock() {
            *slot = Some(child);
        }
        Ok(collector)
    }

    /// Collect lines from any reader on a background thread
    pub fn spawn<R: BufRead + Send + 'static>(reader: R, window_minutes: i64) -> Self {
        Self::spawn_with_clock(reader, window_minutes, || Local::now().naive_local())
    }

    /// Like `spawn`, with a replacement wall clock for replaying recorded logs
    pub fn spawn_with_clock<R: BufRead + Send + 'static>(
        reader: R,
        window_minutes: i64,
        clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static,
    ) -> Self {
        let shared = Arc::new(Shared {
            buffer: Mutex::new(LogBuffer::new(Duration::minutes(window_minutes))),
            clock: Box::new(clock),
        });

        let writer = Arc::clone(&shared);
        thread::spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if !writer.push(line) {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("[logs] reader stopped: {}", e);
                        break;
                    }
                }
            }
            debug!("[logs] reader thread exiting");
        });

        Self {
            shared,
            child: Mutex::new(None),
        }
    }

    fn with_buffer<T>(&self, f: impl FnOnce(&mut LogBuffer, NaiveDateTime) -> T) -> Option<T> {
        let now = self.shared.now();
        let mut buffer = self.shared.buffer.lock().ok()?;
        Some(f(&mut buffer, now))
    }

    /// Block until the buffer holds at least `min` lines or `timeout` passes.
    /// Returns the number of buffered lines.
    pub fn wait_for_lines(&self, min: usize, timeout: std::time::Duration) -> usize {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let len = self.with_buffer(|buffer, _| buffer.len()).unwrap_or(0);
            if len >= min || std::time::Instant::now() >= deadline {
                return len;
            }
            thread::sleep(std::time::Duration::from_millis(5));
        }
    }
}

impl LogWindow for LogCollector {
    fn mark(&self) {
        self.with_buffer(|buffer, now| buffer.mark(now));
    }

    fn search(&self, keyword: &str) -> Option<String> {
        self.with_buffer(|buffer, now| buffer.search(keyword, now))
            .flatten()
    }

    fn tail(&self, limit: usize) -> Vec<String> {
        self.with_buffer(|buffer, now| buffer.tail(limit, now))
            .unwrap_or_default()
    }
}

impl Drop for LogCollector {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.child.lock()
            && let Some(mut child) = slot.take()
        {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Parse the `MM-DD HH:MM:SS.mmm` prefix of a `logcat -v time` line.
/// Logcat omits the year, so the caller supplies it.
pub fn parse_logcat_timestamp(line: &str, year: i32) -> Option<NaiveDateTime> {
    static PREFIX: OnceLock<Option<Regex>> = OnceLock::new();
    let prefix = PREFIX
        .get_or_init(|| Regex::new(r"^(\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3})").ok())
        .as_ref()?;
    let stamp = prefix.captures(line)?.get(1)?.as_str();
    NaiveDateTime::parse_from_str(&format!("{}-{}", year, stamp), "%Y-%m-%d %H:%M:%S%.3f").ok()
}
