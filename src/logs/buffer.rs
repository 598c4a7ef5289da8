//! Bounded in-memory window over device log lines.
//!
//! Lines are pruned by age (`window`) and by the watermark set with
//! `mark()`. A read never returns a line older than
//! `max(now - window, watermark)`.

use chrono::{Duration, NaiveDateTime};
use std::collections::VecDeque;

/// Hard cap on buffered lines regardless of age
pub const DEFAULT_CAPACITY: usize = 20_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: NaiveDateTime,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    window: Duration,
    watermark: Option<NaiveDateTime>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(window: Duration) -> Self {
        Self::with_capacity(window, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(window: Duration, capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            window,
            watermark: None,
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: LogLine) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Start a fresh window: nothing before `at` is visible afterwards.
    pub fn mark(&mut self, at: NaiveDateTime) {
        self.watermark = Some(at);
    }

    pub fn watermark(&self) -> Option<NaiveDateTime> {
        self.watermark
    }

    /// Oldest timestamp still visible at `now`
    pub fn cutoff(&self, now: NaiveDateTime) -> NaiveDateTime {
        let age_cutoff = now - self.window;
        match self.watermark {
            Some(mark) if mark > age_cutoff => mark,
            _ => age_cutoff,
        }
    }

    /// Drop lines older than the cutoff. Lines can arrive slightly out of
    /// order, so everything is scanned rather than just the front.
    pub fn prune(&mut self, now: NaiveDateTime) {
        let cutoff = self.cutoff(now);
        self.lines.retain(|line| line.timestamp >= cutoff);
    }

    /// Most recent line containing `keyword`, case-insensitive
    pub fn search(&mut self, keyword: &str, now: NaiveDateTime) -> Option<String> {
        self.prune(now);
        let needle = keyword.to_lowercase();
        self.lines
            .iter()
            .rev()
            .find(|line| line.text.to_lowercase().contains(&needle))
            .map(|line| line.text.clone())
    }

    /// All visible lines, oldest first
    pub fn lines(&mut self, now: NaiveDateTime) -> Vec<String> {
        self.prune(now);
        self.lines.iter().map(|line| line.text.clone()).collect()
    }

    /// The last `limit` visible lines, oldest first
    pub fn tail(&mut self, limit: usize, now: NaiveDateTime) -> Vec<String> {
        self.prune(now);
        let skip = self.lines.len().saturating_sub(limit);
        self.lines.iter().skip(skip).map(|line| line.text.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
