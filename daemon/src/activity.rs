//! Activity state fusion.
//!
//! One tracker owns the set of watched pids and the most recent device-probe
//! result; the event loop threads it through explicitly, so the transition
//! rule is testable without process-level side effects. The rule is uniform
//! across modes: active = (watched set non-empty) OR (device busy per the
//! most recent probe).

use std::collections::HashSet;

use tracing::debug;

use crate::config::MonitorMode;

#[derive(Debug, Default)]
pub struct ActivityTracker {
    watched: HashSet<i32>,
    device_busy: bool,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pid whose exec event matched a watch pattern.
    /// Returns true when the pid was not already tracked.
    pub fn track(&mut self, pid: i32) -> bool {
        self.watched.insert(pid)
    }

    /// Removes a pid on its exit event. Exit events carry no name, so
    /// removal is identity-only; returns true when the pid was tracked.
    pub fn untrack(&mut self, pid: i32) -> bool {
        self.watched.remove(&pid)
    }

    /// Drops tracked pids that fail the liveness check, covering exit
    /// events the kernel dropped before we could read them.
    pub fn prune(&mut self, mut alive: impl FnMut(i32) -> bool) {
        let before = self.watched.len();
        self.watched.retain(|&pid| alive(pid));
        if self.watched.len() != before {
            debug!(
                removed = before - self.watched.len(),
                "pruned dead watched pids"
            );
        }
    }

    pub fn record_probe(&mut self, busy: bool) {
        self.device_busy = busy;
    }

    pub fn has_watched(&self) -> bool {
        !self.watched.is_empty()
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    pub fn is_active(&self) -> bool {
        !self.watched.is_empty() || self.device_busy
    }

    /// Whether the current wake should run the probe/scan path in `mode`.
    /// Hybrid suppresses polling entirely while the event path is tracking
    /// a watched process; process mode never polls on a timer (the loop
    /// runs one confirmatory probe when the set empties instead).
    pub fn should_poll(&self, mode: MonitorMode) -> bool {
        match mode {
            MonitorMode::Camera => true,
            MonitorMode::Hybrid => self.watched.is_empty(),
            MonitorMode::Process => false,
        }
    }
}
