//! The monitor event loop.
//!
//! One task, no shared-memory concurrency: the loop multiplexes shutdown
//! signals, netlink readability (when subscribed) and a state-dependent
//! timeout, then re-evaluates the activity rule and drives the overlay
//! supervisor on transitions. All mutable state lives in the [`Monitor`]
//! value threaded through here.

use std::future;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::activity::ActivityTracker;
use crate::config::{MonitorConfig, MonitorMode};
use crate::matcher::{self, ProcessIdentity, WatchPattern};
use crate::probe;
use crate::proc_events::{ProcEvent, ProcEventSource, MAX_EVENTS_PER_WAKE};
use crate::scanner::HandleScanner;
use crate::status::{self, ActivationTrigger, DaemonStatus};
use crate::supervisor::OverlaySupervisor;

/// Wake interval while the overlay is up, so a child dying outside our
/// control (the user clicked it away) is noticed promptly.
const ACTIVE_WAKE: Duration = Duration::from_millis(500);
/// Idle heartbeat in process mode, where the netlink socket does the real
/// waking; only watched-pid liveness rides on this timer.
const IDLE_HEARTBEAT: Duration = Duration::from_secs(60);

pub struct Monitor {
    config: MonitorConfig,
    /// Runtime mode; diverges from `config.mode` only when the event source
    /// dies mid-run and the loop degrades to polling.
    mode: MonitorMode,
    patterns: Vec<WatchPattern>,
    events: Option<ProcEventSource>,
    tracker: ActivityTracker,
    scanner: HandleScanner,
    supervisor: OverlaySupervisor,
    status: DaemonStatus,
    status_path: PathBuf,
    active: bool,
    last_probe: Option<Instant>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        events: Option<ProcEventSource>,
        supervisor: OverlaySupervisor,
        status_path: PathBuf,
    ) -> Self {
        let patterns = matcher::compile(&config.watch_processes);
        let mode = config.mode;
        Self {
            config,
            mode,
            patterns,
            events,
            tracker: ActivityTracker::new(),
            scanner: HandleScanner::new(),
            supervisor,
            status: DaemonStatus::new(),
            status_path,
            active: false,
            last_probe: None,
        }
    }

    /// Runs until a termination signal arrives, then tears the overlay down
    /// and returns.
    pub async fn run(mut self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        status::write_status(&self.status_path, &self.status);
        info!(
            mode = ?self.mode,
            device = %self.config.video_device.display(),
            patterns = self.patterns.len(),
            screens = self.config.screens.len(),
            "monitor started"
        );

        loop {
            let wake = self.wake_interval();
            let drained = tokio::select! {
                _ = sigterm.recv() => {
                    info!("SIGTERM received");
                    break;
                }
                _ = sigint.recv() => {
                    info!("SIGINT received");
                    break;
                }
                batch = next_events(&mut self.events) => match batch {
                    Ok(events) => Some(events),
                    Err(e) => {
                        warn!(error = %e, "event source failed; degrading to polling");
                        self.events = None;
                        self.mode = MonitorMode::Camera;
                        None
                    }
                },
                _ = tokio::time::sleep(wake) => None,
            };

            // Snapshot before folding the batch in: the confirmatory probe
            // below needs to see that the set was non-empty at wake time.
            let had_watched = self.tracker.has_watched();
            if let Some(events) = drained {
                self.apply_events(events);
            }
            self.evaluate(had_watched).await;
        }

        self.supervisor.stop().await;
        self.status.set_idle();
        status::write_status(&self.status_path, &self.status);
        info!("monitor stopped");
        Ok(())
    }

    /// Folds a drained event batch into the watched set.
    fn apply_events(&mut self, events: Vec<ProcEvent>) {
        for event in events {
            match event {
                ProcEvent::Exec { pid } => {
                    let identity = ProcessIdentity::resolve(pid);
                    if !identity.is_known() {
                        // Raced with a short-lived process; nothing to match.
                        continue;
                    }
                    if matcher::matches_any(&self.patterns, &identity) && self.tracker.track(pid)
                    {
                        info!(
                            pid,
                            comm = identity.comm.as_deref().unwrap_or("?"),
                            "watched process started"
                        );
                    }
                }
                ProcEvent::Exit { pid } => {
                    if self.tracker.untrack(pid) {
                        info!(
                            pid,
                            remaining = self.tracker.watched_count(),
                            "watched process exited"
                        );
                    }
                }
            }
        }
    }

    /// One evaluation cycle: reconcile the watched set, poll per mode rules,
    /// apply the transition rule, and self-heal around dead children.
    /// `had_watched` is the set's state at wake time, before the drained
    /// event batch was applied.
    async fn evaluate(&mut self, had_watched: bool) {
        // A watched pid can die without its exit event reaching us (dropped
        // datagram); reconcile against the real process table.
        if self.tracker.has_watched() {
            self.tracker
                .prune(|pid| unsafe { libc::kill(pid, 0) == 0 });
        }

        if self.tracker.should_poll(self.mode) && self.poll_due() {
            let busy = probe::device_busy(&self.config.video_device)
                || self.scanner.scan(&self.patterns, &self.config.video_device);
            self.tracker.record_probe(busy);
            self.last_probe = Some(Instant::now());
        } else if self.mode == MonitorMode::Process
            && had_watched
            && !self.tracker.has_watched()
        {
            // Exit events carry no identity; confirm the device really went
            // quiet before dropping the overlay.
            self.tracker
                .record_probe(probe::device_busy(&self.config.video_device));
            self.last_probe = Some(Instant::now());
        }

        let active_now = self.tracker.is_active();
        if active_now && !self.active {
            let trigger = if self.tracker.has_watched() {
                ActivationTrigger::Process
            } else {
                ActivationTrigger::Camera
            };
            info!(?trigger, "activity detected; starting overlay");
            self.supervisor
                .start(&self.config.overlay, &self.config.screens);
            info!(pids = ?self.supervisor.tracked_pids(), "overlay generation running");
            self.active = true;
            self.status
                .set_illuminated(trigger, self.supervisor.child_count());
            status::write_status(&self.status_path, &self.status);
        } else if !active_now && self.active {
            info!("activity ended; stopping overlay");
            self.supervisor.stop().await;
            self.active = false;
            self.status.set_idle();
            status::write_status(&self.status_path, &self.status);
        } else if self.active
            && self.supervisor.child_count() > 0
            && !self.supervisor.check_alive()
        {
            // All overlay children died outside our control; return to idle
            // and let the next detection transition start a fresh generation.
            // A start whose spawns all failed stays "attempted" instead of
            // being retried every tick.
            info!("overlay exited on its own; returning to idle");
            self.active = false;
            self.tracker.record_probe(false);
            self.status.set_idle();
            status::write_status(&self.status_path, &self.status);
        }
    }

    /// The probe/scan path stays amortized by the configured poll interval
    /// even while the loop wakes faster to watch the overlay children.
    fn poll_due(&self) -> bool {
        self.last_probe
            .map_or(true, |at| at.elapsed() >= self.config.poll_interval())
    }

    fn wake_interval(&self) -> Duration {
        if self.active {
            return ACTIVE_WAKE;
        }
        match self.mode {
            MonitorMode::Process => IDLE_HEARTBEAT,
            MonitorMode::Camera | MonitorMode::Hybrid => self.config.poll_interval(),
        }
    }
}

/// Pends forever when no event source is subscribed, so the select above
/// falls through to its timeout arm.
async fn next_events(source: &mut Option<ProcEventSource>) -> io::Result<Vec<ProcEvent>> {
    match source {
        Some(source) => source.next_batch(MAX_EVENTS_PER_WAKE).await,
        None => future::pending().await,
    }
}
