//! Overlay child-process supervision.
//!
//! One overlay child per configured screen selector (or a single default
//! one), spawned when activity starts and torn down gracefully-then-forced
//! when it ends. Every spawned pid is eventually waited on — by `stop` or by
//! the opportunistic reaping in `check_alive` — so no zombies are left
//! behind.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::OverlayConfig;

/// Overlay renderer binary, resolved on $PATH.
pub const DEFAULT_OVERLAY_PROGRAM: &str = "lumo-overlay";

/// Graceful-exit polling: 10 tries, 50 ms apart, before SIGKILL.
const STOP_POLL_STEP: Duration = Duration::from_millis(50);
const STOP_POLL_TRIES: u32 = 10;

pub struct OverlaySupervisor {
    program: String,
    children: Vec<Child>,
}

impl OverlaySupervisor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            children: Vec::new(),
        }
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Pids of the currently tracked children (absent for already-reaped ones).
    pub fn tracked_pids(&self) -> Vec<u32> {
        self.children.iter().filter_map(Child::id).collect()
    }

    /// Spawns one overlay per screen selector, or a single default-screen
    /// one when none are configured. Idempotent: a second call while the
    /// current generation is alive is a no-op. A spawn failure on one screen
    /// is logged and does not abort the remaining screens.
    pub fn start(&mut self, overlay: &OverlayConfig, screens: &[String]) {
        if self.first_child_alive() {
            debug!("overlay already running; start is a no-op");
            return;
        }
        self.children.clear();

        let brightness = overlay.brightness.to_string();
        let width = overlay.width.to_string();
        let selectors: Vec<Option<&str>> = if screens.is_empty() {
            vec![None]
        } else {
            screens.iter().map(|screen| Some(screen.as_str())).collect()
        };

        for selector in selectors {
            let mut command = Command::new(&self.program);
            command
                .arg("-c")
                .arg(&overlay.color)
                .arg("-b")
                .arg(&brightness)
                .arg("-w")
                .arg(&width)
                .stdin(Stdio::null());
            if overlay.fullscreen {
                command.arg("-f");
            }
            if let Some(screen) = selector {
                command.arg("-s").arg(screen);
            }

            match command.spawn() {
                Ok(child) => {
                    info!(
                        pid = child.id(),
                        screen = selector.unwrap_or("default"),
                        "overlay started"
                    );
                    self.children.push(child);
                }
                Err(e) => {
                    warn!(
                        program = %self.program,
                        screen = selector.unwrap_or("default"),
                        error = %e,
                        "failed to spawn overlay"
                    );
                }
            }
        }
    }

    /// Graceful-then-forced teardown; no-op when nothing is tracked. The
    /// tracked set is cleared unconditionally — a failed kill on an
    /// already-dead pid is not an error.
    pub async fn stop(&mut self) {
        if self.children.is_empty() {
            return;
        }
        info!(count = self.children.len(), "stopping overlay");

        for child in &self.children {
            if let Some(pid) = child.id() {
                let _ = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            }
        }

        for mut child in self.children.drain(..) {
            let mut exited = false;
            for _ in 0..STOP_POLL_TRIES {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        debug!(?status, "overlay exited");
                        exited = true;
                        break;
                    }
                    Ok(None) => tokio::time::sleep(STOP_POLL_STEP).await,
                    Err(e) => {
                        warn!(error = %e, "overlay wait failed");
                        exited = true;
                        break;
                    }
                }
            }
            if !exited {
                warn!(pid = child.id(), "overlay ignored SIGTERM; killing");
                let _ = child.kill().await;
            }
        }
    }

    /// Opportunistic liveness check, reaping children that exited on their
    /// own (e.g. the user dismissed the overlay). Returns true while at
    /// least one child is still running.
    pub fn check_alive(&mut self) -> bool {
        self.children.retain_mut(|child| match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(?status, "overlay exited on its own");
                false
            }
            Err(e) => {
                warn!(error = %e, "overlay liveness check failed");
                false
            }
        });
        !self.children.is_empty()
    }

    fn first_child_alive(&mut self) -> bool {
        match self.children.first_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}
