//! Fallback activity detection over the process table.
//!
//! Used when the kernel event subscription is unavailable, or as the
//! poll-mode primary signal. Enumerates every live process and reports a hit
//! when one matches a watch pattern or holds an open fd on the video device.
//! The per-process name check runs before the fd-table walk, and the whole
//! scan short-circuits on the first match, so the O(processes × descriptors)
//! worst case is only paid when nothing is active.

use std::path::{Path, PathBuf};

use sysinfo::{ProcessesToUpdate, System};
use tracing::debug;

use crate::matcher::WatchPattern;

pub struct HandleScanner {
    system: System,
}

impl HandleScanner {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// True if any live, non-self process matches a watch pattern or holds
    /// an open file descriptor resolving to the device's canonical path.
    pub fn scan(&mut self, patterns: &[WatchPattern], device: &Path) -> bool {
        let canonical = device.canonicalize().ok();
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let self_pid = sysinfo::get_current_pid().ok();

        for (pid, process) in self.system.processes() {
            if Some(*pid) == self_pid {
                continue;
            }

            let name = process.name().to_string_lossy();
            if patterns.iter().any(|pattern| pattern.matches_name(&name)) {
                debug!(pid = pid.as_u32(), name = %name, "watched process found by scan");
                return true;
            }

            // Same rule the event path applies to a freshly exec'd process.
            let cmdline = process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ");
            if !cmdline.is_empty()
                && patterns.iter().any(|pattern| pattern.matches_cmdline(&cmdline))
            {
                debug!(pid = pid.as_u32(), "watched cmdline found by scan");
                return true;
            }

            if let Some(canonical) = &canonical {
                let fd_dir = PathBuf::from(format!("/proc/{}/fd", pid.as_u32()));
                if holds_device_fd(&fd_dir, canonical) {
                    debug!(pid = pid.as_u32(), device = %canonical.display(), "device held open");
                    return true;
                }
            }
        }
        false
    }
}

/// Whether any symlink in `fd_dir` resolves to `canonical`.
/// An unreadable fd directory (process gone, or not ours to inspect) reads
/// as no match.
fn holds_device_fd(fd_dir: &Path, canonical: &Path) -> bool {
    let entries = match std::fs::read_dir(fd_dir) {
        Ok(entries) => entries,
        Err(_) => return false,
    };
    for entry in entries.flatten() {
        if let Ok(target) = std::fs::read_link(entry.path()) {
            if target == canonical {
                return true;
            }
        }
    }
    false
}
