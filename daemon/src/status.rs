use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Current operational state of the daemon.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    /// No camera activity; no overlay children are running.
    Idle,
    /// Activity detected; overlay children are lighting the screens.
    Illuminated,
}

/// What flipped the daemon into its current active state.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ActivationTrigger {
    /// A watched process (face recognition) is running.
    Process,
    /// The video device itself was found busy.
    Camera,
}

/// Runtime status written by the daemon to `$XDG_STATE_HOME/lumo/status.toml`.
/// The settings GUI reads this file (read-only) to display daemon state.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: DaemonState,
    /// Present while illuminated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<ActivationTrigger>,
    /// Overlay children currently tracked.
    pub overlay_count: usize,
    /// RFC 3339 timestamp of the last state change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<String>,
}

impl DaemonStatus {
    /// Constructs the initial idle status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DaemonState::Idle,
            trigger: None,
            overlay_count: 0,
            changed_at: None,
        }
    }

    pub fn set_illuminated(&mut self, trigger: ActivationTrigger, overlay_count: usize) {
        self.state = DaemonState::Illuminated;
        self.trigger = Some(trigger);
        self.overlay_count = overlay_count;
        self.changed_at = Some(chrono::Local::now().to_rfc3339());
    }

    pub fn set_idle(&mut self) {
        self.state = DaemonState::Idle;
        self.trigger = None;
        self.overlay_count = 0;
        self.changed_at = Some(chrono::Local::now().to_rfc3339());
    }
}

/// Serializes `status` to TOML and writes it to `path`, creating the parent
/// directory if needed. A status write failure is logged, never fatal.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), error = %e, "failed to create status directory");
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!(path = %path.display(), error = %e, "failed to write status file");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize status"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── DaemonStatus transitions ──────────────────────────────────────────────

    #[test]
    fn new_starts_idle() {
        let status = DaemonStatus::new();
        assert_eq!(status.state, DaemonState::Idle);
        assert!(status.trigger.is_none());
        assert_eq!(status.overlay_count, 0);
        assert!(status.changed_at.is_none());
    }

    #[test]
    fn set_illuminated_records_trigger_and_count() {
        let mut status = DaemonStatus::new();
        status.set_illuminated(ActivationTrigger::Process, 2);
        assert_eq!(status.state, DaemonState::Illuminated);
        assert_eq!(status.trigger, Some(ActivationTrigger::Process));
        assert_eq!(status.overlay_count, 2);
        assert!(status.changed_at.is_some());
    }

    #[test]
    fn set_idle_clears_activation_fields() {
        let mut status = DaemonStatus::new();
        status.set_illuminated(ActivationTrigger::Camera, 1);
        status.set_idle();
        assert_eq!(status.state, DaemonState::Idle);
        assert!(status.trigger.is_none());
        assert_eq!(status.overlay_count, 0);
    }

    // ── serialization ─────────────────────────────────────────────────────────

    #[test]
    fn state_serializes_to_lowercase() {
        let mut status = DaemonStatus::new();
        let idle = toml::to_string_pretty(&status).unwrap();
        assert!(idle.contains("state = \"idle\""));

        status.set_illuminated(ActivationTrigger::Camera, 1);
        let illuminated = toml::to_string_pretty(&status).unwrap();
        assert!(illuminated.contains("state = \"illuminated\""));
        assert!(illuminated.contains("trigger = \"camera\""));
    }

    #[test]
    fn idle_status_omits_optional_fields() {
        let status = DaemonStatus::new();
        let content = toml::to_string_pretty(&status).unwrap();
        assert!(!content.contains("trigger"));
        assert!(!content.contains("changed_at"));
    }

    // ── write_status ──────────────────────────────────────────────────────────

    #[test]
    fn write_status_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("status.toml");
        write_status(&path, &DaemonStatus::new());
        assert!(path.exists());
    }

    #[test]
    fn write_status_content_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");

        let mut original = DaemonStatus::new();
        original.set_illuminated(ActivationTrigger::Process, 2);
        write_status(&path, &original);

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: DaemonStatus = toml::from_str(&content).unwrap();
        assert_eq!(parsed.state, DaemonState::Illuminated);
        assert_eq!(parsed.trigger, Some(ActivationTrigger::Process));
        assert_eq!(parsed.overlay_count, 2);
    }
}
