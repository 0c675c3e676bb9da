use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MIN_BRIGHTNESS: u32 = 1;
pub const MAX_BRIGHTNESS: u32 = 100;
pub const MIN_WIDTH: u32 = 10;
pub const MAX_WIDTH: u32 = 500;
pub const MIN_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_VIDEO_DEVICE: &str = "/dev/video0";
pub const DEFAULT_COLOR: &str = "FFFFFF";
pub const DEFAULT_BRIGHTNESS: u32 = 100;
pub const DEFAULT_WIDTH: u32 = 80;
/// Watched by default when neither the config file nor the CLI names any
/// process: the `howdy` face-recognition tool.
pub const DEFAULT_WATCH_PROCESS: &str = "howdy";

/// How camera activity is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    /// Kernel process-lifecycle events only. Requires CAP_NET_ADMIN.
    Process,
    /// Periodic device probe + process-table scan only.
    Camera,
    /// Events when available, polling while no watched process is tracked.
    Hybrid,
}

/// Visual parameters forwarded verbatim to each overlay child.
/// Immutable for the daemon's lifetime once loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    /// Hex RGB; a leading `#` is stripped on normalize.
    #[serde(default = "default_color")]
    pub color: String,
    /// Clamped to [1, 100].
    #[serde(default = "default_brightness")]
    pub brightness: u32,
    /// Border width in pixels, clamped to [10, 500].
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default)]
    pub fullscreen: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            color: DEFAULT_COLOR.to_string(),
            brightness: DEFAULT_BRIGHTNESS,
            width: DEFAULT_WIDTH,
            fullscreen: false,
        }
    }
}

/// Root configuration, deserialized from ~/.config/lumo/config.toml.
/// CLI flags override whole fields; see `apply_overrides` in main.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_mode")]
    pub mode: MonitorMode,
    #[serde(default = "default_video_device")]
    pub video_device: PathBuf,
    /// Milliseconds between polls; floored at [`MIN_POLL_INTERVAL_MS`].
    #[serde(rename = "poll_interval", default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Process-name tokens recognized as camera consumers.
    #[serde(default)]
    pub watch_processes: Vec<String>,
    /// Opaque screen selectors, forwarded verbatim to the overlay.
    #[serde(default)]
    pub screens: Vec<String>,
    #[serde(flatten)]
    pub overlay: OverlayConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            video_device: default_video_device(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            watch_processes: Vec::new(),
            screens: Vec::new(),
            overlay: OverlayConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Clamps bounded fields, strips a leading `#` off the color, discards
    /// blank list entries and applies the default watch pattern when the
    /// list ended up empty. Call once, after CLI overrides.
    pub fn normalize(&mut self) {
        if let Some(stripped) = self.overlay.color.strip_prefix('#') {
            self.overlay.color = stripped.to_string();
        }
        self.overlay.brightness = self.overlay.brightness.clamp(MIN_BRIGHTNESS, MAX_BRIGHTNESS);
        self.overlay.width = self.overlay.width.clamp(MIN_WIDTH, MAX_WIDTH);
        self.poll_interval_ms = self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS);

        trim_list(&mut self.watch_processes);
        trim_list(&mut self.screens);
        if self.watch_processes.is_empty() {
            self.watch_processes.push(DEFAULT_WATCH_PROCESS.to_string());
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn trim_list(list: &mut Vec<String>) {
    for entry in list.iter_mut() {
        *entry = entry.trim().to_string();
    }
    list.retain(|entry| !entry.is_empty());
}

/// Loads the config file at `path`, returning `MonitorConfig::default()` if
/// the file does not exist. Returns an error if the file exists but cannot
/// be read or parsed.
pub fn load_or_default(path: &Path) -> Result<MonitorConfig> {
    if !path.exists() {
        return Ok(MonitorConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn default_mode() -> MonitorMode {
    MonitorMode::Process
}

fn default_video_device() -> PathBuf {
    PathBuf::from(DEFAULT_VIDEO_DEVICE)
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn default_brightness() -> u32 {
    DEFAULT_BRIGHTNESS
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}
