mod activity;
mod config;
mod matcher;
mod monitor;
mod paths;
mod probe;
mod proc_events;
mod scanner;
mod status;
mod supervisor;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{MonitorConfig, MonitorMode};
use crate::monitor::Monitor;
use crate::proc_events::{EventSourceError, ProcEventSource};
use crate::supervisor::{OverlaySupervisor, DEFAULT_OVERLAY_PROGRAM};

/// Watches for face-recognition processes or camera activity and supervises
/// the screen overlay that lights the user's face.
#[derive(Parser, Debug)]
#[command(name = "lumo-daemon", version, about)]
struct Args {
    /// Detection mode: process (kernel events, needs CAP_NET_ADMIN),
    /// camera (polling), or hybrid
    #[arg(short, long, value_enum)]
    mode: Option<MonitorMode>,

    /// Video device to probe
    #[arg(short = 'd', long = "device")]
    device: Option<PathBuf>,

    /// Process name to watch; repeatable
    #[arg(short = 'p', long = "proc")]
    procs: Vec<String>,

    /// Poll interval in milliseconds
    #[arg(short = 'i', long = "interval")]
    interval_ms: Option<u64>,

    /// Screen selectors for the overlay, comma separated
    #[arg(short = 's', long = "screens", value_delimiter = ',')]
    screens: Option<Vec<String>>,

    /// Alternate config file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug-level diagnostics
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Errors only
    #[arg(short, long)]
    quiet: bool,
}

/// CLI flags override whole fields; unspecified flags leave config-file
/// values intact.
fn apply_overrides(config: &mut MonitorConfig, args: &Args) {
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(device) = &args.device {
        config.video_device = device.clone();
    }
    if let Some(interval) = args.interval_ms {
        config.poll_interval_ms = interval;
    }
    if !args.procs.is_empty() {
        config.watch_processes = args.procs.clone();
    }
    if let Some(screens) = &args.screens {
        config.screens = screens.clone();
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_filter = if quiet {
        "lumo_daemon=error"
    } else if verbose {
        "lumo_daemon=debug"
    } else {
        "lumo_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = args.config.clone().unwrap_or_else(paths::config_file_path);
    let mut config = match config::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            // The daemon should always start in some safe mode.
            error!(path = %config_path.display(), error = %e, "config load failed; using defaults");
            MonitorConfig::default()
        }
    };
    apply_overrides(&mut config, &args);
    config.normalize();

    // ── Mode arbitration ──────────────────────────────────────────────────────
    let events = match config.mode {
        MonitorMode::Camera => None,
        MonitorMode::Process | MonitorMode::Hybrid => match ProcEventSource::open() {
            Ok(source) => Some(source),
            Err(e) if config.mode == MonitorMode::Process => {
                error!(error = %e, "process mode could not subscribe to kernel events");
                if matches!(e, EventSourceError::PermissionDenied) {
                    error!(
                        "grant the capability with: sudo setcap cap_net_admin+ep \
                         $(command -v lumo-daemon), or run in camera/hybrid mode"
                    );
                }
                return ExitCode::FAILURE;
            }
            Err(e) => {
                warn!(error = %e, "kernel events unavailable; falling back to camera polling");
                config.mode = MonitorMode::Camera;
                None
            }
        },
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "lumo-daemon starting"
    );

    // ── Event loop ────────────────────────────────────────────────────────────
    let supervisor = OverlaySupervisor::new(DEFAULT_OVERLAY_PROGRAM);
    let monitor = Monitor::new(config, events, supervisor, paths::status_file_path());
    match monitor.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "monitor failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            mode: None,
            device: None,
            procs: Vec::new(),
            interval_ms: None,
            screens: None,
            config: None,
            verbose: false,
            quiet: false,
        }
    }

    #[test]
    fn no_flags_leave_config_untouched() {
        let mut config = MonitorConfig::default();
        config.watch_processes = vec!["facial".to_string()];
        let before = config.clone();

        apply_overrides(&mut config, &args());
        assert_eq!(config.mode, before.mode);
        assert_eq!(config.video_device, before.video_device);
        assert_eq!(config.watch_processes, before.watch_processes);
        assert_eq!(config.poll_interval_ms, before.poll_interval_ms);
        assert_eq!(config.screens, before.screens);
    }

    #[test]
    fn flags_replace_whole_fields() {
        let mut config = MonitorConfig::default();
        config.watch_processes = vec!["howdy".to_string(), "facial".to_string()];

        let mut cli = args();
        cli.mode = Some(MonitorMode::Hybrid);
        cli.device = Some(PathBuf::from("/dev/video9"));
        cli.procs = vec!["linux-hello".to_string()];
        cli.interval_ms = Some(250);
        cli.screens = Some(vec!["DP-1".to_string()]);

        apply_overrides(&mut config, &cli);
        assert_eq!(config.mode, MonitorMode::Hybrid);
        assert_eq!(config.video_device, PathBuf::from("/dev/video9"));
        // Replacement, not a merge.
        assert_eq!(config.watch_processes, vec!["linux-hello".to_string()]);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.screens, vec!["DP-1".to_string()]);
    }

    #[test]
    fn cli_parses_comma_separated_screens() {
        let cli = Args::parse_from(["lumo-daemon", "--screens", "0,1"]);
        assert_eq!(
            cli.screens,
            Some(vec!["0".to_string(), "1".to_string()])
        );
    }

    #[test]
    fn cli_parses_repeatable_procs() {
        let cli = Args::parse_from(["lumo-daemon", "-p", "howdy", "-p", "facial"]);
        assert_eq!(cli.procs, vec!["howdy".to_string(), "facial".to_string()]);
    }
}
