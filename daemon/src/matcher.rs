//! Watch-pattern matching against process identities.
//!
//! A pattern token matches a process when the short name (`comm`) equals it
//! case-insensitively, or the full command line contains it as a
//! case-insensitive substring. Kept behind one small type so alternate
//! strategies (regex, full-path) can be added without touching the event
//! source.

use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPattern {
    token_lower: String,
}

impl WatchPattern {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token_lower: token.into().to_lowercase(),
        }
    }

    /// Exact short-name match, case-insensitive.
    pub fn matches_name(&self, name: &str) -> bool {
        name.to_lowercase() == self.token_lower
    }

    /// Command-line substring match, case-insensitive.
    pub fn matches_cmdline(&self, cmdline: &str) -> bool {
        cmdline.to_lowercase().contains(&self.token_lower)
    }

    pub fn matches(&self, identity: &ProcessIdentity) -> bool {
        if let Some(comm) = &identity.comm {
            if self.matches_name(comm) {
                return true;
            }
        }
        if let Some(cmdline) = &identity.cmdline {
            if self.matches_cmdline(cmdline) {
                return true;
            }
        }
        false
    }
}

pub fn compile(tokens: &[String]) -> Vec<WatchPattern> {
    tokens
        .iter()
        .map(|token| WatchPattern::new(token.as_str()))
        .collect()
}

pub fn matches_any(patterns: &[WatchPattern], identity: &ProcessIdentity) -> bool {
    patterns.iter().any(|pattern| pattern.matches(identity))
}

/// Short name and command line of a live process, read from /proc.
/// Either may be missing for a process that exited between the exec event
/// and the read.
#[derive(Debug, Clone, Default)]
pub struct ProcessIdentity {
    pub comm: Option<String>,
    pub cmdline: Option<String>,
}

impl ProcessIdentity {
    pub fn resolve(pid: i32) -> Self {
        Self::resolve_in(Path::new("/proc"), pid)
    }

    fn resolve_in(proc_root: &Path, pid: i32) -> Self {
        let dir = proc_root.join(pid.to_string());

        let comm = std::fs::read_to_string(dir.join("comm"))
            .ok()
            .map(|raw| raw.trim_end_matches('\n').to_string())
            .filter(|comm| !comm.is_empty());

        // cmdline is NUL-separated; join the argv into one searchable string.
        let cmdline = std::fs::read(dir.join("cmdline"))
            .ok()
            .map(|raw| {
                String::from_utf8_lossy(&raw)
                    .replace('\0', " ")
                    .trim_end()
                    .to_string()
            })
            .filter(|cmdline| !cmdline.is_empty());

        Self { comm, cmdline }
    }

    pub fn is_known(&self) -> bool {
        self.comm.is_some() || self.cmdline.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(comm: Option<&str>, cmdline: Option<&str>) -> ProcessIdentity {
        ProcessIdentity {
            comm: comm.map(str::to_string),
            cmdline: cmdline.map(str::to_string),
        }
    }

    // ── matching rules ────────────────────────────────────────────────────────

    #[test]
    fn name_match_is_exact_and_case_insensitive() {
        let pattern = WatchPattern::new("howdy");
        assert!(pattern.matches(&identity(Some("Howdy"), None)));
        assert!(!pattern.matches(&identity(Some("howdy-gtk"), None)));
    }

    #[test]
    fn cmdline_match_is_substring() {
        let pattern = WatchPattern::new("howdy");
        assert!(pattern.matches(&identity(None, Some("/usr/bin/python3 /usr/bin/howdy test"))));
        assert!(!pattern.matches(&identity(None, Some("/usr/bin/python3 hello.py"))));
    }

    #[test]
    fn cmdline_match_is_case_insensitive() {
        let pattern = WatchPattern::new("Howdy");
        assert!(pattern.matches(&identity(None, Some("/opt/HOWDY/bin/run"))));
    }

    #[test]
    fn unknown_identity_never_matches() {
        let pattern = WatchPattern::new("howdy");
        let unknown = ProcessIdentity::default();
        assert!(!unknown.is_known());
        assert!(!pattern.matches(&unknown));
    }

    #[test]
    fn matches_any_checks_every_pattern() {
        let patterns = compile(&["howdy".to_string(), "facial".to_string()]);
        assert!(matches_any(&patterns, &identity(Some("facial"), None)));
        assert!(!matches_any(&patterns, &identity(Some("bash"), None)));
    }

    // ── /proc resolution ──────────────────────────────────────────────────────

    #[test]
    fn resolve_reads_comm_and_cmdline() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("1234");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("comm"), "howdy\n").unwrap();
        std::fs::write(dir.join("cmdline"), b"/usr/bin/howdy\0test\0").unwrap();

        let identity = ProcessIdentity::resolve_in(root.path(), 1234);
        assert_eq!(identity.comm.as_deref(), Some("howdy"));
        assert_eq!(identity.cmdline.as_deref(), Some("/usr/bin/howdy test"));
    }

    #[test]
    fn resolve_missing_process_is_unknown() {
        let root = tempfile::tempdir().unwrap();
        let identity = ProcessIdentity::resolve_in(root.path(), 4321);
        assert!(!identity.is_known());
    }

    #[test]
    fn resolve_own_pid_from_real_proc() {
        let identity = ProcessIdentity::resolve(std::process::id() as i32);
        assert!(identity.is_known());
    }
}
