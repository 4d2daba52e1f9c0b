//! Launch spec and supervision policy for a single process.

use std::collections::HashMap;

#[cfg(unix)]
use std::os::unix::io::RawFd;
use std::path::PathBuf;

/// When the supervision loop restarts a child that exited on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoRestart {
    /// Restart only when the exit code is not listed in `exit_codes`.
    OnUnexpected,
    /// Restart after every exit. This is the default.
    #[default]
    Always,
    /// Never restart.
    Never,
}

/// Default log cap: 50 MiB per file.
pub const DEFAULT_LOG_MAX_BYTES: u64 = 50 * 1024 * 1024;
/// Default number of rotated backups kept per log file.
pub const DEFAULT_LOG_BACKUPS: u32 = 10;

/// Configuration of a supervised process: identity, launch spec, restart
/// policy, shutdown policy and log sinks.
///
/// `ProcessOptions::default()` carries the supervisor-classic defaults; the
/// chainable `with_*` setters overlay individual fields:
///
/// ```
/// use procguard::{AutoRestart, ProcessOptions};
///
/// let opts = ProcessOptions::default()
///     .with_name("worker")
///     .with_command("sleep")
///     .with_args(["30"])
///     .with_auto_restart(AutoRestart::Never);
/// assert_eq!(opts.name, "worker");
/// ```
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Unique name within a manager; falls back to `command` when empty.
    pub name: String,
    /// Executable to spawn.
    pub command: String,
    /// Argument vector (argv[1..]).
    pub args: Vec<String>,
    /// Working directory; inherits the host's when unset.
    pub directory: Option<PathBuf>,
    /// Per-child environment overrides, merged over the host snapshot.
    pub environment: HashMap<String, String>,
    /// `user` or `user:group` to run the child as (requires privileges).
    pub user: Option<String>,
    /// Open descriptors inherited by the child as fd 3, 4, ...
    /// The caller keeps them open until the child has been spawned.
    #[cfg(unix)]
    pub extra_files: Vec<RawFd>,

    /// Whether a bulk start by the host should include this process.
    pub auto_start: bool,
    /// Stability window: seconds the child must stay alive after spawn to
    /// be declared `Running`. Zero declares `Running` on spawn.
    pub start_secs: u64,
    /// Maximum spawn/stability attempts per `start()` before `Fatal`.
    pub start_retries: u32,
    /// Seconds to sleep before any non-first attempt.
    pub restart_pause: u64,
    /// Restart policy for children that exit on their own.
    pub auto_restart: AutoRestart,
    /// Exit codes regarded as expected; consulted by
    /// [`AutoRestart::OnUnexpected`] only.
    pub exit_codes: Vec<i32>,

    /// Signal names sent in order during graceful shutdown.
    pub stop_signals: Vec<String>,
    /// Grace window per stop signal, in seconds.
    pub stop_wait_secs: u64,
    /// Grace window after the final SIGKILL, in seconds.
    pub kill_wait_secs: u64,
    /// Address stop signals to the child's process group.
    pub stop_as_group: bool,
    /// Address the final SIGKILL to the child's process group.
    pub kill_as_group: bool,

    /// Poll the executable's mtime and restart the child when it changes
    /// while `Running`.
    pub restart_when_binary_changed: bool,
    /// Start ordering hint for hosts that sort their own bulk starts;
    /// lower starts earlier.
    pub priority: i32,

    /// Stdout sink path; empty or `/dev/null` disables persistence.
    pub stdout_logfile: String,
    pub stdout_log_max_bytes: u64,
    pub stdout_log_backups: u32,
    /// Send stderr into the stdout sink.
    pub redirect_stderr: bool,
    /// Stderr sink path; empty or `/dev/null` disables persistence.
    pub stderr_logfile: String,
    pub stderr_log_max_bytes: u64,
    pub stderr_log_backups: u32,

    /// Opaque key/value extension data for host bookkeeping.
    pub extend: HashMap<String, String>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            command: String::new(),
            args: Vec::new(),
            directory: None,
            environment: HashMap::new(),
            user: None,
            #[cfg(unix)]
            extra_files: Vec::new(),

            auto_start: true,
            start_secs: 1,
            start_retries: 3,
            restart_pause: 0,
            auto_restart: AutoRestart::default(),
            exit_codes: vec![0, 2],

            stop_signals: vec!["TERM".to_string()],
            stop_wait_secs: 10,
            kill_wait_secs: 2,
            stop_as_group: false,
            kill_as_group: false,

            restart_when_binary_changed: false,
            priority: 999,

            stdout_logfile: String::new(),
            stdout_log_max_bytes: DEFAULT_LOG_MAX_BYTES,
            stdout_log_backups: DEFAULT_LOG_BACKUPS,
            redirect_stderr: false,
            stderr_logfile: String::new(),
            stderr_log_max_bytes: DEFAULT_LOG_MAX_BYTES,
            stderr_log_backups: DEFAULT_LOG_BACKUPS,

            extend: HashMap::new(),
        }
    }
}

impl ProcessOptions {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = Some(dir.into());
        self
    }

    pub fn with_environment<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.environment.insert(k.into(), v.into());
        }
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Run the child as `user` or `user:group`.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[cfg(unix)]
    pub fn with_extra_files<I: IntoIterator<Item = RawFd>>(mut self, fds: I) -> Self {
        self.extra_files = fds.into_iter().collect();
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_start_secs(mut self, secs: u64) -> Self {
        self.start_secs = secs;
        self
    }

    pub fn with_start_retries(mut self, retries: u32) -> Self {
        self.start_retries = retries;
        self
    }

    pub fn with_restart_pause(mut self, secs: u64) -> Self {
        self.restart_pause = secs;
        self
    }

    pub fn with_auto_restart(mut self, policy: AutoRestart) -> Self {
        self.auto_restart = policy;
        self
    }

    pub fn with_exit_codes<I: IntoIterator<Item = i32>>(mut self, codes: I) -> Self {
        self.exit_codes = codes.into_iter().collect();
        self
    }

    pub fn with_stop_signals<I, S>(mut self, signals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop_signals = signals.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stop_wait_secs(mut self, secs: u64) -> Self {
        self.stop_wait_secs = secs;
        self
    }

    pub fn with_kill_wait_secs(mut self, secs: u64) -> Self {
        self.kill_wait_secs = secs;
        self
    }

    pub fn with_stop_as_group(mut self, as_group: bool) -> Self {
        self.stop_as_group = as_group;
        self
    }

    pub fn with_kill_as_group(mut self, as_group: bool) -> Self {
        self.kill_as_group = as_group;
        self
    }

    pub fn with_restart_when_binary_changed(mut self, enabled: bool) -> Self {
        self.restart_when_binary_changed = enabled;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Stdout sink: path, human-readable size cap and backup count.
    /// The size string accepts `KB`/`MB`/`GB` suffixes (base 1024); junk
    /// falls back to the 50 MiB default.
    pub fn with_stdout_log(
        mut self,
        file: impl Into<String>,
        max_bytes: &str,
        backups: u32,
    ) -> Self {
        self.stdout_logfile = file.into();
        self.stdout_log_max_bytes = parse_bytes(max_bytes, DEFAULT_LOG_MAX_BYTES);
        self.stdout_log_backups = backups;
        self
    }

    /// Stderr sink; same size-string rules as [`Self::with_stdout_log`].
    pub fn with_stderr_log(
        mut self,
        file: impl Into<String>,
        max_bytes: &str,
        backups: u32,
    ) -> Self {
        self.stderr_logfile = file.into();
        self.stderr_log_max_bytes = parse_bytes(max_bytes, DEFAULT_LOG_MAX_BYTES);
        self.stderr_log_backups = backups;
        self
    }

    pub fn with_redirect_stderr(mut self, redirect: bool) -> Self {
        self.redirect_stderr = redirect;
        self
    }

    pub fn with_extend(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extend.insert(key.into(), value.into());
        self
    }

    /// Exit codes treated as expected (the `{0, 2}` default when the
    /// configured list is empty).
    pub(crate) fn expected_exit_codes(&self) -> &[i32] {
        if self.exit_codes.is_empty() {
            &[0, 2]
        } else {
            &self.exit_codes
        }
    }
}

/// Parse a size string with an optional `KB`/`MB`/`GB` suffix (case
/// insensitive, base 1024). Unrecognized input yields `default`.
///
/// ```
/// use procguard::parse_bytes;
/// assert_eq!(parse_bytes("50MB", 0), 50 * 1024 * 1024);
/// assert_eq!(parse_bytes("junk", 7), 7);
/// ```
pub fn parse_bytes(value: &str, default: u64) -> u64 {
    let t = value.trim();
    if t.len() > 2 {
        let (num, unit) = t.split_at(t.len() - 2);
        let factor: u64 = match unit.to_ascii_uppercase().as_str() {
            "KB" => 1024,
            "MB" => 1024 * 1024,
            "GB" => 1024 * 1024 * 1024,
            _ => return t.parse().unwrap_or(default),
        };
        return match num.trim().parse::<u64>() {
            Ok(n) => n.saturating_mul(factor),
            Err(_) => default,
        };
    }
    default
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_table() {
        let o = ProcessOptions::default();
        assert!(o.auto_start);
        assert_eq!(o.start_secs, 1);
        assert_eq!(o.start_retries, 3);
        assert_eq!(o.restart_pause, 0);
        assert_eq!(o.auto_restart, AutoRestart::Always);
        assert_eq!(o.exit_codes, vec![0, 2]);
        assert_eq!(o.stop_signals, vec!["TERM"]);
        assert_eq!(o.stop_wait_secs, 10);
        assert_eq!(o.kill_wait_secs, 2);
        assert_eq!(o.priority, 999);
        assert_eq!(o.stdout_log_max_bytes, 50 * 1024 * 1024);
        assert_eq!(o.stdout_log_backups, 10);
        assert!(!o.stop_as_group);
        assert!(!o.kill_as_group);
        assert!(!o.restart_when_binary_changed);
    }

    #[test]
    fn auto_restart_defaults_to_always() {
        assert_eq!(AutoRestart::default(), AutoRestart::Always);
        assert_eq!(ProcessOptions::default().auto_restart, AutoRestart::Always);
        assert_eq!(ProcessOptions::new("sleep").auto_restart, AutoRestart::Always);
    }

    #[test]
    fn setters_chain() {
        let o = ProcessOptions::new("sleep")
            .with_name("sleeper")
            .with_args(["30"])
            .with_env("A", "1")
            .with_stop_signals(["INT", "TERM"])
            .with_start_retries(5);
        assert_eq!(o.name, "sleeper");
        assert_eq!(o.command, "sleep");
        assert_eq!(o.args, vec!["30"]);
        assert_eq!(o.environment.get("A").map(String::as_str), Some("1"));
        assert_eq!(o.stop_signals, vec!["INT", "TERM"]);
        assert_eq!(o.start_retries, 5);
    }

    #[test]
    fn parse_bytes_units_are_base_1024() {
        assert_eq!(parse_bytes("1KB", 0), 1024);
        assert_eq!(parse_bytes("10mb", 0), 10 * 1024 * 1024);
        assert_eq!(parse_bytes("2Gb", 0), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_bytes("4096", 0), 4096);
    }

    #[test]
    fn parse_bytes_falls_back_on_junk() {
        assert_eq!(parse_bytes("", 99), 99);
        assert_eq!(parse_bytes("1", 99), 99);
        assert_eq!(parse_bytes("xxMB", 99), 99);
        assert_eq!(parse_bytes("fifty", 99), 99);
    }

    #[test]
    fn empty_exit_codes_fall_back_to_default_set() {
        let o = ProcessOptions::default().with_exit_codes([]);
        assert_eq!(o.expected_exit_codes(), &[0, 2]);
        let o = ProcessOptions::default().with_exit_codes([0]);
        assert_eq!(o.expected_exit_codes(), &[0]);
    }
}
