//! Read-only snapshots of a supervised process.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::process::Process;
use crate::state::State;

/// Immutable snapshot of a process's observable fields. Field names on
/// the wire follow the classic supervisor info shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    pub name: String,
    pub description: String,
    /// Unix seconds of the most recent spawn; 0 when never started.
    pub start: i64,
    /// Unix seconds of the most recent exit; 0 while live or never run.
    pub stop: i64,
    /// Unix seconds at snapshot time.
    pub now: i64,
    /// Numeric state code, see [`State::code`].
    pub state: i32,
    #[serde(rename = "statename")]
    pub state_name: String,
    /// Last spawn or construction error; empty after a successful spawn.
    #[serde(rename = "spawnerr")]
    pub spawn_err: String,
    #[serde(rename = "exitstatus")]
    pub exit_status: i32,
    pub logfile: String,
    pub stdout_logfile: String,
    pub stderr_logfile: String,
    /// Pid of the live child; 0 otherwise.
    pub pid: i32,
}

impl Process {
    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.inner().runtime().state
    }

    /// Pid of the live child, 0 in every non-live state.
    pub fn pid(&self) -> i32 {
        let rt = self.inner().runtime();
        if rt.state.is_live() {
            rt.pid.unwrap_or(0)
        } else {
            0
        }
    }

    /// Wall-clock time of the most recent spawn attempt.
    pub fn start_time(&self) -> Option<DateTime<Local>> {
        self.inner().runtime().start_time
    }

    /// Wall-clock time of the most recent exit; `None` while the child is
    /// live (matching the snapshot's `stop = 0` convention).
    pub fn stop_time(&self) -> Option<DateTime<Local>> {
        let rt = self.inner().runtime();
        if rt.state.is_live() {
            None
        } else {
            rt.stop_time
        }
    }

    /// Exit code of the last completed run; 0 unless the state is
    /// `Exited` or `Backoff`.
    pub fn exit_status(&self) -> i32 {
        let rt = self.inner().runtime();
        match rt.state {
            State::Exited | State::Backoff => rt.exit_status.unwrap_or(0),
            _ => 0,
        }
    }

    /// Configured stdout sink path, `/dev/null` when persistence is off.
    pub fn stdout_logfile(&self) -> String {
        logfile_or_null(&self.options().stdout_logfile)
    }

    /// Configured stderr sink path, `/dev/null` when persistence is off.
    pub fn stderr_logfile(&self) -> String {
        logfile_or_null(&self.options().stderr_logfile)
    }

    /// Human description: pid + uptime while running, otherwise the state
    /// and the last stop time.
    pub fn description(&self) -> String {
        let rt = self.inner().runtime();
        match rt.state {
            State::Running => {
                let pid = rt.pid.unwrap_or(0);
                let seconds = rt
                    .start_time
                    .map(|t| (Local::now() - t).num_seconds().max(0))
                    .unwrap_or(0);
                let minutes = seconds / 60;
                let hours = minutes / 60;
                let days = hours / 24;
                if days > 0 {
                    format!(
                        "pid {pid}, uptime {days} days, {}:{:02}:{:02}",
                        hours % 24,
                        minutes % 60,
                        seconds % 60
                    )
                } else {
                    format!(
                        "pid {pid}, uptime {}:{:02}:{:02}",
                        hours % 24,
                        minutes % 60,
                        seconds % 60
                    )
                }
            }
            State::Stopped => String::new(),
            state => {
                let stopped_at = rt
                    .stop_time
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                format!("{state} (last stopped at {stopped_at})")
            }
        }
    }

    /// Produce an [`Info`] snapshot. The read is racy by design: it takes
    /// the per-process lock once and reports a consistent view of that
    /// instant.
    pub fn info(&self) -> Info {
        let (state, start, stop, pid, exit_status, spawn_err) = {
            let rt = self.inner().runtime();
            let start = rt.start_time.map(|t| t.timestamp()).unwrap_or(0);
            let stop = if rt.state.is_live() {
                0
            } else {
                rt.stop_time.map(|t| t.timestamp()).unwrap_or(0)
            };
            let pid = if rt.state.is_live() {
                rt.pid.unwrap_or(0)
            } else {
                0
            };
            let exit_status = match rt.state {
                State::Exited | State::Backoff => rt.exit_status.unwrap_or(0),
                _ => 0,
            };
            let spawn_err = rt.spawn_err.clone().unwrap_or_default();
            (rt.state, start, stop, pid, exit_status, spawn_err)
        };

        let stdout_logfile = self.stdout_logfile();
        Info {
            name: self.name().to_string(),
            description: self.description(),
            start,
            stop,
            now: Local::now().timestamp(),
            state: state.code(),
            state_name: state.as_str().to_string(),
            spawn_err,
            exit_status,
            logfile: stdout_logfile.clone(),
            stdout_logfile,
            stderr_logfile: self.stderr_logfile(),
            pid,
        }
    }
}

fn logfile_or_null(configured: &str) -> String {
    if configured.trim().is_empty() {
        "/dev/null".to_string()
    } else {
        configured.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ProcessOptions;

    fn sample() -> Process {
        Process::new(
            ProcessOptions::new("echo")
                .with_name("snap")
                .with_stdout_log("/tmp/snap-out.log", "1MB", 2),
        )
    }

    #[test]
    fn fresh_process_snapshot() {
        let info = sample().info();
        assert_eq!(info.name, "snap");
        assert_eq!(info.state, State::Stopped.code());
        assert_eq!(info.state_name, "Stopped");
        assert_eq!(info.pid, 0);
        assert_eq!(info.start, 0);
        assert_eq!(info.stop, 0);
        assert_eq!(info.exit_status, 0);
        assert_eq!(info.description, "");
        assert_eq!(info.stdout_logfile, "/tmp/snap-out.log");
        assert_eq!(info.stderr_logfile, "/dev/null");
        assert!(info.now > 0);
    }

    #[test]
    fn snapshot_uses_supervisor_field_names() {
        let json = serde_json::to_value(sample().info()).unwrap();
        for key in [
            "name",
            "description",
            "start",
            "stop",
            "now",
            "state",
            "statename",
            "spawnerr",
            "exitstatus",
            "logfile",
            "stdout_logfile",
            "stderr_logfile",
            "pid",
        ] {
            assert!(json.get(key).is_some(), "missing field {key}");
        }
    }

    #[test]
    fn null_paths_reported_for_unconfigured_sinks() {
        let p = Process::new(ProcessOptions::new("echo").with_name("nolog"));
        assert_eq!(p.stdout_logfile(), "/dev/null");
        assert_eq!(p.stderr_logfile(), "/dev/null");
    }
}
