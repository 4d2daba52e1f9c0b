//! Signal-name translation and delivery.
//!
//! Unix hosts get the full signal table and real process-group addressing
//! (`kill(-pgid, sig)`). Windows has no process groups and only honors
//! INT/TERM/KILL; every other name coerces to TERM, and any kill is
//! performed with `taskkill /F /T` (falling back to a plain terminate when
//! `taskkill` is unavailable).

#[cfg(unix)]
pub(crate) use unix::{kill_pid, pid_alive, signal_number};

#[cfg(windows)]
pub(crate) use windows::{kill_pid, pid_alive, signal_number};

#[cfg(unix)]
mod unix {
    use std::str::FromStr;

    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    /// Translate a signal name (`"TERM"`, `"SIGTERM"`, `"hup"`, ...) to an
    /// OS signal. Unknown names fall back to SIGTERM.
    pub(crate) fn to_signal(name: &str) -> Signal {
        let upper = name.trim().to_ascii_uppercase();
        let full = if upper.starts_with("SIG") {
            upper
        } else {
            format!("SIG{upper}")
        };
        Signal::from_str(&full).unwrap_or(Signal::SIGTERM)
    }

    /// Numeric value of the translated signal, for log fields.
    pub(crate) fn signal_number(name: &str) -> i32 {
        to_signal(name) as i32
    }

    /// Send `sig` to `pid`, or to its whole process group when
    /// `to_group` is set.
    pub(crate) fn kill_pid(pid: i32, sig_name: &str, to_group: bool) -> std::io::Result<()> {
        let sig = to_signal(sig_name);
        let target = if to_group { -pid } else { pid };
        kill(Pid::from_raw(target), sig).map_err(std::io::Error::from)
    }

    /// Probe liveness with signal 0. EPERM means the pid exists but is
    /// owned by someone else.
    pub(crate) fn pid_alive(pid: i32) -> bool {
        match kill(Pid::from_raw(pid), None) {
            Ok(()) => true,
            Err(nix::errno::Errno::EPERM) => true,
            Err(_) => false,
        }
    }

}

#[cfg(windows)]
mod windows {
    use std::process::Command;

    /// Windows honors INT, TERM and KILL; everything else is TERM.
    fn normalize(name: &str) -> &'static str {
        let upper = name.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "INT" => "INT",
            "KILL" => "KILL",
            _ => "TERM",
        }
    }

    pub(crate) fn signal_number(name: &str) -> i32 {
        match normalize(name) {
            "INT" => 2,
            "KILL" => 9,
            _ => 15,
        }
    }

    /// There is no real process group on Windows; group kills rely on
    /// `taskkill /F /T` taking the whole tree down.
    pub(crate) fn kill_pid(pid: i32, _sig_name: &str, _to_group: bool) -> std::io::Result<()> {
        let status = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .status();
        match status {
            Ok(st) if st.success() => Ok(()),
            Ok(st) => Err(std::io::Error::other(format!(
                "taskkill for pid {pid} exited with {st}"
            ))),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn pid_alive(pid: i32) -> bool {
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/NH"])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}
