use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised process.
///
/// The numeric codes match the classic supervisor wire values, so snapshots
/// can be consumed by tooling that already understands them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    /// Never started, or cleanly stopped by the user.
    #[default]
    Stopped,
    /// Spawn has been issued; the stability window has not yet elapsed.
    Starting,
    /// Considered healthy.
    Running,
    /// A start attempt failed or the child exited inside the stability
    /// window; another attempt may follow.
    Backoff,
    /// Shutdown protocol in progress.
    Stopping,
    /// The child completed on its own after having reached `Running`.
    Exited,
    /// Start retries exhausted without reaching `Running`.
    Fatal,
    /// Reserved; never produced by the supervision loop.
    Unknown,
}

impl State {
    /// Supervisor-compatible state code.
    pub fn code(self) -> i32 {
        match self {
            State::Stopped => 0,
            State::Starting => 10,
            State::Running => 20,
            State::Backoff => 30,
            State::Stopping => 40,
            State::Exited => 100,
            State::Fatal => 200,
            State::Unknown => 1000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Stopped => "Stopped",
            State::Starting => "Starting",
            State::Running => "Running",
            State::Backoff => "Backoff",
            State::Stopping => "Stopping",
            State::Exited => "Exited",
            State::Fatal => "Fatal",
            State::Unknown => "Unknown",
        }
    }

    /// True while a child process may be alive: spawn issued and the
    /// shutdown protocol has not yet observed an exit.
    pub fn is_live(self) -> bool {
        matches!(self, State::Starting | State::Running | State::Stopping)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_supervisor_convention() {
        assert_eq!(State::Stopped.code(), 0);
        assert_eq!(State::Starting.code(), 10);
        assert_eq!(State::Running.code(), 20);
        assert_eq!(State::Backoff.code(), 30);
        assert_eq!(State::Stopping.code(), 40);
        assert_eq!(State::Exited.code(), 100);
        assert_eq!(State::Fatal.code(), 200);
        assert_eq!(State::Unknown.code(), 1000);
    }

    #[test]
    fn names_round_trip_display() {
        assert_eq!(State::Running.to_string(), "Running");
        assert_eq!(State::Backoff.as_str(), "Backoff");
    }

    #[test]
    fn liveness_covers_exactly_the_live_states() {
        for s in [State::Starting, State::Running, State::Stopping] {
            assert!(s.is_live());
        }
        for s in [State::Stopped, State::Backoff, State::Exited, State::Fatal, State::Unknown] {
            assert!(!s.is_live());
        }
    }
}
