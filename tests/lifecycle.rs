//! End-to-end lifecycle tests driving real child processes.

#![cfg(unix)]

use std::time::Duration;

use procguard::{AutoRestart, Process, ProcessOptions, State};
use tokio::time::sleep;

fn sleeper(name: &str, secs: &str) -> Process {
    Process::new(
        ProcessOptions::new("sleep")
            .with_name(name)
            .with_args([secs])
            .with_auto_restart(AutoRestart::Never),
    )
}

#[tokio::test]
async fn stable_long_runner_starts_and_stops() {
    let p = sleeper("sleeper", "30");

    p.start(true).await;
    assert_eq!(p.state(), State::Running);
    assert!(p.pid() > 0);
    assert!(p.is_running());
    assert!(p.start_time().is_some());
    assert!(p.stop_time().is_none());

    p.stop(true).await;
    assert!(matches!(p.state(), State::Stopped | State::Exited));
    assert_eq!(p.pid(), 0);
    assert!(!p.is_running());
    assert!(p.stop_time().is_some());
}

#[tokio::test]
async fn missing_binary_goes_fatal_after_retries() {
    let p = Process::new(
        ProcessOptions::new("this-binary-does-not-exist-procguard")
            .with_name("ghost")
            .with_start_retries(2),
    );

    p.start(true).await;
    assert_eq!(p.state(), State::Fatal);
    assert_eq!(p.retry_times(), 2);

    let info = p.info();
    assert_eq!(info.state, State::Fatal.code());
    assert!(!info.spawn_err.is_empty());
    assert_eq!(info.pid, 0);
}

#[tokio::test]
async fn exit_inside_stability_window_exhausts_retries() {
    // `false` exits 1 well inside the 1-second window each attempt.
    let p = Process::new(
        ProcessOptions::new("false")
            .with_name("flaky")
            .with_auto_restart(AutoRestart::OnUnexpected)
            .with_exit_codes([0])
            .with_start_retries(3)
            .with_restart_pause(0),
    );

    p.start(true).await;
    sleep(Duration::from_secs(2)).await;

    assert!(p.retry_times() >= 1);
    assert_eq!(p.state(), State::Fatal);
}

#[tokio::test]
async fn expected_exit_code_does_not_restart() {
    let p = Process::new(
        ProcessOptions::new("sh")
            .with_name("clean-exit")
            .with_args(["-c", "exit 0"])
            .with_start_secs(0)
            .with_auto_restart(AutoRestart::OnUnexpected)
            .with_exit_codes([0]),
    );

    p.start(true).await;
    sleep(Duration::from_secs(1)).await;

    assert_eq!(p.state(), State::Exited);
    assert_eq!(p.exit_status(), 0);
    assert_eq!(p.retry_times(), 1);
    assert_eq!(p.pid(), 0);
}

#[tokio::test]
async fn unexpected_exit_code_restarts() {
    let p = Process::new(
        ProcessOptions::new("sh")
            .with_name("dirty-exit")
            .with_args(["-c", "exit 7"])
            .with_start_secs(0)
            .with_auto_restart(AutoRestart::OnUnexpected)
            .with_exit_codes([0]),
    );

    p.start(true).await;
    let first_start = p.start_time().expect("started once");

    // Restart cooldown is 3 seconds; by 4.5 seconds a second run happened.
    sleep(Duration::from_millis(4500)).await;
    let second_start = p.start_time().expect("still has a start time");
    assert!(second_start > first_start, "policy should have restarted the child");

    p.stop(true).await;
}

#[tokio::test]
async fn start_is_idempotent_while_loop_is_active() {
    let p = sleeper("idempotent", "30");

    p.start(true).await;
    let pid = p.pid();
    assert!(pid > 0);

    // Second start must not spawn a second child.
    p.start(true).await;
    assert_eq!(p.pid(), pid);

    p.stop(true).await;
}

#[tokio::test]
async fn retry_counter_resets_on_fresh_start() {
    let p = sleeper("counter", "30");

    p.start(true).await;
    assert_eq!(p.retry_times(), 1);
    p.stop(true).await;

    // Let the supervision loop wind down (quick-exit cooldown).
    sleep(Duration::from_secs(4)).await;

    p.start(true).await;
    assert_eq!(p.retry_times(), 1);
    assert_eq!(p.state(), State::Running);
    p.stop(true).await;
}

#[tokio::test]
async fn signal_to_stopped_process_errors() {
    let p = sleeper("quiet", "30");
    assert!(p.signal("TERM", false).is_err());
    assert!(p.write_stdin(b"ignored").is_err());
}

#[tokio::test]
async fn stdin_feeds_child_and_stdout_reaches_sink() {
    let dir = tempfile::tempdir().unwrap();
    let logfile = dir.path().join("cat.log");

    let p = Process::new(
        ProcessOptions::new("cat")
            .with_name("cat")
            .with_start_secs(0)
            .with_auto_restart(AutoRestart::Never)
            .with_stdout_log(logfile.to_string_lossy(), "1MB", 2),
    );

    p.start(true).await;
    assert_eq!(p.state(), State::Running);
    p.write_stdin(b"ping\n").unwrap();
    sleep(Duration::from_millis(500)).await;

    let (text, _, _) = p.read_stdout_log(-1, 1024).unwrap();
    assert!(text.contains("ping"), "sink content: {text:?}");

    p.stop(true).await;
    assert!(matches!(p.state(), State::Stopped | State::Exited));
}

#[tokio::test]
async fn clone_config_copies_options_not_state() {
    let p = sleeper("original", "30");
    p.start(true).await;

    let clone = p.clone_config().unwrap();
    assert_eq!(clone.name(), "original");
    assert_eq!(clone.state(), State::Stopped);
    assert_eq!(clone.pid(), 0);
    assert!(clone.start_time().is_none());

    p.stop(true).await;
}
