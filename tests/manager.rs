//! End-to-end registry tests: start/stop by name, bulk stop, graceful
//! reload and process-group shutdown.

#![cfg(unix)]

use std::collections::HashMap;
use std::time::Duration;

use procguard::{AutoRestart, Error, Manager, ProcessOptions, State};
use tokio::time::sleep;

fn sleeper_options(name: &str, secs: &str) -> ProcessOptions {
    ProcessOptions::new("sleep")
        .with_name(name)
        .with_args([secs])
        .with_start_secs(0)
        .with_auto_restart(AutoRestart::Never)
}

#[tokio::test]
async fn start_and_stop_by_name() {
    let manager = Manager::new();
    manager.create(sleeper_options("svc", "30")).unwrap();

    assert!(manager.start("svc", true).await.unwrap());
    let p = manager.find("svc").unwrap();
    assert_eq!(p.state(), State::Running);

    assert!(manager.stop("svc", true).await.unwrap());
    assert!(!p.is_running());

    assert!(matches!(
        manager.start("ghost", true).await,
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        manager.stop("ghost", true).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn stop_all_quiesces_every_process() {
    let manager = Manager::new();
    for name in ["one", "two", "three"] {
        manager.create(sleeper_options(name, "30")).unwrap();
        manager.start(name, true).await.unwrap();
    }

    manager.stop_all().await;
    sleep(Duration::from_millis(200)).await;

    manager.for_each(|p| {
        assert!(!p.is_running(), "{} still running", p.name());
        assert_eq!(p.pid(), 0);
    });
}

#[tokio::test]
async fn graceful_reload_preserves_name_and_swaps_instance() {
    let manager = Manager::new();
    manager.create(sleeper_options("svc", "60")).unwrap();
    manager.start("svc", true).await.unwrap();

    let original = manager.find("svc").unwrap();
    let original_start = original.start_time().unwrap();

    assert!(manager.graceful_reload("svc", true).await.unwrap());

    let current = manager.find("svc").expect("name survives the reload");
    assert_eq!(current.state(), State::Running);
    assert!(
        current.start_time().unwrap() > original_start,
        "manager should hold the freshly started clone"
    );
    assert!(!original.is_running());

    manager.stop_all().await;
}

#[tokio::test]
async fn graceful_reload_of_unknown_name_errors() {
    let manager = Manager::new();
    assert!(matches!(
        manager.graceful_reload("ghost", true).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn group_kill_reaps_the_whole_tree() {
    let manager = Manager::new();
    let p = manager
        .create(
            ProcessOptions::new("bash")
                .with_name("group")
                .with_args(["-c", "sleep 30 & sleep 30 & wait"])
                .with_auto_restart(AutoRestart::Never)
                .with_stop_as_group(true)
                .with_kill_as_group(true)
                .with_stop_signals(["TERM"])
                .with_stop_wait_secs(1)
                .with_kill_wait_secs(2),
        )
        .unwrap();

    p.start(true).await;
    sleep(Duration::from_secs(1)).await;
    let pid = p.pid();
    assert!(pid > 0);

    p.stop(true).await;

    assert!(!p.is_running());
    assert!(matches!(p.state(), State::Stopped | State::Exited));

    // The whole process group must drain within the escalation windows:
    // probing an empty group fails with ESRCH.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(4);
    loop {
        let probe = nix::sys::signal::kill(nix::unistd::Pid::from_raw(-pid), None);
        if probe == Err(nix::errno::Errno::ESRCH) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "process group {pid} still has members"
        );
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn all_process_info_reflects_registry() {
    let manager = Manager::new();
    manager.create(sleeper_options("a", "30")).unwrap();
    manager.create(sleeper_options("b", "30")).unwrap();

    let mut names: Vec<String> = manager
        .all_process_info()
        .into_iter()
        .map(|i| i.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["a", "b"]);

    let info = manager.process_info("a").unwrap();
    assert_eq!(info.state, State::Stopped.code());
    assert!(matches!(
        manager.process_info("ghost"),
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn cmdline_process_runs_through_the_shell() {
    let manager = Manager::new();
    let p = manager
        .create_from_cmdline(
            "sleep 30",
            HashMap::from([("PROCGUARD_TEST".to_string(), "1".to_string())]),
        )
        .unwrap();

    p.start(true).await;
    assert_eq!(p.state(), State::Running);
    p.stop(true).await;
    assert!(!p.is_running());
}
