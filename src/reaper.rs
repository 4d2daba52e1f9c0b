//! Zombie reaping for hosts running as container init.
//!
//! When the host is pid 1, children orphaned by supervised process groups
//! get reparented to it and would accumulate as zombies. The reaper
//! listens for SIGCHLD and sweeps `waitpid(-1, WNOHANG)` until the queue
//! is drained.
//!
//! The sweep consumes exit statuses process-wide, so it can race the
//! runtime's own child bookkeeping; a stolen status is reported to the
//! supervision loop as exit code -1. That trade-off only makes sense for
//! pid-1 hosts, which is why [`reap_zombies`] refuses to arm anywhere
//! else.

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

/// Arm the reaper if the host runs as pid 1; no-op otherwise.
pub fn reap_zombies() {
    if std::process::id() != 1 {
        debug!("zombie reaper not armed, host is not pid 1");
        return;
    }
    spawn_reaper();
}

/// Arm the reaper regardless of pid. See the module docs for the status
/// race this accepts.
pub fn reap_zombies_forced() {
    spawn_reaper();
}

fn spawn_reaper() {
    tokio::spawn(async {
        let mut sigchld = match signal(SignalKind::child()) {
            Ok(s) => s,
            Err(e) => {
                warn!(err = %e, "cannot install SIGCHLD listener, zombie reaper disabled");
                return;
            }
        };
        info!("zombie reaper armed");
        while sigchld.recv().await.is_some() {
            loop {
                match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::StillAlive) => break,
                    Ok(status) => {
                        debug!(?status, "reaped orphan");
                    }
                    Err(_) => break,
                }
            }
        }
    });
}
