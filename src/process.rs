//! A supervised process: launch spec, lifecycle state, the supervision
//! loop driving spawn/exit/restart, and the graceful-then-forceful
//! shutdown protocol.

use std::io::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command;
use crate::error::Error;
use crate::options::{AutoRestart, ProcessOptions};
use crate::proclog::{self, Logger};
use crate::signals;
use crate::state::State;

/// Cadence of the executable-mtime poll behind
/// `restart_when_binary_changed`.
const BINARY_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Cadence of the shutdown protocol's state poll.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Attempts finishing faster than this trigger the restart cooldown.
const QUICK_EXIT_SECS: i64 = 2;

/// Cooldown slept between supervision rounds after a quick exit.
const RESTART_COOLDOWN: Duration = Duration::from_secs(3);

pub(crate) type SharedLogger = Arc<StdMutex<Box<dyn Logger>>>;

/// Handle to a supervised process. Cheap to clone; all clones share the
/// same underlying state.
#[derive(Clone)]
pub struct Process {
    inner: Arc<ProcessInner>,
}

pub(crate) struct ProcessInner {
    options: ProcessOptions,
    runtime: RwLock<Runtime>,
    /// Attempt counter for the current `start()`; atomic so observers can
    /// read it without taking the runtime lock.
    retry_times: AtomicU32,
}

/// Mutable per-process state, guarded by one reader-writer lock. Every
/// critical section acquires the lock exactly once and releases it before
/// suspending.
#[derive(Default)]
pub(crate) struct Runtime {
    pub(crate) state: State,
    pub(crate) start_time: Option<DateTime<Local>>,
    pub(crate) stop_time: Option<DateTime<Local>>,
    pub(crate) pid: Option<i32>,
    pub(crate) exit_status: Option<i32>,
    pub(crate) spawn_err: Option<String>,
    in_start: bool,
    stop_by_user: bool,
    stop_in_flight: bool,
    stdin: Option<std::fs::File>,
    pub(crate) stdout_log: Option<SharedLogger>,
    pub(crate) stderr_log: Option<SharedLogger>,
    watcher: Option<CancellationToken>,
}

impl ProcessInner {
    pub(crate) fn runtime(&self) -> RwLockReadGuard<'_, Runtime> {
        self.runtime.read().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn runtime_mut(&self) -> RwLockWriteGuard<'_, Runtime> {
        self.runtime.write().unwrap_or_else(|p| p.into_inner())
    }
}

/// Single-shot completion latch for `start(wait=true)`: resolved by the
/// first of reaching `Running`, declaring `Fatal`, or the attempt loop
/// finishing. Later completions are no-ops.
struct StartGate {
    tx: StdMutex<Option<oneshot::Sender<()>>>,
}

impl StartGate {
    fn new() -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: StdMutex::new(Some(tx)),
            }),
            rx,
        )
    }

    fn complete(&self) {
        let sender = self.tx.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }
}

/// Outcome of one spawn attempt's synchronous phase.
enum Attempt {
    Spawned(Child),
    Retry,
    Fatal,
    Interrupted,
}

impl Process {
    /// Build an unmanaged process from its options. The name falls back to
    /// the command when unset.
    pub fn new(mut options: ProcessOptions) -> Self {
        if options.name.is_empty() {
            options.name = options.command.clone();
        }
        Self {
            inner: Arc::new(ProcessInner {
                options,
                runtime: RwLock::new(Runtime::default()),
                retry_times: AtomicU32::new(0),
            }),
        }
    }

    /// Wrap a command line in a shell invocation (`cmd.exe /c …` on
    /// Windows, `/bin/bash -c …` or `/bin/sh -c …` elsewhere).
    pub fn from_cmdline(
        cmdline: &str,
        environment: std::collections::HashMap<String, String>,
    ) -> Self {
        let mut args = vec![command::shell_flag().to_string()];
        if cfg!(windows) {
            args.extend(command::split_cmdline(cmdline));
        } else {
            args.push(cmdline.to_string());
        }
        Self::new(
            ProcessOptions::new(command::shell_path())
                .with_args(args)
                .with_environment(environment),
        )
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    /// The configuration this process was built from.
    pub fn options(&self) -> &ProcessOptions {
        &self.inner.options
    }

    /// Attempts made by the current `start()` invocation.
    pub fn retry_times(&self) -> u32 {
        self.inner.retry_times.load(Ordering::SeqCst)
    }

    /// Whether a spawned child is currently alive (signal-0 probe).
    pub fn is_running(&self) -> bool {
        self.inner
            .runtime()
            .pid
            .map(signals::pid_alive)
            .unwrap_or(false)
    }

    /// A fresh process sharing this one's configuration but none of its
    /// runtime state. Fails when the configuration can no longer produce a
    /// command (removed user, emptied command).
    pub fn clone_config(&self) -> Result<Process, Error> {
        command::build_command(&self.inner.options).map_err(|e| Error::Clone {
            name: self.name().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Process::new(self.inner.options.clone()))
    }

    /// Launch the supervision loop for this process. With `wait = true`
    /// the call returns once the first attempt has either reached
    /// `Running`, been declared `Fatal`, or otherwise settled.
    ///
    /// Calling `start` while a supervision loop is active is a no-op.
    pub async fn start(&self, wait: bool) {
        info!(proc = %self.name(), wait, "start requested");
        {
            let mut rt = self.inner.runtime_mut();
            if rt.in_start {
                info!(proc = %self.name(), "start ignored, supervision loop already active");
                return;
            }
            rt.in_start = true;
            rt.stop_by_user = false;
        }

        let (gate, done) = StartGate::new();
        let proc = self.clone();
        tokio::spawn(async move {
            loop {
                proc.run_attempts(&gate).await;

                let quick_exit = {
                    let rt = proc.inner.runtime();
                    rt.start_time
                        .map(|t| (Local::now() - t).num_seconds() < QUICK_EXIT_SECS)
                        .unwrap_or(true)
                };
                if quick_exit {
                    // Keeps tight failure loops from spinning.
                    sleep(RESTART_COOLDOWN).await;
                }

                if proc.inner.runtime().stop_by_user {
                    info!(proc = %proc.name(), "stopped by user, not restarting");
                    break;
                }
                if !proc.should_auto_restart() {
                    info!(proc = %proc.name(), "restart declined by policy");
                    break;
                }
                info!(proc = %proc.name(), "restarting per policy");
            }
            proc.inner.runtime_mut().in_start = false;
            gate.complete();
        });

        if wait {
            let _ = done.await;
        }
    }

    /// One pass of the attempt loop: spawn with a bounded retry budget,
    /// wait out the stability window, reap the child, decide the
    /// post-exit state.
    async fn run_attempts(&self, gate: &StartGate) {
        if self.inner.runtime().pid.is_some() {
            info!(proc = %self.name(), "already running, nothing to start");
            gate.complete();
            return;
        }
        self.inner.retry_times.store(0, Ordering::SeqCst);

        let start_secs = self.inner.options.start_secs;
        let restart_pause = self.inner.options.restart_pause;
        let start_retries = self.inner.options.start_retries;

        loop {
            if self.inner.runtime().stop_by_user {
                break;
            }
            if restart_pause > 0 && self.inner.retry_times.load(Ordering::SeqCst) > 0 {
                info!(proc = %self.name(), pause_secs = restart_pause, "pausing before retry");
                sleep(Duration::from_secs(restart_pause)).await;
            }

            let mut child = match self.begin_attempt() {
                Attempt::Spawned(child) => child,
                Attempt::Retry => continue,
                Attempt::Fatal => {
                    gate.complete();
                    return;
                }
                Attempt::Interrupted => break,
            };

            self.attach_io(&mut child);
            self.arm_binary_watcher();

            let status = if start_secs == 0 {
                info!(proc = %self.name(), "started");
                self.transition(State::Running);
                gate.complete();
                child.wait().await
            } else {
                let window = sleep(Duration::from_secs(start_secs));
                tokio::pin!(window);
                let mut declared = false;
                loop {
                    tokio::select! {
                        status = child.wait() => break status,
                        _ = &mut window, if !declared => {
                            declared = true;
                            {
                                let mut rt = self.inner.runtime_mut();
                                if rt.state == State::Starting {
                                    rt.state = State::Running;
                                    info!(proc = %self.name(), "stability window elapsed, now running");
                                }
                            }
                            gate.complete();
                        }
                    }
                }
            };

            match self.finish_attempt(status) {
                State::Exited | State::Stopped => break,
                _ => {}
            }
            if self.inner.retry_times.load(Ordering::SeqCst) >= start_retries {
                self.fail_to_start(&format!("gave up after {start_retries} start retries"));
                gate.complete();
                return;
            }
        }
        gate.complete();
    }

    /// Synchronous phase of one attempt under a single write-lock section:
    /// state transition, retry accounting, command construction, spawn,
    /// pid and sink publication. Keeping spawn inside the section closes
    /// the race with a concurrent `stop()`.
    fn begin_attempt(&self) -> Attempt {
        let options = &self.inner.options;
        let mut rt = self.inner.runtime_mut();
        if rt.stop_by_user {
            return Attempt::Interrupted;
        }

        rt.state = State::Starting;
        rt.start_time = Some(Local::now());
        let attempt = self.inner.retry_times.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(proc = %self.name(), attempt, "spawning");

        let mut cmd = match command::build_command(options) {
            Ok(cmd) => cmd,
            Err(e) => {
                // Configuration problem; retrying cannot help.
                error!(proc = %self.name(), err = %e, "cannot construct command");
                rt.spawn_err = Some(e.to_string());
                rt.state = State::Fatal;
                return Attempt::Fatal;
            }
        };

        match cmd.spawn() {
            Ok(mut child) => {
                let pid = child.id().map(|p| p as i32).unwrap_or(0);
                rt.spawn_err = None;
                rt.pid = Some(pid);
                rt.stdin = child.stdin.take().and_then(stdin_file);

                let stdout_log: SharedLogger = Arc::new(StdMutex::new(proclog::new_logger(
                    self.name(),
                    &options.stdout_logfile,
                    options.stdout_log_max_bytes,
                    options.stdout_log_backups,
                )));
                let stderr_log: SharedLogger = if options.redirect_stderr {
                    stdout_log.clone()
                } else {
                    Arc::new(StdMutex::new(proclog::new_logger(
                        self.name(),
                        &options.stderr_logfile,
                        options.stderr_log_max_bytes,
                        options.stderr_log_backups,
                    )))
                };
                stdout_log
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .set_pid(pid);
                if !options.redirect_stderr {
                    stderr_log
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .set_pid(pid);
                }
                rt.stdout_log = Some(stdout_log);
                rt.stderr_log = Some(stderr_log);

                info!(proc = %self.name(), pid, attempt, "spawned");
                Attempt::Spawned(child)
            }
            Err(e) => {
                rt.spawn_err = Some(e.to_string());
                if attempt >= options.start_retries {
                    error!(proc = %self.name(), err = %e, retries = attempt, "spawn failed, retries exhausted");
                    rt.state = State::Fatal;
                    Attempt::Fatal
                } else {
                    warn!(proc = %self.name(), err = %e, attempt, "spawn failed, backing off");
                    rt.state = State::Backoff;
                    Attempt::Retry
                }
            }
        }
    }

    /// Post-exit bookkeeping: record the stop time and exit status, close
    /// the sinks, map the pre-exit state to the post-exit one.
    fn finish_attempt(&self, status: std::io::Result<std::process::ExitStatus>) -> State {
        let code = match status {
            Ok(st) => st.code().unwrap_or(-1),
            Err(_) => -1,
        };

        let mut rt = self.inner.runtime_mut();
        rt.stop_time = Some(Local::now());
        rt.exit_status = Some(code);
        rt.pid = None;
        rt.stdin = None;
        if let Some(log) = &rt.stdout_log {
            log.lock().unwrap_or_else(|p| p.into_inner()).close();
        }
        if let Some(log) = &rt.stderr_log {
            log.lock().unwrap_or_else(|p| p.into_inner()).close();
        }

        let next = match rt.state {
            // Reached Running and completed on its own.
            State::Running => State::Exited,
            // Shutdown protocol took it down.
            State::Stopping => State::Stopped,
            // Died inside the stability window (or while spawning).
            _ => State::Backoff,
        };
        rt.state = next;
        drop(rt);

        info!(proc = %self.name(), code, state = %next, "child exited");
        next
    }

    fn fail_to_start(&self, reason: &str) {
        error!(proc = %self.name(), reason, "failed to start");
        self.transition(State::Fatal);
    }

    fn transition(&self, next: State) {
        let mut rt = self.inner.runtime_mut();
        let prev = rt.state;
        rt.state = next;
        drop(rt);
        debug!(proc = %self.name(), from = %prev, to = %next, "state transition");
    }

    /// Restart decision after the attempt loop ends.
    fn should_auto_restart(&self) -> bool {
        match self.inner.options.auto_restart {
            AutoRestart::Never => false,
            AutoRestart::Always => true,
            AutoRestart::OnUnexpected => {
                let rt = self.inner.runtime();
                match rt.exit_status {
                    Some(code) => !self.inner.options.expected_exit_codes().contains(&code),
                    None => false,
                }
            }
        }
    }

    /// Drive the shutdown protocol: each configured stop signal in turn
    /// with a `stop_wait_secs` grace window, then SIGKILL with a
    /// `kill_wait_secs` window. The protocol runs in its own task; with
    /// `wait = true` the caller is held back for at most `stop_wait_secs`
    /// before control returns (the task keeps escalating regardless).
    ///
    /// Stopping latches "do not auto-restart" and disarms the
    /// binary-change monitor for this run.
    pub async fn stop(&self, wait: bool) {
        let (running, already_stopping, watcher) = {
            let mut rt = self.inner.runtime_mut();
            rt.stop_by_user = true;
            let running = rt.pid.is_some();
            let already_stopping = rt.stop_in_flight;
            if running && !already_stopping {
                rt.stop_in_flight = true;
                if rt.state.is_live() {
                    rt.state = State::Stopping;
                }
            }
            (running, already_stopping, rt.watcher.take())
        };
        if let Some(token) = watcher {
            token.cancel();
        }
        if !running {
            info!(proc = %self.name(), "not running");
            return;
        }
        if already_stopping {
            info!(proc = %self.name(), "shutdown already in progress");
            return;
        }
        info!(proc = %self.name(), "stopping");

        let options = &self.inner.options;
        let stop_signals = options.stop_signals.clone();
        let stop_as_group = options.stop_as_group;
        let mut kill_as_group = options.kill_as_group;
        if stop_as_group && !kill_as_group {
            // Group children would outlive the parent otherwise.
            warn!(
                proc = %self.name(),
                "stop_as_group=true with kill_as_group=false is not honored; killing as group"
            );
            kill_as_group = true;
        }
        let stop_wait = Duration::from_secs(options.stop_wait_secs);
        let kill_wait = Duration::from_secs(options.kill_wait_secs);

        let proc = self.clone();
        let task = tokio::spawn(async move {
            let mut stopped = false;
            for sig in &stop_signals {
                info!(
                    proc = %proc.name(),
                    signal = %sig,
                    signum = signals::signal_number(sig),
                    to_group = stop_as_group,
                    "sending stop signal"
                );
                if let Err(e) = proc.signal(sig, stop_as_group) {
                    warn!(proc = %proc.name(), signal = %sig, err = %e, "stop signal not delivered");
                }
                if proc.wait_stop_observed(stop_wait).await {
                    stopped = true;
                    break;
                }
            }
            if !stopped {
                info!(proc = %proc.name(), to_group = kill_as_group, "escalating to SIGKILL");
                if let Err(e) = proc.signal("KILL", kill_as_group) {
                    warn!(proc = %proc.name(), err = %e, "kill signal not delivered");
                }
                proc.wait_stop_observed(kill_wait).await;
            }
            proc.inner.runtime_mut().stop_in_flight = false;
        });

        if wait {
            if tokio::time::timeout(stop_wait, task).await.is_err() {
                warn!(
                    proc = %self.name(),
                    timeout_secs = stop_wait.as_secs(),
                    "stop exceeded its overall timeout; escalation continues in the background"
                );
            }
        }
    }

    /// Poll until the supervision loop has recorded the exit (state left
    /// the live set) or the grace window ran out.
    async fn wait_stop_observed(&self, window: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            if !self.inner.runtime().state.is_live() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            sleep(STOP_POLL_INTERVAL).await;
        }
    }

    /// Send a signal by name (`"TERM"`, `"SIGHUP"`, ...) to the child, or
    /// to its whole process group.
    pub fn signal(&self, signal: &str, to_group: bool) -> Result<(), Error> {
        let pid = self.inner.runtime().pid;
        match pid {
            Some(pid) => {
                debug!(proc = %self.name(), pid, signal, to_group, "sending signal");
                signals::kill_pid(pid, signal, to_group).map_err(|source| Error::Signal {
                    name: self.name().to_string(),
                    source,
                })
            }
            None => Err(Error::NotRunning {
                name: self.name().to_string(),
            }),
        }
    }

    /// Feed bytes to the child's stdin.
    pub fn write_stdin(&self, data: &[u8]) -> Result<(), Error> {
        let mut rt = self.inner.runtime_mut();
        match rt.stdin.as_mut() {
            Some(f) => f.write_all(data).map_err(|source| Error::Stdin {
                name: self.name().to_string(),
                source,
            }),
            None => Err(Error::NotRunning {
                name: self.name().to_string(),
            }),
        }
    }

    /// Read from the stdout sink; see [`Logger::read_tail_log`].
    pub fn read_stdout_log(&self, offset: i64, length: i64) -> Result<(String, i64, bool), Error> {
        let sink = self.inner.runtime().stdout_log.clone();
        match sink {
            Some(sink) => sink
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .read_tail_log(offset, length),
            None => Err(Error::NoLogFile),
        }
    }

    /// Read from the stderr sink; see [`Logger::read_tail_log`].
    pub fn read_stderr_log(&self, offset: i64, length: i64) -> Result<(String, i64, bool), Error> {
        let sink = self.inner.runtime().stderr_log.clone();
        match sink {
            Some(sink) => sink
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .read_tail_log(offset, length),
            None => Err(Error::NoLogFile),
        }
    }

    pub(crate) fn inner(&self) -> &ProcessInner {
        &self.inner
    }

    /// Pump the child's pipes into the sinks created for this attempt.
    fn attach_io(&self, child: &mut Child) {
        let (stdout_log, stderr_log) = {
            let rt = self.inner.runtime();
            (rt.stdout_log.clone(), rt.stderr_log.clone())
        };
        if let (Some(stream), Some(sink)) = (child.stdout.take(), stdout_log) {
            spawn_pump(stream, sink);
        }
        if let (Some(stream), Some(sink)) = (child.stderr.take(), stderr_log) {
            spawn_pump(stream, sink);
        }
    }

    /// Arm the executable-mtime poller. A change observed while `Running`
    /// triggers a synchronous stop + start; `stop()` cancels the poller
    /// for the run it interrupts.
    fn arm_binary_watcher(&self) {
        if !self.inner.options.restart_when_binary_changed {
            return;
        }
        let path = command::executable_path(&self.inner.options);
        if path.as_os_str().is_empty() {
            return;
        }
        let token = {
            let mut rt = self.inner.runtime_mut();
            if rt.watcher.is_some() {
                return;
            }
            let token = CancellationToken::new();
            rt.watcher = Some(token.clone());
            token
        };

        let proc = self.clone();
        tokio::spawn(async move {
            let mut last = tokio::fs::metadata(&path)
                .await
                .ok()
                .and_then(|m| m.modified().ok());
            let start = tokio::time::Instant::now() + BINARY_POLL_INTERVAL;
            let mut ticker = tokio::time::interval_at(start, BINARY_POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let modified = tokio::fs::metadata(&path)
                            .await
                            .ok()
                            .and_then(|m| m.modified().ok());
                        let changed = matches!((last, modified), (Some(a), Some(b)) if a != b);
                        if modified.is_some() {
                            last = modified;
                        }
                        if changed && proc.state() == State::Running {
                            info!(
                                proc = %proc.name(),
                                binary = %path.display(),
                                "executable changed on disk, restarting"
                            );
                            proc.stop(true).await;
                            proc.start(true).await;
                            break;
                        }
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

fn spawn_pump<R>(mut stream: R, sink: SharedLogger)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    // A failing sink never halts the pump.
                    let _ = sink
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .write(&buf[..n]);
                }
            }
        }
    });
}

fn stdin_file(stdin: tokio::process::ChildStdin) -> Option<std::fs::File> {
    #[cfg(unix)]
    {
        stdin.into_owned_fd().ok().map(std::fs::File::from)
    }
    #[cfg(windows)]
    {
        stdin.into_owned_handle().ok().map(std::fs::File::from)
    }
}
