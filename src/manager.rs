//! Registry of supervised processes, keyed by unique name.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::command;
use crate::error::Error;
use crate::info::Info;
use crate::options::ProcessOptions;
use crate::process::Process;

/// Owns a collection of named [`Process`] entries. Lookups run in
/// parallel; mutation of the registry is serialized. The manager never
/// stops children on its own: `clear` and `remove` leave running
/// children to their supervision loops.
#[derive(Default)]
pub struct Manager {
    processes: RwLock<HashMap<String, Process>>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Process>> {
        self.processes.read().unwrap_or_else(|p| p.into_inner())
    }

    fn map_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Process>> {
        self.processes.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Build a process from `options` and register it. The name defaults
    /// to the command; registering a name twice fails with
    /// [`Error::DuplicateName`]. Configuration problems (empty command,
    /// unresolvable `user[:group]`) surface here rather than on the first
    /// spawn attempt.
    pub fn create(&self, options: ProcessOptions) -> Result<Process, Error> {
        if options.command.trim().is_empty() {
            return Err(Error::EmptyCommand { name: options.name });
        }
        validate_user(&options)?;
        let process = Process::new(options);
        self.adopt(process)
    }

    /// Wrap a command line in a shell invocation and register it; see
    /// [`Process::from_cmdline`] for the per-platform parsing rules.
    pub fn create_from_cmdline(
        &self,
        cmdline: &str,
        environment: HashMap<String, String>,
    ) -> Result<Process, Error> {
        if cmdline.trim().is_empty() {
            return Err(Error::EmptyCommand {
                name: String::new(),
            });
        }
        if command::shell_path().is_empty() {
            warn!("no shell found on this host");
            return Err(Error::EmptyCommand {
                name: cmdline.to_string(),
            });
        }
        let process = Process::from_cmdline(cmdline, environment);
        validate_user(process.options())?;
        self.adopt(process)
    }

    /// Register an externally built process under its own name.
    pub fn adopt(&self, process: Process) -> Result<Process, Error> {
        let name = process.name().to_string();
        let mut map = self.map_mut();
        if map.contains_key(&name) {
            return Err(Error::DuplicateName { name });
        }
        map.insert(name.clone(), process.clone());
        drop(map);
        info!(proc = %name, "process registered");
        Ok(process)
    }

    /// Look up a process by name.
    pub fn find(&self, name: &str) -> Option<Process> {
        self.map().get(name).cloned()
    }

    /// Atomically remove and return the entry. The process itself is
    /// untouched; stop it first (or keep the handle) if it is running.
    pub fn remove(&self, name: &str) -> Option<Process> {
        let removed = self.map_mut().remove(name);
        if removed.is_some() {
            info!(proc = %name, "process removed");
        }
        removed
    }

    /// Drop every entry. Does not stop children.
    pub fn clear(&self) {
        self.map_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Visit a snapshot of the current entries.
    pub fn for_each(&self, mut f: impl FnMut(&Process)) {
        let snapshot: Vec<Process> = self.map().values().cloned().collect();
        for process in &snapshot {
            f(process);
        }
    }

    /// Stop every registered process in parallel (`stop(wait = true)`
    /// each) and wait for all the stop tasks to finish.
    pub async fn stop_all(&self) {
        let snapshot: Vec<Process> = self.map().values().cloned().collect();
        let mut set = JoinSet::new();
        for process in snapshot {
            set.spawn(async move {
                process.stop(true).await;
            });
        }
        while set.join_next().await.is_some() {}
    }

    /// Start the named process; `wait` blocks until its first attempt
    /// settles.
    pub async fn start(&self, name: &str, wait: bool) -> Result<bool, Error> {
        info!(proc = %name, "start requested via manager");
        let process = self.find(name).ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })?;
        process.start(wait).await;
        Ok(true)
    }

    /// Stop the named process; `wait` blocks until the shutdown task
    /// finishes or its overall timeout fires.
    pub async fn stop(&self, name: &str, wait: bool) -> Result<bool, Error> {
        info!(proc = %name, "stop requested via manager");
        let process = self.find(name).ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })?;
        process.stop(wait).await;
        Ok(true)
    }

    /// Hot-replace the named process: clone its configuration, start the
    /// clone, stop the original, then swap the registry entry so the name
    /// keeps resolving throughout. Observers may briefly see both
    /// children alive.
    pub async fn graceful_reload(&self, name: &str, wait: bool) -> Result<bool, Error> {
        info!(proc = %name, "graceful reload");
        let process = self.find(name).ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })?;
        let replacement = process.clone_config()?;
        replacement.start(wait).await;
        process.stop(wait).await;
        self.map_mut().insert(name.to_string(), replacement);
        Ok(true)
    }

    /// Snapshot of the named process.
    pub fn process_info(&self, name: &str) -> Result<Info, Error> {
        self.find(name)
            .map(|p| p.info())
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })
    }

    /// Snapshots of every registered process.
    pub fn all_process_info(&self) -> Vec<Info> {
        self.map().values().map(Process::info).collect()
    }
}

/// Fail fast on a `user[:group]` spec this host cannot resolve; the
/// supervision loop would otherwise only report it as a Fatal spawn.
fn validate_user(options: &ProcessOptions) -> Result<(), Error> {
    #[cfg(unix)]
    if let Some(user) = options.user.as_deref() {
        command::resolve_user(user)?;
    }
    #[cfg(not(unix))]
    let _ = options;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_registers_and_rejects_duplicates() {
        let manager = Manager::new();
        let p = manager
            .create(ProcessOptions::new("echo").with_name("one"))
            .unwrap();
        assert_eq!(p.name(), "one");
        assert_eq!(manager.len(), 1);

        let err = manager
            .create(ProcessOptions::new("echo").with_name("one"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName { name } if name == "one"));
    }

    #[test]
    fn name_defaults_to_command() {
        let manager = Manager::new();
        let p = manager.create(ProcessOptions::new("sleep")).unwrap();
        assert_eq!(p.name(), "sleep");
        assert!(manager.find("sleep").is_some());
    }

    #[test]
    fn create_rejects_empty_command() {
        let manager = Manager::new();
        let err = manager
            .create(ProcessOptions::default().with_name("none"))
            .unwrap_err();
        assert!(matches!(err, Error::EmptyCommand { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn create_rejects_unknown_user() {
        let manager = Manager::new();
        let err = manager
            .create(
                ProcessOptions::new("sleep")
                    .with_name("wrong-user")
                    .with_user("no-such-user-procguard"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnknownUser { .. }));
        assert!(manager.is_empty());
    }

    #[test]
    fn find_remove_clear() {
        let manager = Manager::new();
        manager
            .create(ProcessOptions::new("echo").with_name("a"))
            .unwrap();
        manager
            .create(ProcessOptions::new("echo").with_name("b"))
            .unwrap();

        assert!(manager.find("a").is_some());
        assert!(manager.find("missing").is_none());
        assert!(manager.remove("a").is_some());
        assert!(manager.remove("a").is_none());
        assert_eq!(manager.len(), 1);

        manager.clear();
        assert!(manager.is_empty());
    }

    #[test]
    fn for_each_visits_all_entries() {
        let manager = Manager::new();
        for name in ["a", "b", "c"] {
            manager
                .create(ProcessOptions::new("echo").with_name(name))
                .unwrap();
        }
        let mut seen = Vec::new();
        manager.for_each(|p| seen.push(p.name().to_string()));
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[test]
    fn adopt_rejects_duplicate_names() {
        let manager = Manager::new();
        manager
            .adopt(Process::new(ProcessOptions::new("echo").with_name("dup")))
            .unwrap();
        let err = manager
            .adopt(Process::new(ProcessOptions::new("echo").with_name("dup")))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName { .. }));
    }

    #[test]
    fn info_for_unknown_process_is_not_found() {
        let manager = Manager::new();
        assert!(matches!(
            manager.process_info("ghost"),
            Err(Error::NotFound { .. })
        ));
        assert!(manager.all_process_info().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn cmdline_processes_wrap_a_shell() {
        let manager = Manager::new();
        let p = manager
            .create_from_cmdline("echo hello world", HashMap::new())
            .unwrap();
        let opts = p.options();
        assert!(opts.command.ends_with("bash") || opts.command.ends_with("sh"));
        assert_eq!(opts.args[0], "-c");
        // The whole command line rides as a single shell argument.
        assert_eq!(opts.args[1], "echo hello world");
    }
}
