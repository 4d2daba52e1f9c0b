//! # procguard
//!
//! **procguard** is an embeddable process supervision engine: the layer a
//! `supervisord`-style tool is built on, callable in-process instead of
//! running as a daemon.
//!
//! | Area | Description | Key types |
//! |------|-------------|-----------|
//! | **Registry** | Named collection of supervised processes with bulk stop and hot reload. | [`Manager`] |
//! | **Lifecycle** | Per-process supervision loop: spawn, stability window, bounded retries, auto-restart. | [`Process`], [`State`] |
//! | **Shutdown** | Graceful signal escalation with per-step grace windows, then SIGKILL. | [`Process::stop`] |
//! | **Policy** | Launch spec + restart/stop policy with supervisor-classic defaults. | [`ProcessOptions`], [`AutoRestart`] |
//! | **Log sinks** | Size-capped rotating file sinks for child stdout/stderr. | [`Logger`], [`FileLogger`] |
//! | **Snapshots** | Racy-by-design read-only view of observable state. | [`Info`] |
//!
//! ```no_run
//! use procguard::{AutoRestart, Manager, ProcessOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), procguard::Error> {
//!     let manager = Manager::new();
//!     let proc = manager.create(
//!         ProcessOptions::new("sleep")
//!             .with_name("sleeper")
//!             .with_args(["30"])
//!             .with_auto_restart(AutoRestart::Never),
//!     )?;
//!
//!     proc.start(true).await;
//!     println!("{} is {}", proc.name(), proc.state());
//!
//!     manager.stop_all().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform notes
//!
//! On Unix every child is placed in its own process group, so
//! group-addressed stop/kill signals reach the whole tree; on Linux
//! children additionally receive a parent-death signal. Windows has no
//! process groups and only honors INT/TERM/KILL; any other configured
//! signal name coerces to TERM, and kills run through `taskkill /F /T`.

mod command;
mod error;
mod info;
mod manager;
mod options;
mod process;
pub mod proclog;
#[cfg(target_os = "linux")]
pub mod reaper;
mod signals;
mod state;

pub use error::Error;
pub use info::Info;
pub use manager::Manager;
pub use options::{
    parse_bytes, AutoRestart, ProcessOptions, DEFAULT_LOG_BACKUPS, DEFAULT_LOG_MAX_BYTES,
};
pub use process::Process;
pub use proclog::{new_logger, ChanLogger, FileLogger, Logger, NullLogger};
pub use state::State;
