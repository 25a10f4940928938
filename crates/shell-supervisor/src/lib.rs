//! Supervise shell commands under a wall-clock deadline.
//!
//! A [`SupervisedProcess`] starts `shell [args...] -c <command>` as the leader
//! of a new process group and is then driven by polling:
//!
//! - [`SupervisedProcess::is_complete`] observes exit or enforces the deadline
//! - [`SupervisedProcess::kill`] terminates the whole group
//! - [`run`] polls to completion before returning
//!
//! Each process writes one [`JournalEntry`] when it leaves the running state.

pub mod config;
pub mod error;
pub mod handle;
pub mod os;
pub mod process;
pub mod runner;
pub mod stdio;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{
    DEFAULT_EXPECTED_CODES, DEFAULT_MAX_DURATION, MAX_DURATION_LIMIT, ProcessConfig,
    load as load_config,
};
pub use error::{ConfigError, SpawnError};
pub use handle::{Captured, Launcher, ProcessHandle, Signal, SpawnRequest};
pub use os::OsLauncher;
pub use process::{ProcessState, SupervisedProcess};
pub use runner::{Supervisor, run, wait_until_complete};
pub use stdio::{StderrSpec, StdinSpec, StdoutSpec};
pub use supervisor_journal::{FileJournal, Journal, JournalEntry, MemoryJournal, NullJournal};
