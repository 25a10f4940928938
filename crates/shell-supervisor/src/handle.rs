//! Contract between the supervisor and whatever actually starts processes.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

pub use nix::sys::signal::Signal;

use crate::config::ProcessConfig;
use crate::stdio::{StderrSpec, StdinSpec, StdoutSpec};

/// Fully resolved spawn parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    /// `[shell] + args + ["-c"]`.
    pub argv: Vec<String>,
    /// Appended after `argv` as the final argument.
    pub command: String,
    pub stdin: StdinSpec,
    pub stdout: StdoutSpec,
    pub stderr: StderrSpec,
    pub working_dir: Option<PathBuf>,
    pub env: Option<BTreeMap<String, String>>,
}

impl SpawnRequest {
    pub fn from_config(config: &ProcessConfig) -> Self {
        Self {
            argv: config.argv(),
            command: config.command.clone(),
            stdin: config.stdin.clone(),
            stdout: config.stdout,
            stderr: config.stderr,
            working_dir: config.resolved_working_dir(),
            env: config.env.clone(),
        }
    }
}

/// Output collected from piped streams. Streams that were not piped stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
}

/// A started child, isolated in its own process group.
pub trait ProcessHandle: Send {
    fn pid(&self) -> u32;

    /// Non-blocking exit check. `Some(code)` once the child has exited.
    fn poll(&mut self) -> io::Result<Option<i32>>;

    /// Send `signal` to the child's whole process group.
    ///
    /// A group that no longer exists counts as delivered.
    fn signal_group(&mut self, signal: Signal) -> io::Result<()>;

    /// Block until the child has been reaped.
    fn wait(&mut self) -> io::Result<i32>;

    /// Close our end of stdin and collect buffered output.
    /// Blocks until every writer of the piped streams has closed them.
    fn drain(&mut self) -> Captured;
}

/// Starts processes. The OS implementation is [`crate::os::OsLauncher`].
pub trait Launcher: Send + Sync {
    fn launch(&self, request: &SpawnRequest) -> io::Result<Box<dyn ProcessHandle>>;
}
