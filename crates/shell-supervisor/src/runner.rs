use std::sync::Arc;
use std::thread;
use std::time::Duration;

use supervisor_journal::{FileJournal, Journal};

use crate::config::ProcessConfig;
use crate::error::SpawnError;
use crate::handle::Launcher;
use crate::os::OsLauncher;
use crate::process::SupervisedProcess;

/// First sleep between completion checks.
const POLL_BACKOFF_INITIAL: Duration = Duration::from_millis(1);
/// Longest sleep between completion checks.
const POLL_BACKOFF_MAX: Duration = Duration::from_millis(50);

/// Doubling sleep interval, capped.
struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self { next: initial, max }
    }

    /// Current delay; doubles the next one.
    fn step(&mut self) -> Duration {
        let current = self.next;
        self.next = (self.next * 2).min(self.max);
        current
    }
}

/// Launcher and journal shared by every process it starts.
#[derive(Clone)]
pub struct Supervisor {
    launcher: Arc<dyn Launcher>,
    journal: Arc<dyn Journal>,
}

impl Default for Supervisor {
    /// OS launcher writing to the session journal.
    fn default() -> Self {
        Self::new(FileJournal::session())
    }
}

impl Supervisor {
    pub fn new(journal: Arc<dyn Journal>) -> Self {
        Self::with_launcher(Arc::new(OsLauncher), journal)
    }

    pub fn with_launcher(launcher: Arc<dyn Launcher>, journal: Arc<dyn Journal>) -> Self {
        Self { launcher, journal }
    }

    pub fn journal(&self) -> &Arc<dyn Journal> {
        &self.journal
    }

    /// Start a process and return immediately.
    pub fn spawn(&self, config: &ProcessConfig) -> Result<SupervisedProcess, SpawnError> {
        SupervisedProcess::spawn_with(self.launcher.as_ref(), config, Arc::clone(&self.journal))
    }

    /// Start a process and poll it until it reaches a terminal state.
    pub fn run(&self, config: &ProcessConfig) -> Result<SupervisedProcess, SpawnError> {
        let mut process = self.spawn(config)?;
        wait_until_complete(&mut process);
        Ok(process)
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor").finish_non_exhaustive()
    }
}

/// Run `config` to completion with the OS launcher and the session journal.
///
/// Returns only once the process is completed, timed out or killed.
pub fn run(config: &ProcessConfig) -> Result<SupervisedProcess, SpawnError> {
    Supervisor::default().run(config)
}

/// Block until `process` is terminal, sleeping with capped backoff between checks.
pub fn wait_until_complete(process: &mut SupervisedProcess) {
    let mut backoff = Backoff::new(POLL_BACKOFF_INITIAL, POLL_BACKOFF_MAX);
    while !process.is_complete() {
        thread::sleep(backoff.step());
    }
}
