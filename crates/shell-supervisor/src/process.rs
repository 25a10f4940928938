//! Lifecycle of one supervised shell command.
//!
//! ```text
//! Running --(exit observed)------> Completed
//! Running --(deadline exceeded)--> TimedOut
//! Running --(kill())-------------> Killed
//! ```
//!
//! Terminal states are absorbing. Leaving `Running` happens exactly once and
//! is the only place output is drained, the end time stamped and the journal
//! written.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use supervisor_journal::{Journal, JournalEntry};
use tracing::{debug, info, warn};

use crate::config::ProcessConfig;
use crate::error::SpawnError;
use crate::handle::{Launcher, ProcessHandle, Signal, SpawnRequest};
use crate::os::OsLauncher;

/// Maximum length for command preview in logs
const COMMAND_PREVIEW_MAX_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    Running,
    /// Exited on its own; the exit code is known.
    Completed,
    /// Killed because it outlived its deadline.
    TimedOut,
    /// Killed by the caller.
    Killed,
}

impl ProcessState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::TimedOut => "timeout",
            Self::Killed => "killed",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Truncate a command string for logging, preserving UTF-8 boundaries
fn truncate_preview(s: &str) -> String {
    if s.len() <= COMMAND_PREVIEW_MAX_LEN {
        return s.to_string();
    }
    let end = s
        .char_indices()
        .take_while(|(i, _)| *i < COMMAND_PREVIEW_MAX_LEN)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(COMMAND_PREVIEW_MAX_LEN);
    format!("{}...", s.get(..end).unwrap_or(s))
}

/// A shell command running under a wall-clock deadline.
///
/// The child is spawned by the constructor and observed only through
/// [`is_complete`](Self::is_complete) and [`kill`](Self::kill); nothing
/// happens in the background. All mutation goes through `&mut self`, so a
/// single owner drives the state machine.
pub struct SupervisedProcess {
    command: String,
    argv: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Option<BTreeMap<String, String>>,
    expected_codes: BTreeSet<i32>,
    max_duration: Duration,
    pid: u32,
    start_time: DateTime<Local>,
    started: Instant,
    end_time: Option<DateTime<Local>>,
    finished: Option<Instant>,
    state: ProcessState,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    termination_error: Option<String>,
    poll_failed: bool,
    handle: Box<dyn ProcessHandle>,
    journal: Arc<dyn Journal>,
}

impl SupervisedProcess {
    /// Spawn `config.command` through the OS launcher.
    pub fn spawn(config: &ProcessConfig, journal: Arc<dyn Journal>) -> Result<Self, SpawnError> {
        Self::spawn_with(&OsLauncher, config, journal)
    }

    /// Spawn through a specific launcher.
    pub fn spawn_with(
        launcher: &dyn Launcher,
        config: &ProcessConfig,
        journal: Arc<dyn Journal>,
    ) -> Result<Self, SpawnError> {
        let request = SpawnRequest::from_config(config);
        let handle = launcher.launch(&request).map_err(|e| SpawnError {
            argv: request.argv.clone(),
            command: request.command.clone(),
            message: e.to_string(),
        })?;

        let pid = handle.pid();
        let max_duration = config.deadline();
        info!(
            pid,
            command = %truncate_preview(&request.command),
            max_duration_ms = max_duration.as_millis() as u64,
            "process started"
        );

        Ok(Self {
            command: request.command,
            argv: request.argv,
            working_dir: request.working_dir,
            env: request.env,
            expected_codes: config.expected_codes.clone(),
            max_duration,
            pid,
            start_time: Local::now(),
            started: Instant::now(),
            end_time: None,
            finished: None,
            state: ProcessState::Running,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            termination_error: None,
            poll_failed: false,
            handle,
            journal,
        })
    }

    /// Whether the process has reached a terminal state.
    ///
    /// Never blocks while the child is running. The first call that sees the
    /// child gone (or the deadline passed) performs the transition; later
    /// calls return `true` without touching the child again.
    pub fn is_complete(&mut self) -> bool {
        if self.state.is_terminal() {
            return true;
        }

        let exited = match self.handle.poll() {
            Ok(code) => code,
            // Treated as still running; the deadline still applies.
            Err(e) if self.poll_failed => {
                debug!(pid = self.pid, error = %e, "poll failed again");
                None
            }
            Err(e) => {
                warn!(pid = self.pid, error = %e, "poll failed");
                self.poll_failed = true;
                self.note_termination_error(format!("poll: {e}"));
                None
            }
        };

        if let Some(code) = exited {
            self.exit_code = Some(code);
            self.finish(ProcessState::Completed);
        } else if self.started.elapsed() > self.max_duration {
            self.terminate();
            self.finish(ProcessState::TimedOut);
        }

        self.state.is_terminal()
    }

    pub fn is_timed_out(&mut self) -> bool {
        self.is_complete() && self.state == ProcessState::TimedOut
    }

    /// `None` while running; afterwards whether the exit code is expected.
    ///
    /// A timed-out or killed process has no exit code and never matches.
    pub fn check_exit_code(&mut self) -> Option<bool> {
        if !self.is_complete() {
            return None;
        }
        Some(
            self.exit_code
                .is_some_and(|code| self.expected_codes.contains(&code)),
        )
    }

    /// Kill the process group unless the process already finished.
    ///
    /// Checks completion first, so an exit (or expired deadline) that
    /// happened before the call wins over `Killed`.
    pub fn kill(&mut self) {
        if self.is_complete() {
            return;
        }
        self.terminate();
        self.finish(ProcessState::Killed);
    }

    /// SIGKILL the group and reap the leader. Failures are kept for the journal.
    fn terminate(&mut self) {
        if let Err(e) = self.handle.signal_group(Signal::SIGKILL) {
            warn!(pid = self.pid, error = %e, "failed to signal process group");
            self.note_termination_error(format!("signal: {e}"));
        }
        if let Err(e) = self.handle.wait() {
            warn!(pid = self.pid, error = %e, "failed to reap process");
            self.note_termination_error(format!("wait: {e}"));
        }
    }

    fn note_termination_error(&mut self, message: String) {
        match &mut self.termination_error {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(&message);
            }
            None => self.termination_error = Some(message),
        }
    }

    /// Single exit from `Running`: state, then end time, then output, then journal.
    fn finish(&mut self, state: ProcessState) {
        self.state = state;
        self.finished = Some(Instant::now());
        self.end_time = Some(Local::now());

        let captured = self.handle.drain();
        self.stdout = captured.stdout;
        self.stderr = captured.stderr;

        info!(
            pid = self.pid,
            state = %state,
            exit_code = ?self.exit_code,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "process finished"
        );
        self.journal.record(&self.journal_entry());
    }

    fn journal_entry(&self) -> JournalEntry {
        let (start_time, end_time) =
            JournalEntry::timestamps(&self.start_time, self.end_time.as_ref());
        JournalEntry {
            command: self.command.clone(),
            argv: self.argv.clone(),
            state: self.state.as_str().to_string(),
            exit_code: self.exit_code,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            start_time,
            end_time,
            error: self.termination_error.clone(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// `[shell] + args + ["-c"]`, without the command text.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn env(&self) -> Option<&BTreeMap<String, String>> {
        self.env.as_ref()
    }

    pub fn expected_codes(&self) -> &BTreeSet<i32> {
        &self.expected_codes
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Last observed state. Does not poll; see [`is_complete`](Self::is_complete).
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Set only for [`ProcessState::Completed`].
    ///
    /// A child that died from a signal it did not trap (including one sent by
    /// someone other than this supervisor) reports `128 + signal`, the way a
    /// shell's `$?` does. That is indistinguishable from the same value
    /// passed to `exit`.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Captured stdout; empty until terminal and for non-piped streams.
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn start_time(&self) -> DateTime<Local> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Local>> {
        self.end_time
    }

    /// Time from spawn to the terminal transition, or until now while running.
    pub fn elapsed(&self) -> Duration {
        self.finished
            .map_or_else(|| self.started.elapsed(), |end| end.duration_since(self.started))
    }

    /// First poll failure, and any signal or reap failure seen while forcing
    /// termination.
    pub fn termination_error(&self) -> Option<&str> {
        self.termination_error.as_deref()
    }
}

impl fmt::Display for SupervisedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SupervisedProcess(state={:?}, code={:?}, argv={:?}, command={:?})",
            self.state.as_str(),
            self.exit_code,
            self.argv,
            self.command
        )
    }
}

impl fmt::Debug for SupervisedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisedProcess")
            .field("pid", &self.pid)
            .field("state", &self.state)
            .field("exit_code", &self.exit_code)
            .field("argv", &self.argv)
            .field("command", &self.command)
            .field("max_duration", &self.max_duration)
            .finish_non_exhaustive()
    }
}
