//! Journal sinks.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::entry::JournalEntry;

/// Destination for terminal-state records.
///
/// Recording never fails from the caller's point of view: a sink that
/// cannot persist an entry reports it through `tracing` and moves on.
pub trait Journal: Send + Sync {
    fn record(&self, entry: &JournalEntry);
}

static SESSION_LOG: LazyLock<PathBuf> = LazyLock::new(|| {
    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    std::env::temp_dir().join(format!("shell-supervisor-{started}.jsonl"))
});

static SESSION: LazyLock<Arc<FileJournal>> =
    LazyLock::new(|| Arc::new(FileJournal::new(SESSION_LOG.as_path())));

/// Path of the process-wide journal file.
/// Fixed on first access for the lifetime of the process.
pub fn session_log() -> &'static Path {
    &SESSION_LOG
}

/// Append-only JSONL file.
///
/// Each entry is rendered up front and written with a single `write_all`
/// on an `O_APPEND` descriptor while holding the instance lock, so a record
/// is never split by a concurrent writer.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Shared journal for the whole process, writing to [`session_log`].
    ///
    /// The file is opened per entry, so there is nothing to tear down.
    pub fn session() -> Arc<Self> {
        Arc::clone(&SESSION)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

impl Journal for FileJournal {
    fn record(&self, entry: &JournalEntry) {
        let line = match entry.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(command = %entry.command, error = %e, "journal entry not serializable");
                return;
            }
        };

        // Recover from poisoned mutex: the guarded data is `()`.
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = self.append(&line) {
            warn!(path = %self.path.display(), error = %e, "journal write failed");
        }
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, oldest first.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Journal for MemoryJournal {
    fn record(&self, entry: &JournalEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
    }
}

/// Discards every entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullJournal;

impl Journal for NullJournal {
    fn record(&self, _entry: &JournalEntry) {}
}
