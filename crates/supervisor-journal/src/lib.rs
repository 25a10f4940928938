//! Append-only journal of supervised process outcomes.
//!
//! Every supervised process writes exactly one entry, at the moment it
//! leaves the running state. Available sinks:
//! - `FileJournal`: JSONL file, one line per entry
//! - `MemoryJournal`: in-memory, for tests and embedding callers
//! - `NullJournal`: discards everything

pub mod entry;
pub mod sink;
pub mod time;

pub use entry::JournalEntry;
pub use sink::{FileJournal, Journal, MemoryJournal, NullJournal};
