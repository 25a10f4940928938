//! Redirection choices for the child's standard streams.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdinSpec {
    /// Share the caller's stdin.
    #[default]
    Inherit,
    /// Open a pipe and keep it open until the process reaches a terminal state.
    Pipe,
    /// Read from `/dev/null`.
    Discard,
    /// Write this payload once, then close the pipe.
    Text(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdoutSpec {
    #[default]
    Inherit,
    /// Buffer in memory; available once the process is terminal.
    Pipe,
    Discard,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StderrSpec {
    #[default]
    Inherit,
    /// Buffer in memory; available once the process is terminal.
    Pipe,
    Discard,
    /// Send stderr wherever stdout goes. With a piped stdout both streams
    /// land, interleaved, in the captured stdout.
    MergeIntoStdout,
}

impl StdinSpec {
    pub fn text(payload: impl Into<String>) -> Self {
        Self::Text(payload.into())
    }
}
