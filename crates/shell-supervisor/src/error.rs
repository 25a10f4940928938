use std::path::PathBuf;

/// The child could not be started.
///
/// The only failure a supervised process can report; everything after a
/// successful spawn (timeouts, unexpected exit codes, termination trouble)
/// is represented as state.
#[derive(Debug, thiserror::Error)]
#[error("spawn failed: {command}\nargv: {argv:?}\n{message}")]
pub struct SpawnError {
    pub argv: Vec<String>,
    pub command: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}
