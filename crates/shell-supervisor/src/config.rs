use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::stdio::{StderrSpec, StdinSpec, StdoutSpec};

/// Deadline applied when the caller does not choose one.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(60);
/// Upper bound for any deadline (2 days).
pub const MAX_DURATION_LIMIT: Duration = Duration::from_secs(60 * 60 * 24 * 2);
pub const DEFAULT_EXPECTED_CODES: [i32; 1] = [0];

/// Shell used when `bash` is not on `PATH`.
const FALLBACK_SHELL: &str = "/bin/sh";

static DEFAULT_SHELL: LazyLock<PathBuf> =
    LazyLock::new(|| which::which("bash").unwrap_or_else(|_| PathBuf::from(FALLBACK_SHELL)));

/// Working directory of this program, captured on first access.
static LAUNCH_DIR: LazyLock<Option<PathBuf>> = LazyLock::new(|| std::env::current_dir().ok());

/// Resolved default shell (`bash` from `PATH`, else `/bin/sh`).
pub fn default_shell() -> &'static Path {
    &DEFAULT_SHELL
}

/// Clamp a deadline in seconds into `[0, MAX_DURATION_LIMIT]`.
///
/// `None` and NaN mean "no deadline of our own", i.e. the upper limit.
/// Negative values mean "time out on the first check".
pub fn clamp_max_duration(secs: Option<f64>) -> Duration {
    match secs {
        None => MAX_DURATION_LIMIT,
        Some(s) if s.is_nan() => MAX_DURATION_LIMIT,
        Some(s) if s <= 0.0 => Duration::ZERO,
        Some(s) => Duration::try_from_secs_f64(s)
            .map_or(MAX_DURATION_LIMIT, |d| d.min(MAX_DURATION_LIMIT)),
    }
}

/// Everything needed to start one supervised shell command.
///
/// Deserializable from YAML (see [`load`]); every field except `command`
/// has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Shell command text, passed to the shell after `-c`.
    pub command: String,
    pub shell: PathBuf,
    /// Extra shell arguments, placed before `-c`.
    pub args: Vec<String>,
    pub stdin: StdinSpec,
    pub stdout: StdoutSpec,
    pub stderr: StderrSpec,
    /// `None` runs in the directory this program was started from.
    pub working_dir: Option<PathBuf>,
    /// `None` inherits the caller's environment; `Some` replaces it entirely.
    pub env: Option<BTreeMap<String, String>>,
    pub expected_codes: BTreeSet<i32>,
    /// Wall-clock budget in seconds, clamped by [`clamp_max_duration`].
    pub max_duration_secs: Option<f64>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            shell: default_shell().to_path_buf(),
            args: Vec::new(),
            stdin: StdinSpec::default(),
            stdout: StdoutSpec::default(),
            stderr: StderrSpec::default(),
            working_dir: None,
            env: None,
            expected_codes: DEFAULT_EXPECTED_CODES.into_iter().collect(),
            max_duration_secs: Some(DEFAULT_MAX_DURATION.as_secs_f64()),
        }
    }
}

impl ProcessConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn stdin(mut self, stdin: StdinSpec) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn stdout(mut self, stdout: StdoutSpec) -> Self {
        self.stdout = stdout;
        self
    }

    pub fn stderr(mut self, stderr: StderrSpec) -> Self {
        self.stderr = stderr;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn expected_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.expected_codes = codes.into_iter().collect();
        self
    }

    pub fn max_duration(mut self, max: Duration) -> Self {
        self.max_duration_secs = Some(max.as_secs_f64());
        self
    }

    /// Drop the per-command deadline; the upper limit still applies.
    pub fn without_max_duration(mut self) -> Self {
        self.max_duration_secs = None;
        self
    }

    /// Clamped deadline actually enforced.
    pub fn deadline(&self) -> Duration {
        clamp_max_duration(self.max_duration_secs)
    }

    /// `[shell] + args + ["-c"]`; the command text follows at spawn time.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        argv.push(self.shell.to_string_lossy().into_owned());
        argv.extend(self.args.iter().cloned());
        argv.push("-c".to_string());
        argv
    }

    /// Directory the child starts in.
    pub fn resolved_working_dir(&self) -> Option<PathBuf> {
        self.working_dir.clone().or_else(|| LAUNCH_DIR.clone())
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        if let Some(dir) = &self.working_dir
            && dir.is_relative()
        {
            self.working_dir = Some(base.join(dir));
        }
    }
}

/// Load a process config from a YAML file.
///
/// A relative `working_dir` is resolved against the config file's parent directory.
pub fn load(path: &Path) -> Result<ProcessConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: ProcessConfig =
        serde_yaml_ng::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    if config.command.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{}: command is required",
            path.display()
        )));
    }
    if let Some(config_dir) = path.parent() {
        config.resolve_relative_paths(config_dir);
    }
    Ok(config)
}
