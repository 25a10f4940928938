use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use shell_supervisor::{
    FileJournal, ProcessConfig, StderrSpec, StdoutSpec, Supervisor, load_config,
};
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Output {
    Inherit,
    Pipe,
    Discard,
}

#[derive(Parser)]
#[command(name = "supervise")]
struct Cli {
    /// Shell command to run
    #[arg(required_unless_present = "config")]
    command: Option<String>,
    /// Load the process config from a YAML file instead
    #[arg(long, conflicts_with = "command")]
    config: Option<PathBuf>,
    /// Deadline in seconds
    #[arg(long)]
    max_duration: Option<f64>,
    /// Shell to run the command with
    #[arg(long)]
    shell: Option<PathBuf>,
    /// Exit codes treated as success
    #[arg(long = "expect", value_delimiter = ',')]
    expected_codes: Vec<i32>,
    #[arg(long, value_enum, default_value_t = Output::Pipe)]
    stdout: Output,
    #[arg(long, value_enum, default_value_t = Output::Pipe)]
    stderr: Output,
    /// Send stderr to wherever stdout goes
    #[arg(long, conflicts_with = "stderr")]
    merge_stderr: bool,
    /// Journal file (defaults to the per-session file in the temp dir)
    #[arg(long)]
    journal: Option<PathBuf>,
}

impl Cli {
    fn process_config(&self) -> Result<ProcessConfig, Box<dyn std::error::Error>> {
        let mut config = match (&self.config, &self.command) {
            (Some(path), _) => load_config(path)?,
            (None, Some(command)) => ProcessConfig::new(command.as_str())
                .stdout(stdout_spec(self.stdout))
                .stderr(if self.merge_stderr {
                    StderrSpec::MergeIntoStdout
                } else {
                    stderr_spec(self.stderr)
                }),
            (None, None) => return Err("a command or --config is required".into()),
        };
        if let Some(secs) = self.max_duration {
            config.max_duration_secs = Some(secs);
        }
        if let Some(shell) = &self.shell {
            config.shell = shell.clone();
        }
        if !self.expected_codes.is_empty() {
            config = config.expected_codes(self.expected_codes.iter().copied());
        }
        Ok(config)
    }
}

fn stdout_spec(output: Output) -> StdoutSpec {
    match output {
        Output::Inherit => StdoutSpec::Inherit,
        Output::Pipe => StdoutSpec::Pipe,
        Output::Discard => StdoutSpec::Discard,
    }
}

fn stderr_spec(output: Output) -> StderrSpec {
    match output {
        Output::Inherit => StderrSpec::Inherit,
        Output::Pipe => StderrSpec::Pipe,
        Output::Discard => StderrSpec::Discard,
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let config = cli.process_config()?;
    let journal = match &cli.journal {
        Some(path) => std::sync::Arc::new(FileJournal::new(path)),
        None => FileJournal::session(),
    };
    let journal_path = journal.path().to_path_buf();
    let supervisor = Supervisor::new(journal);

    let mut process = supervisor.run(&config)?;
    let ok = process.check_exit_code().unwrap_or(false);

    println!("state:     {}", process.state());
    match process.exit_code() {
        Some(code) => println!("exit_code: {code}"),
        None => println!("exit_code: -"),
    }
    println!("elapsed:   {:?}", round_ms(process.elapsed()));
    if !process.stdout().is_empty() {
        println!("stdout:\n{}", process.stdout().trim_end());
    }
    if !process.stderr().is_empty() {
        println!("stderr:\n{}", process.stderr().trim_end());
    }
    println!("journal:   {}", journal_path.display());

    Ok(ok)
}

fn round_ms(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis().try_into().unwrap_or(u64::MAX))
}
