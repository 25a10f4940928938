//! OS process implementation: `std::process` for spawning, `nix` for group signals.

use std::io::{self, Read, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use nix::errno::Errno;
use nix::sys::signal::killpg;
use nix::unistd::Pid;
use tracing::{debug, trace, warn};

use crate::handle::{Captured, Launcher, ProcessHandle, Signal, SpawnRequest};
use crate::stdio::{StderrSpec, StdinSpec, StdoutSpec};

/// Extract exit code from ExitStatus, mapping signals to 128 + signal number
///
/// This is the shell's `$?` convention, so a child killed by SIGKILL and one
/// that ran `exit 137` both report 137.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| status.signal().map(|sig| 128 + sig).unwrap_or(1))
}

/// Spawns real children via `fork`/`exec`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

impl Launcher for OsLauncher {
    fn launch(&self, request: &SpawnRequest) -> io::Result<Box<dyn ProcessHandle>> {
        Ok(Box::new(OsProcess::spawn(request)?))
    }
}

/// A child running as leader of its own process group.
///
/// Piped stdout/stderr are read by background threads from the moment of
/// spawn, so a chatty child never blocks on a full pipe while it is only
/// being polled.
pub struct OsProcess {
    child: Child,
    /// Held open for `StdinSpec::Pipe` until drain.
    stdin: Option<ChildStdin>,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl OsProcess {
    pub fn spawn(request: &SpawnRequest) -> io::Result<Self> {
        let (mut cmd, merged) = build_command(request)?;
        let spawned = cmd.spawn();
        // The command still owns the parent's copy of a merged pipe writer;
        // the reader only sees EOF once that copy is gone too.
        drop(cmd);

        // Owned before any helper thread starts: an early return from here on
        // drops it, which kills and reaps the child.
        let mut process = Self {
            child: spawned?,
            stdin: None,
            stdout: None,
            stderr: None,
        };

        process.stdout = match merged {
            Some(reader) => Some(collect("stdout", reader)?),
            None => process
                .child
                .stdout
                .take()
                .map(|pipe| collect("stdout", pipe))
                .transpose()?,
        };
        process.stderr = process
            .child
            .stderr
            .take()
            .map(|pipe| collect("stderr", pipe))
            .transpose()?;

        match &request.stdin {
            StdinSpec::Text(payload) => {
                if let Some(pipe) = process.child.stdin.take() {
                    feed(pipe, payload.clone())?;
                }
            }
            _ => process.stdin = process.child.stdin.take(),
        }

        Ok(process)
    }

    fn pgid(&self) -> io::Result<Pid> {
        let pid = i32::try_from(self.child.id())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        Ok(Pid::from_raw(pid))
    }
}

fn build_command(request: &SpawnRequest) -> io::Result<(Command, Option<io::PipeReader>)> {
    let (program, args) = request
        .argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?;

    let mut cmd = Command::new(program);
    // New process group so the whole tree can be killed at once
    cmd.args(args).arg(&request.command).process_group(0);

    if let Some(dir) = &request.working_dir {
        cmd.current_dir(dir);
    }
    if let Some(env) = &request.env {
        cmd.env_clear().envs(env);
    }

    cmd.stdin(match &request.stdin {
        StdinSpec::Inherit => Stdio::inherit(),
        StdinSpec::Discard => Stdio::null(),
        StdinSpec::Pipe | StdinSpec::Text(_) => Stdio::piped(),
    });
    let merged = wire_output(&mut cmd, request.stdout, request.stderr)?;
    Ok((cmd, merged))
}

/// Configure stdout/stderr. Returns the read end of a shared pipe when
/// stderr is merged into a piped stdout.
fn wire_output(
    cmd: &mut Command,
    stdout: StdoutSpec,
    stderr: StderrSpec,
) -> io::Result<Option<io::PipeReader>> {
    fn redirect(spec: StdoutSpec) -> Stdio {
        match spec {
            StdoutSpec::Inherit => Stdio::inherit(),
            StdoutSpec::Pipe => Stdio::piped(),
            StdoutSpec::Discard => Stdio::null(),
        }
    }

    match (stdout, stderr) {
        (StdoutSpec::Pipe, StderrSpec::MergeIntoStdout) => {
            let (reader, writer) = io::pipe()?;
            cmd.stdout(writer.try_clone()?).stderr(writer);
            return Ok(Some(reader));
        }
        (StdoutSpec::Inherit, StderrSpec::MergeIntoStdout) => {
            cmd.stdout(Stdio::inherit()).stderr(io::stdout());
        }
        (StdoutSpec::Discard, StderrSpec::MergeIntoStdout) => {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        (stdout, StderrSpec::Inherit) => {
            cmd.stdout(redirect(stdout)).stderr(Stdio::inherit());
        }
        (stdout, StderrSpec::Pipe) => {
            cmd.stdout(redirect(stdout)).stderr(Stdio::piped());
        }
        (stdout, StderrSpec::Discard) => {
            cmd.stdout(redirect(stdout)).stderr(Stdio::null());
        }
    }
    Ok(None)
}

/// Read `source` to EOF on a background thread.
fn collect<R: Read + Send + 'static>(
    stream: &str,
    mut source: R,
) -> io::Result<JoinHandle<Vec<u8>>> {
    thread::Builder::new()
        .name(format!("collect-{stream}"))
        .spawn(move || {
            let mut buf = Vec::new();
            if let Err(e) = source.read_to_end(&mut buf) {
                trace!(error = %e, "output pipe closed with error");
            }
            buf
        })
}

/// Write the stdin payload on a background thread, then close the pipe.
fn feed(mut pipe: ChildStdin, payload: String) -> io::Result<()> {
    thread::Builder::new()
        .name("feed-stdin".to_string())
        .spawn(move || {
            if let Err(e) = pipe.write_all(payload.as_bytes()) {
                debug!(error = %e, "stdin payload not fully written");
            }
        })?;
    Ok(())
}

fn join_output(collector: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(collector) = collector else {
        return String::new();
    };
    match collector.join() {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => {
            warn!("output collector thread panicked");
            String::new()
        }
    }
}

impl ProcessHandle for OsProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn poll(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(exit_code))
    }

    fn signal_group(&mut self, signal: Signal) -> io::Result<()> {
        let pgid = self.pgid()?;
        let pid = pgid.as_raw();
        match killpg(pgid, signal) {
            // ESRCH: the group is already gone, nothing left to signal
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => {
                warn!(pid, signal = ?signal, error = %errno, "killpg failed");
                // Fall back to the leader alone so a following wait cannot hang
                if signal == Signal::SIGKILL
                    && let Err(e) = self.child.kill()
                {
                    warn!(pid, error = %e, "kill fallback failed");
                }
                Err(errno.into())
            }
        }
    }

    fn wait(&mut self) -> io::Result<i32> {
        self.child.wait().map(exit_code)
    }

    fn drain(&mut self) -> Captured {
        drop(self.stdin.take());
        Captured {
            stdout: join_output(self.stdout.take()),
            stderr: join_output(self.stderr.take()),
        }
    }
}

/// A child still running when its handle goes away is killed with its group
/// and reaped. Reader threads are left to finish on their own.
impl Drop for OsProcess {
    fn drop(&mut self) {
        drop(self.stdin.take());
        match self.child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => debug!(pid = self.child.id(), error = %e, "try_wait failed on drop"),
        }
        warn!(pid = self.child.id(), "process dropped while running; killing its group");
        if let Err(e) = self.signal_group(Signal::SIGKILL) {
            debug!(pid = self.child.id(), error = %e, "group kill on drop failed");
        }
        if let Err(e) = self.child.wait() {
            warn!(pid = self.child.id(), error = %e, "failed to reap dropped process");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    fn request(command: &str) -> SpawnRequest {
        SpawnRequest {
            argv: vec!["/bin/sh".into(), "-c".into()],
            command: command.into(),
            stdin: StdinSpec::Discard,
            stdout: StdoutSpec::Pipe,
            stderr: StderrSpec::Pipe,
            working_dir: None,
            env: None,
        }
    }

    fn run(request: &SpawnRequest) -> (i32, Captured) {
        let mut process = OsProcess::spawn(request).unwrap();
        let code = process.wait().unwrap();
        (code, process.drain())
    }

    #[test]
    fn exit_code_maps_signals() {
        assert_eq!(exit_code(ExitStatus::from_raw(7 << 8)), 7);
        // Raw wait status 9: terminated by SIGKILL
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
    }

    #[test]
    fn captures_stdout_and_stderr_separately() {
        let (code, out) = run(&request("echo out; echo err >&2; exit 3"));
        assert_eq!(code, 3);
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[test]
    fn merges_stderr_into_piped_stdout() {
        let mut req = request("echo out; echo err >&2");
        req.stderr = StderrSpec::MergeIntoStdout;
        let (code, out) = run(&req);
        assert_eq!(code, 0);
        assert_eq!(out.stdout, "out\nerr\n");
        assert!(out.stderr.is_empty());
    }

    #[test]
    fn discarded_streams_capture_nothing() {
        let mut req = request("echo out; echo err >&2");
        req.stdout = StdoutSpec::Discard;
        req.stderr = StderrSpec::Discard;
        let (_, out) = run(&req);
        assert_eq!(out, Captured::default());
    }

    #[test]
    fn text_stdin_is_written_then_closed() {
        let mut req = request("cat");
        req.stdin = StdinSpec::text("payload");
        let (code, out) = run(&req);
        assert_eq!(code, 0);
        assert_eq!(out.stdout, "payload");
    }

    #[test]
    fn env_replaces_inherited_environment() {
        let mut req = request("echo \"${ONLY}-${HOME:-unset}\"");
        req.env = Some(BTreeMap::from([("ONLY".to_string(), "1".to_string())]));
        let (_, out) = run(&req);
        assert_eq!(out.stdout, "1-unset\n");
    }

    #[test]
    fn runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request("pwd -P");
        req.working_dir = Some(dir.path().to_path_buf());
        let (_, out) = run(&req);
        assert_eq!(
            out.stdout.trim_end(),
            dir.path().canonicalize().unwrap().to_str().unwrap()
        );
    }

    #[test]
    fn child_leads_its_own_process_group() {
        let mut process = OsProcess::spawn(&request("sleep 30")).unwrap();
        let pid = Pid::from_raw(process.pid() as i32);
        assert_eq!(nix::unistd::getpgid(Some(pid)).unwrap(), pid);
        assert_ne!(nix::unistd::getpgid(None).unwrap(), pid);

        process.signal_group(Signal::SIGKILL).unwrap();
        assert_eq!(process.wait().unwrap(), 137);
    }

    #[test]
    fn group_kill_reaches_background_descendants() {
        // The backgrounded sleep holds the stdout pipe; drain only returns
        // once it is dead too.
        let mut process = OsProcess::spawn(&request("sleep 30 & echo started; wait")).unwrap();
        let start = Instant::now();
        thread::sleep(Duration::from_millis(200));

        process.signal_group(Signal::SIGKILL).unwrap();
        process.wait().unwrap();
        let out = process.drain();
        assert_eq!(out.stdout, "started\n");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn signalling_an_exited_group_succeeds() {
        let mut process = OsProcess::spawn(&request("exit 0")).unwrap();
        assert_eq!(process.wait().unwrap(), 0);
        process.signal_group(Signal::SIGKILL).unwrap();
    }

    #[test]
    fn poll_is_non_blocking() {
        let mut process = OsProcess::spawn(&request("sleep 30")).unwrap();
        assert_eq!(process.poll().unwrap(), None);
        process.signal_group(Signal::SIGKILL).unwrap();
        process.wait().unwrap();
        assert_eq!(process.poll().unwrap(), Some(137));
    }

    #[test]
    fn missing_shell_fails_to_spawn() {
        let mut req = request("true");
        req.argv = vec!["/definitely/not/a/shell".into(), "-c".into()];
        let err = OsProcess::spawn(&req).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn missing_working_dir_fails_to_spawn() {
        let mut req = request("true");
        req.working_dir = Some("/definitely/not/a/dir".into());
        assert!(OsProcess::spawn(&req).is_err());
    }

    #[test]
    fn empty_argv_is_rejected() {
        let mut req = request("true");
        req.argv.clear();
        let err = OsProcess::spawn(&req).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn dropping_a_running_handle_reaps_it() {
        let process = OsProcess::spawn(&request("sleep 30")).unwrap();
        let proc_dir = std::path::PathBuf::from(format!("/proc/{}", process.pid()));
        assert!(proc_dir.exists());

        drop(process);
        // Killed and waited for, so not even a zombie entry remains.
        assert!(!proc_dir.exists());
    }

    #[test]
    fn dropping_a_reaped_handle_is_quiet() {
        let mut process = OsProcess::spawn(&request("exit 3")).unwrap();
        assert_eq!(process.wait().unwrap(), 3);
        let pid = Pid::from_raw(process.pid() as i32);

        drop(process);
        assert_eq!(nix::sys::signal::kill(pid, None), Err(Errno::ESRCH));
    }

    #[test]
    fn collector_returns_everything_read() {
        let collector = collect("stdout", &b"abc"[..]).unwrap();
        assert_eq!(collector.join().unwrap(), b"abc");
    }

    #[test]
    fn signal_death_reads_like_exit_128_plus_signal() {
        let (killed, _) = run(&request("kill -KILL $$"));
        let (exited, _) = run(&request("exit 137"));
        assert_eq!(killed, 137);
        assert_eq!(exited, killed);
    }
}
