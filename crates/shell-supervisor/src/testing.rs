//! Scripted process handle for driving the state machine in unit tests.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use nix::errno::Errno;

use crate::handle::{Captured, Launcher, ProcessHandle, Signal, SpawnRequest};

pub(crate) const FAKE_PID: u32 = 4242;

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub exit: Option<i32>,
    pub poll_error: Option<Errno>,
    pub signal_error: Option<Errno>,
    pub wait_error: bool,
    pub output: Captured,
    pub signals: Vec<Signal>,
    pub waits: usize,
    pub drains: usize,
    pub requests: Vec<SpawnRequest>,
}

/// Cloneable view onto the state shared with the handle it launched.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeLauncher {
    state: Arc<Mutex<FakeState>>,
    spawn_error: Option<io::ErrorKind>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(kind: io::ErrorKind) -> Self {
        Self {
            spawn_error: Some(kind),
            ..Self::default()
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn exit_with(&self, code: i32) {
        self.state().exit = Some(code);
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, request: &SpawnRequest) -> io::Result<Box<dyn ProcessHandle>> {
        self.state().requests.push(request.clone());
        if let Some(kind) = self.spawn_error {
            return Err(io::Error::new(kind, "scripted spawn failure"));
        }
        Ok(Box::new(FakeHandle {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
}

impl ProcessHandle for FakeHandle {
    fn pid(&self) -> u32 {
        FAKE_PID
    }

    fn poll(&mut self) -> io::Result<Option<i32>> {
        let state = self.state.lock().unwrap();
        match state.poll_error {
            Some(errno) => Err(errno.into()),
            None => Ok(state.exit),
        }
    }

    fn signal_group(&mut self, signal: Signal) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.signals.push(signal);
        if let Some(errno) = state.signal_error {
            return Err(errno.into());
        }
        if state.exit.is_none() {
            state.exit = Some(128 + signal as i32);
        }
        Ok(())
    }

    fn wait(&mut self) -> io::Result<i32> {
        let mut state = self.state.lock().unwrap();
        state.waits += 1;
        if state.wait_error {
            return Err(io::Error::other("scripted wait failure"));
        }
        Ok(state.exit.unwrap_or(137))
    }

    fn drain(&mut self) -> Captured {
        let mut state = self.state.lock().unwrap();
        state.drains += 1;
        std::mem::take(&mut state.output)
    }
}
