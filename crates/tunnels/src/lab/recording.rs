//! Scripted command runner.
//!
//! Records every invocation instead of spawning it; failures are scripted
//! by command prefix.

use std::io;
use std::sync::{Mutex, PoisonError};

use crate::command::{CommandOutput, CommandRunner, Invocation};

/// A [`CommandRunner`] that records invocations and succeeds unless told
/// otherwise.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    log: Mutex<Vec<Invocation>>,
    failures: Vec<(String, CommandOutput)>,
}

impl RecordingRunner {
    /// Create a runner where every command succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail commands whose command line starts with `prefix`.
    pub fn fail_when(self, prefix: impl Into<String>) -> Self {
        self.fail_with(prefix, CommandOutput::failure(1, "simulated failure"))
    }

    /// Answer commands starting with `prefix` with `output`.
    pub fn fail_with(mut self, prefix: impl Into<String>, output: CommandOutput) -> Self {
        self.failures.push((prefix.into(), output));
        self
    }

    /// Recorded invocations, oldest first.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Recorded command lines, oldest first.
    pub fn commands(&self) -> Vec<String> {
        self.invocations().iter().map(ToString::to_string).collect()
    }

    /// Forget recorded invocations.
    pub fn clear(&self) {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation.clone());

        let line = invocation.to_string();
        let output = self
            .failures
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(CommandOutput::success);
        Ok(output)
    }
}
