//! External network-configuration commands.
//!
//! Route management, DNS registration and every driver-variant
//! configuration step shell out to system tools (`ip`, `netsh`, `route`,
//! `resolvectl`). The [`CommandRunner`] seam lets tests script the outcome.

use std::fmt;
use std::io;
use std::process::Command;

use crate::error::{Error, Result};

/// A program plus positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name, resolved through `PATH`.
    pub program: String,
    /// Positional arguments, passed without a shell.
    pub args: Vec<String>,
}

impl Invocation {
    /// Create an invocation of `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal.
    pub status: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// A clean exit with no output.
    pub fn success() -> Self {
        Self {
            status: Some(0),
            ..Default::default()
        }
    }

    /// A failed exit with the given stderr.
    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Exit code zero and nothing written to stderr.
    pub fn is_success(&self) -> bool {
        self.status == Some(0) && self.stderr.trim().is_empty()
    }

    /// Stdout and stderr joined for diagnostics.
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}

/// Runs external commands.
pub trait CommandRunner: fmt::Debug + Send + Sync {
    /// Run the invocation to completion and capture its output.
    ///
    /// Returns `Err` only when the process could not be started.
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;
}

/// Runs commands with [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let output = cmd.output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run an invocation, turning a non-zero exit or stderr output into
/// [`Error::Command`].
pub fn run_checked(runner: &dyn CommandRunner, invocation: &Invocation) -> Result<CommandOutput> {
    tracing::debug!(command = %invocation, "running");

    let output = runner.run(invocation).map_err(|e| Error::Command {
        command: invocation.to_string(),
        status: None,
        output: e.to_string(),
    })?;

    if !output.is_success() {
        return Err(Error::Command {
            command: invocation.to_string(),
            status: output.status,
            output: output.combined(),
        });
    }

    Ok(output)
}

/// Run an invocation whose failure is advisory: log it and carry on.
pub fn run_best_effort(runner: &dyn CommandRunner, invocation: &Invocation) {
    if let Err(e) = run_checked(runner, invocation) {
        tracing::warn!("ignoring cleanup failure: {}", e);
    }
}
