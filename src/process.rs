//! Small builder over `std::process::Command` used by the host tool adapters.
//!
//! Every invocation is traced at debug level with its full command line, so
//! `VM_IMAGE_BUILDER_TRACE=1` shows exactly what ran against the host.

use anyhow::{bail, Context, Result};
use std::ffi::{OsStr, OsString};
use std::process::{Child, Command, ExitStatus, Stdio};

/// Captured result of a finished command.
#[derive(Debug)]
pub struct CmdOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// stdout followed by stderr, for tools that report on either stream.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Builder for a single external command.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Return the output even when the command exits nonzero.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Command line as a single printable string.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Run to completion, capturing stdout and stderr.
    ///
    /// Fails on a nonzero exit unless [`Cmd::allow_fail`] was set; the error
    /// carries the tool's own stderr text.
    pub fn run(&self) -> Result<CmdOutput> {
        let line = self.display();
        tracing::debug!(command = %line, "running");

        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to execute: {}", line))?;

        let result = CmdOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            bail!(
                "{} failed\n  Exit code: {}\n  stderr: {}",
                line,
                result.status.code().unwrap_or(-1),
                result.stderr.trim()
            );
        }

        Ok(result)
    }

    /// Spawn with stdout and stderr piped, for streaming consumers.
    pub fn spawn_piped(&self) -> Result<Child> {
        let line = self.display();
        tracing::debug!(command = %line, "spawning");

        self.command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn: {}", line))
    }
}
