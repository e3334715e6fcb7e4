//! Synchronous subprocess helpers.
//!
//! Host tools are always invoked with a discrete argument vector; nothing here
//! goes through a shell.

use std::io::{Read, Seek, SeekFrom};
use std::process::{Command, ExitStatus};

use color_eyre::eyre::{eyre, Context, Result};

/// Only the tail of a failed child's stderr is kept in error messages.
const MAX_STDERR_BYTES: u64 = 1024;

/// Helpers intended for [`std::process::Command`].
pub trait CommandRun {
    /// Execute the child, returning an error carrying the tail of its stderr
    /// if it exits unsuccessfully.
    fn run(&mut self) -> Result<()>;

    /// Execute the child and capture its stdout as a string.
    fn run_get_string(&mut self) -> Result<String>;

    /// Execute the child, parsing its stdout as JSON.
    fn run_and_parse_json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T>;
}

fn check_status(status: ExitStatus, stderr: std::fs::File) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let tail = stderr_tail(stderr);
    let tail = tail.trim();
    if tail.is_empty() {
        Err(eyre!("Subprocess failed: {status}"))
    } else {
        Err(eyre!("Subprocess failed: {status}\n{tail}"))
    }
}

fn stderr_tail(mut f: std::fs::File) -> String {
    let len = f.metadata().map(|m| m.len()).unwrap_or(0);
    let start = len.saturating_sub(MAX_STDERR_BYTES);
    let mut buf = Vec::new();
    match f
        .seek(SeekFrom::Start(start))
        .and_then(|_| f.read_to_end(&mut buf))
    {
        Ok(_) => String::from_utf8_lossy(&buf).into_owned(),
        Err(e) => {
            tracing::warn!("failed to read child stderr: {e}");
            "<failed to read stderr>".to_owned()
        }
    }
}

impl CommandRun for Command {
    fn run(&mut self) -> Result<()> {
        let stderr = tempfile::tempfile()?;
        self.stderr(stderr.try_clone()?);
        tracing::debug!("exec: {self:?}");
        let status = self
            .status()
            .with_context(|| format!("Failed to execute {:?}", self.get_program()))?;
        check_status(status, stderr)
    }

    fn run_get_string(&mut self) -> Result<String> {
        let mut stdout = tempfile::tempfile()?;
        self.stdout(stdout.try_clone()?);
        self.run()?;
        stdout.seek(SeekFrom::Start(0)).context("seek")?;
        let mut s = String::new();
        stdout.read_to_string(&mut s)?;
        Ok(s)
    }

    fn run_and_parse_json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T> {
        let output = self.run_get_string()?;
        serde_json::from_str(&output).context("Parsing subprocess output as JSON")
    }
}
