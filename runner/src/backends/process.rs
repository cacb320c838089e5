//! blocking subprocess plumbing shared by all batch system adapters

use std::{ffi::OsStr, io, process::Command};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// run a command to completion, capturing both streams as text
pub fn run<I, S>(program: &str, args: I) -> io::Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program).args(args).output()?;

    let output = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    trace!(program, stdout = %output.stdout, stderr = %output.stderr, "command finished");
    Ok(output)
}

/// run an argument-less command
pub fn run_plain(program: &str) -> io::Result<CommandOutput> {
    run(program, std::iter::empty::<&str>())
}

/// run a full shell command line, for submitters that need `&&` chains
pub fn run_shell(command: &str) -> io::Result<CommandOutput> {
    run("sh", ["-c", command])
}
