// src/exec.rs

//! External command invocation.
//!
//! Every mutation of the local RCS tree and every remote interaction goes
//! through `cvs`, `ci`, `rcs` or `rlog`. Commands run with stdin closed;
//! stdout is captured in memory or redirected to a file for large
//! listings, stderr is captured and replayed into the error when the
//! command fails.

use crate::error::{Error, Result};
use std::fs::File;
use std::process::{Command, ExitStatus, Output, Stdio};
use tracing::debug;

/// Which external tool family a command belongs to; selects the error
/// variant for a non-zero exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Cvs,
    Rcs,
}

/// Render a command for tracing and error messages.
pub fn command_line(cmd: &Command) -> String {
    let mut line = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

/// Run a command, capturing stdout and stderr. The exit status is not
/// checked; callers that special-case statuses use this directly.
pub fn run(cmd: &mut Command, trace: bool) -> Result<Output> {
    if trace {
        debug!("running: {}", command_line(cmd));
    }
    cmd.stdin(Stdio::null());
    Ok(cmd.output()?)
}

/// Build the error for a failed command.
pub fn failure(tool: Tool, cmd: &Command, output: &Output) -> Error {
    let command = command_line(cmd);
    let status = output.status.code().unwrap_or(-1);
    let stderr = String::from_utf8_lossy(&output.stderr)
        .trim_end()
        .to_string();
    match tool {
        Tool::Cvs => Error::CvsCommand {
            command,
            status,
            stderr,
        },
        Tool::Rcs => Error::RcsCommand {
            command,
            status,
            stderr,
        },
    }
}

/// Run a command and require success.
pub fn run_checked(cmd: &mut Command, tool: Tool, trace: bool) -> Result<Output> {
    let output = run(cmd, trace)?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(failure(tool, cmd, &output))
    }
}

/// Run a command with stdout redirected to `stdout` (for large captures)
/// and stderr collected in memory. Returns the exit status and stderr.
pub fn run_stdout_to(
    cmd: &mut Command,
    stdout: File,
    trace: bool,
) -> Result<(ExitStatus, String)> {
    if trace {
        debug!("running: {}", command_line(cmd));
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::piped());
    let child = cmd.spawn()?;
    let output = child.wait_with_output()?;
    Ok((
        output.status,
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom};

    #[test]
    fn test_command_line_rendering() {
        let mut cmd = Command::new("ci");
        cmd.args(["-q", "-f", "-r1.2"]).arg("file,v");
        assert_eq!(command_line(&cmd), "ci -q -f -r1.2 file,v");
    }

    #[test]
    fn test_run_checked_success() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out"]);
        let output = run_checked(&mut cmd, Tool::Rcs, false).unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "out\n");
    }

    #[test]
    fn test_run_checked_failure_maps_tool() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo oops >&2; exit 3"]);
        match run_checked(&mut cmd, Tool::Rcs, false) {
            Err(Error::RcsCommand {
                status, stderr, ..
            }) => {
                assert_eq!(status, 3);
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 1"]);
        assert!(matches!(
            run_checked(&mut cmd, Tool::Cvs, false),
            Err(Error::CvsCommand { status: 1, .. })
        ));
    }

    #[test]
    fn test_run_stdout_to_file() {
        let mut file = tempfile::tempfile().unwrap();
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo captured; echo warned >&2"]);
        let (status, stderr) = run_stdout_to(&mut cmd, file.try_clone().unwrap(), false).unwrap();
        assert!(status.success());
        assert_eq!(stderr, "warned\n");

        file.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "captured\n");
    }
}
