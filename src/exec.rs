//! External command execution.
//!
//! Every tool the pipeline drives (security, xcodebuild, hdiutil, codesign,
//! notarytool, stapler, osascript) runs through [`execute`]: one awaited
//! child process per call, captured stdout/stderr, and a non-zero exit
//! mapped to [`Error::CommandFailed`]. There is no retry at this layer;
//! retry policy belongs to call sites.

use crate::error::{Error, Result};
use regex::Regex;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Replace `--password <v>`, `--secret <v>` and `-P <v>` values with `*****`
/// in the command line used for logging. The real argv is never touched.
pub fn redact(command_line: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"(--password|--secret|-P)\s+\S+").expect("valid regex"));
    pattern.replace_all(command_line, "$1 *****").into_owned()
}

/// Render a program and its arguments as one log-friendly command line.
fn display_command(program: &str, args: &[&str]) -> String {
    let mut line = String::from(program);
    for arg in args {
        line.push(' ');
        if arg.contains(char::is_whitespace) {
            line.push('"');
            line.push_str(arg);
            line.push('"');
        } else {
            line.push_str(arg);
        }
    }
    line
}

/// Run an external command to completion and return its stdout.
///
/// The command line is echoed at debug level with sensitive argument values
/// redacted. When `sensitive` is true neither the command nor its output is
/// echoed at any verbosity.
///
/// # Errors
/// Returns [`Error::CommandFailed`] carrying the captured stderr whenever
/// the child exits non-zero or cannot be spawned.
pub async fn execute(program: &str, args: &[&str], sensitive: bool) -> Result<String> {
    execute_inner(program, args, None, None, sensitive).await
}

/// Like [`execute`], but runs the child in `dir` (for tools such as agvtool
/// that operate on the project in the working directory).
pub async fn execute_in(
    dir: &std::path::Path,
    program: &str,
    args: &[&str],
    sensitive: bool,
) -> Result<String> {
    execute_inner(program, args, None, Some(dir), sensitive).await
}

/// Like [`execute`], but feeds `stdin_data` to the child on stdin.
///
/// Used for tools that accept secrets on stdin (Sparkle's `sign_update`
/// with `--ed-key-file -`) so key material never appears in an argv.
pub async fn execute_with_stdin(
    program: &str,
    args: &[&str],
    stdin_data: Option<&str>,
    sensitive: bool,
) -> Result<String> {
    execute_inner(program, args, stdin_data, None, sensitive).await
}

async fn execute_inner(
    program: &str,
    args: &[&str],
    stdin_data: Option<&str>,
    dir: Option<&std::path::Path>,
    sensitive: bool,
) -> Result<String> {
    let presented = redact(&display_command(program, args));

    if !sensitive {
        log::debug!("$ {presented}");
    }

    let mut command = Command::new(program);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    if stdin_data.is_some() {
        command.stdin(Stdio::piped());
    }

    let mut child = command.spawn().map_err(|e| Error::CommandFailed {
        command: presented.clone(),
        stderr: format!("failed to spawn: {e}"),
    })?;

    // Written concurrently with output collection: a child that emits more
    // than a pipe buffer before draining stdin must not deadlock against us.
    let stdin_writer = match (stdin_data, child.stdin.take()) {
        (Some(data), Some(mut stdin)) => {
            let data = data.as_bytes().to_vec();
            Some(tokio::spawn(async move {
                stdin.write_all(&data).await
                // Drop closes the pipe so the child sees EOF.
            }))
        }
        _ => None,
    };

    let output = child.wait_with_output().await?;

    if let Some(writer) = stdin_writer {
        match writer.await {
            Ok(Ok(())) => {}
            // The child exited without draining stdin; its exit status
            // decides the outcome below.
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(e) => {
                return Err(Error::CommandFailed {
                    command: presented,
                    stderr: format!("stdin writer task failed: {e}"),
                });
            }
        }
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !sensitive {
            log::error!("Command failed: {presented}");
        }
        return Err(Error::CommandFailed {
            command: presented,
            stderr,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

    if !sensitive && !stdout.trim().is_empty() {
        log::debug!("{}", stdout.trim_end());
    }

    Ok(stdout)
}
