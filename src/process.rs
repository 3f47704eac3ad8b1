//! External command execution.
//!
//! Every call into the partition-mapping tool, `mount`, `losetup` and
//! `exportfs` goes through [`run`], which bounds the call with a timeout so a
//! hung tool cannot wedge a request forever.

use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Default bound on a single external command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Interval between exit checks while a command runs.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Render a command line for logs and error messages.
pub fn describe(command: &Command) -> String {
    let mut line = command.get_program().to_string_lossy().into_owned();
    for arg in command.get_args() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

/// Run a command to completion, capturing stdout and stderr.
///
/// The child is killed and reaped if it has not exited within `timeout`.
/// A non-zero exit status is *not* an error here; callers inspect
/// `Output::status` and decide.
pub fn run(command: &mut Command, timeout: Duration) -> Result<Output> {
    let line = describe(command);
    tracing::debug!(command = %line, "running external command");

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::storage(format!("spawn `{}`", line), e))?;

    // Drain pipes on their own threads so a chatty child cannot block on a full pipe.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }

        if start.elapsed() >= timeout {
            tracing::warn!(command = %line, timeout = ?timeout, "command timed out, killing");
            if let Err(e) = child.kill() {
                tracing::debug!(command = %line, error = %e, "kill after timeout failed");
            }
            // Reap so the child does not linger as a zombie.
            let _ = child.wait();
            return Err(Error::CommandTimeout {
                command: line,
                timeout,
            });
        }

        std::thread::sleep(POLL_INTERVAL);
    };

    Ok(Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Trimmed stderr of a finished command, falling back to the exit status.
pub fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = run(&mut cmd, Duration::from_secs(10)).unwrap();

        assert_eq!(output.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&output.stdout), "out\n");
        assert_eq!(failure_message(&output), "err");
    }

    #[test]
    fn test_run_kills_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let start = Instant::now();
        let err = run(&mut cmd, Duration::from_millis(200)).unwrap_err();

        assert!(matches!(err, Error::CommandTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_describe() {
        let mut cmd = Command::new("kpartx");
        cmd.args(["-d", "/images/a.img"]);
        assert_eq!(describe(&cmd), "kpartx -d /images/a.img");
    }
}
