//! Shared subprocess plumbing for the git, patch-tool, and validation
//! adapters: captured output records, per-operation timeouts, and the
//! cooperative cancellation flag checked at every suspension point.

use std::{
    io::{Read, Write},
    process::{Command, Stdio},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use bstr::ByteSlice;

use crate::errors::PickError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Cooperative cancellation flag shared between the pipeline and its caller.
///
/// Cloning is cheap; all clones observe the same flag. The pipeline checks it
/// before and during every blocking operation and aborts with
/// [`PickError::Cancelled`] once set.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Bail out with [`PickError::Cancelled`] if the flag is set.
    pub fn check(&self) -> Result<(), PickError> {
        if self.is_cancelled() {
            Err(PickError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Captured output of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit status; killed processes are reported as -1.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run a command to completion with a timeout, no stdin, and captured output.
pub fn run_with_timeout(
    command: Command,
    timeout: Duration,
    cancel: &CancelFlag,
) -> Result<CommandOutput, PickError> {
    run_with_input(command, None, timeout, cancel)
}

/// Run a command to completion, optionally feeding `input` to its stdin.
///
/// stdout/stderr are drained on background threads so the child can never
/// stall on a full pipe while we poll for exit. On timeout or cancellation
/// the child is killed and reaped before the error is returned.
pub fn run_with_input(
    mut command: Command,
    input: Option<Vec<u8>>,
    timeout: Duration,
    cancel: &CancelFlag,
) -> Result<CommandOutput, PickError> {
    cancel.check()?;

    let describe = describe_command(&command);
    tracing::debug!("running `{}` (timeout {:?})", describe, timeout);

    command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;

    let stdin_writer = input.and_then(|bytes| {
        child.stdin.take().map(|mut stdin| {
            thread::spawn(move || {
                // A child that exits without reading breaks the pipe; that is
                // not an error for us.
                let _ = stdin.write_all(&bytes);
            })
        })
    });
    let stdout_reader = child.stdout.take().map(spawn_drain);
    let stderr_reader = child.stderr.take().map(spawn_drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            join_drains(stdin_writer, stdout_reader, stderr_reader);
            return Err(PickError::Cancelled);
        }
        if Instant::now() >= deadline {
            tracing::warn!("`{}` exceeded its timeout, killing", describe);
            let _ = child.kill();
            let _ = child.wait();
            join_drains(stdin_writer, stdout_reader, stderr_reader);
            return Err(PickError::Timeout {
                command: describe,
                secs: timeout.as_secs(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    if let Some(writer) = stdin_writer {
        let _ = writer.join();
    }
    let stdout = stdout_reader
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default();
    let stderr = stderr_reader
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default();

    Ok(CommandOutput {
        status: status.code().unwrap_or(-1),
        stdout: stdout.to_str_lossy().into_owned(),
        stderr: stderr.to_str_lossy().into_owned(),
    })
}

fn spawn_drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_drains(
    stdin: Option<thread::JoinHandle<()>>,
    stdout: Option<thread::JoinHandle<Vec<u8>>>,
    stderr: Option<thread::JoinHandle<Vec<u8>>>,
) {
    if let Some(h) = stdin {
        let _ = h.join();
    }
    if let Some(h) = stdout {
        let _ = h.join();
    }
    if let Some(h) = stderr {
        let _ = h.join();
    }
}

fn describe_command(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(
        command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned()),
    );
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let out = run_with_timeout(cmd, Duration::from_secs(5), &CancelFlag::new()).unwrap();
        assert_eq!(out.status, 3);
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert!(!out.success());
    }

    #[test]
    fn feeds_stdin() {
        let out = run_with_input(
            Command::new("cat"),
            Some(b"hello".to_vec()),
            Duration::from_secs(5),
            &CancelFlag::new(),
        )
        .unwrap();
        assert_eq!(out.stdout, "hello");
    }

    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let err = run_with_timeout(cmd, Duration::from_millis(80), &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, PickError::Timeout { .. }));
    }

    #[test]
    fn refuses_to_start_when_cancelled() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = run_with_timeout(Command::new("true"), Duration::from_secs(1), &cancel)
            .unwrap_err();
        assert!(matches!(err, PickError::Cancelled));
    }
}
