//! Child process execution with line-streamed output and a timeout.
//!
//! stdout and stderr are each read on their own thread and pushed into one
//! channel as tagged [`OutputLine`] events. The calling thread drains the
//! channel, hands every line to the consumer as it arrives, and watches the
//! deadline.

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::error::DeployError;

/// How long to block on the output channel before re-checking the deadline
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to keep draining output after the child exits with pipes still open
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// One line of child output, tagged with the stream it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

impl OutputLine {
    pub fn text(&self) -> &str {
        match self {
            OutputLine::Stdout(line) | OutputLine::Stderr(line) => line,
        }
    }

    pub fn is_stderr(&self) -> bool {
        matches!(self, OutputLine::Stderr(_))
    }
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exited on its own with this code
    Exited(i32),
    /// Terminated by a signal it did not handle
    Signaled,
    /// Killed after running past its timeout
    TimedOut(Duration),
}

/// Outcome of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: ExitStatus,
    /// At least one line arrived on stderr
    pub saw_error_stream: bool,
}

impl ExecutionResult {
    #[inline]
    pub fn success(&self) -> bool {
        self.status == ExitStatus::Exited(0)
    }

    #[inline]
    pub fn timed_out(&self) -> bool {
        matches!(self.status, ExitStatus::TimedOut(_))
    }

    /// Exit code, if the process exited on its own
    pub fn code(&self) -> Option<i32> {
        match self.status {
            ExitStatus::Exited(code) => Some(code),
            ExitStatus::Signaled | ExitStatus::TimedOut(_) => None,
        }
    }
}

/// Runs a [`CommandSpec`] and streams its output.
///
/// A non-zero exit is a normal result; only failing to start or wait on the
/// process is an error.
pub trait CommandRunner {
    fn run(
        &mut self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(OutputLine),
    ) -> Result<ExecutionResult, DeployError>;
}

/// [`CommandRunner`] backed by real child processes.
///
/// The child inherits this process's environment and stdin, so ssh can use
/// the local agent and prompt for host keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(
        &mut self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(OutputLine),
    ) -> Result<ExecutionResult, DeployError> {
        debug!(command = %spec, timeout = ?spec.timeout_duration(), "spawning");

        let mut child = Command::new(spec.program())
            .args(spec.arguments())
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DeployError::Spawn {
                program: spec.program().to_string(),
                source,
            })?;

        let wait_error = |source| DeployError::Wait {
            program: spec.program().to_string(),
            source,
        };

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, tx.clone(), OutputLine::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, tx.clone(), OutputLine::Stderr));
        }
        // Channel disconnects once both readers hit EOF
        drop(tx);

        let deadline = spec
            .timeout_duration()
            .map(|limit| (limit, Instant::now() + limit));
        let mut saw_error_stream = false;
        let mut streams_open = true;

        // Set once the direct child has been reaped
        let mut exited: Option<(ExitStatus, Instant)> = None;

        let status = loop {
            if streams_open {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(line) => {
                        saw_error_stream |= line.is_stderr();
                        on_line(line);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => streams_open = false,
                }
            }

            if exited.is_none() {
                if let Some(status) = child.try_wait().map_err(wait_error)? {
                    let status = match status.code() {
                        Some(code) => ExitStatus::Exited(code),
                        None => ExitStatus::Signaled,
                    };
                    exited = Some((status, Instant::now()));
                }
            }

            // A background grandchild may keep the pipes open past the exit
            if let Some((status, at)) = exited {
                if !streams_open || at.elapsed() >= DRAIN_GRACE {
                    break status;
                }
                continue;
            }

            if let Some((limit, at)) = deadline {
                if Instant::now() >= at {
                    warn!(command = %spec, "timed out after {}s, killing", limit.as_secs_f64());
                    if let Err(e) = child.kill() {
                        // Already exited between the check and the kill
                        debug!("kill failed: {e}");
                    }
                    child.wait().map_err(wait_error)?;
                    break ExitStatus::TimedOut(limit);
                }
            }

            if !streams_open {
                thread::sleep(POLL_INTERVAL);
            }
        };

        // Lines already read; readers still blocked on a pipe held open by a
        // grandchild are detached rather than joined.
        for line in rx.try_iter() {
            saw_error_stream |= line.is_stderr();
            on_line(line);
        }
        if !streams_open {
            for reader in readers {
                let _ = reader.join();
            }
        }

        debug!(command = %spec, ?status, "finished");
        Ok(ExecutionResult {
            status,
            saw_error_stream,
        })
    }
}

fn spawn_reader<R>(stream: R, tx: Sender<OutputLine>, tag: fn(String) -> OutputLine) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(tag(decode_line(&buf))).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    })
}

/// Strip the line terminator and decode, replacing invalid UTF-8
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
