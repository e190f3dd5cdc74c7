//! Child process with line-streamed stdout and stderr.
//!
//! [`ProcessStream::spawn`] starts a command and hands back two line
//! receivers plus a one-shot completion signal. Each output stream is read
//! by its own task and forwarded through a channel of capacity one, so a
//! slow consumer applies backpressure all the way to the child's pipes.
//!
//! Completion fires once the child has been reaped and says nothing about
//! the line receivers: callers must keep reading both until they close to
//! observe all output. Callers that need a deadline must wrap the whole
//! invocation themselves; there is no cancellation here.

use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Which output stream of the child a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// Failures of a streamed child process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The command could not be started.
    #[error("error starting the {program} command")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// An output pipe could not be attached.
    #[error("error creating {stream} pipe for {program}")]
    Pipe { program: String, stream: StreamKind },

    /// The command ran and exited unsuccessfully.
    #[error("{program} failed with {status}")]
    Exit { program: String, status: ExitStatus },

    /// Waiting for the command failed.
    #[error("error waiting for {program}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The completion signal was dropped without a result.
    #[error("lost track of the {program} command")]
    Abandoned { program: String },
}

impl ProcessError {
    /// Exit code of the child, when it exited on its own.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessError::Exit { status, .. } => status.code(),
            _ => None,
        }
    }
}

/// Handle to a running child process.
#[derive(Debug)]
pub struct ProcessStream {
    /// Lines written to stdout, without the trailing newline.
    pub stdout: mpsc::Receiver<String>,

    /// Lines written to stderr, without the trailing newline.
    pub stderr: mpsc::Receiver<String>,

    /// Fires once with the outcome of the child.
    pub completion: oneshot::Receiver<Result<(), ProcessError>>,
}

impl ProcessStream {
    /// Start `program` with `args`, resolving `program` through `PATH`.
    ///
    /// Must be called from within a Tokio runtime. Spawn and pipe failures
    /// are delivered through `completion`; the line receivers are then
    /// already closed.
    pub fn spawn(program: &str, args: &[String]) -> Self {
        let (stdout_tx, stdout) = mpsc::channel(1);
        let (stderr_tx, stderr) = mpsc::channel(1);
        let (done_tx, completion) = oneshot::channel();
        let stream = Self {
            stdout,
            stderr,
            completion,
        };

        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                let _ = done_tx.send(Err(ProcessError::Spawn {
                    program: program.to_string(),
                    source,
                }));
                return stream;
            }
        };

        let pipes = (child.stdout.take(), child.stderr.take());
        let (out, err) = match pipes {
            (Some(out), Some(err)) => (out, err),
            (out, _) => {
                let stream_kind = if out.is_none() {
                    StreamKind::Stdout
                } else {
                    StreamKind::Stderr
                };
                let _ = child.start_kill();
                // Reap the child so it does not linger as a zombie.
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
                let _ = done_tx.send(Err(ProcessError::Pipe {
                    program: program.to_string(),
                    stream: stream_kind,
                }));
                return stream;
            }
        };

        debug!(program = %program, pid = ?child.id(), "Started process");

        forward_lines(out, stdout_tx, StreamKind::Stdout);
        forward_lines(err, stderr_tx, StreamKind::Stderr);

        let program = program.to_string();
        tokio::spawn(async move {
            let result = match child.wait().await {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(ProcessError::Exit {
                    program: program.clone(),
                    status,
                }),
                Err(source) => Err(ProcessError::Wait {
                    program: program.clone(),
                    source,
                }),
            };
            debug!(program = %program, ok = result.is_ok(), "Process exited");
            let _ = done_tx.send(result);
        });

        stream
    }
}

/// Read newline-delimited units from `reader` and send each one to `tx`.
///
/// Stops at end of file, on a read error, or once the receiver is gone.
fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>, kind: StreamKind)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                    }
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(stream = %kind, error = %err, "Failed reading process output");
                    break;
                }
            }
        }
    });
}
