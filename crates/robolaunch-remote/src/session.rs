//! Remote session boundary
//!
//! [`RemoteSession`] is the seam between supervision logic and the transport
//! that actually reaches the device. The production implementation is
//! [`SshSession`](crate::SshSession); tests use
//! [`MockSession`](crate::test_utils::MockSession).

use std::fmt;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::time::Instant;

use robolaunch_core::prelude::*;

/// Writable side of a remote process (its stdin)
pub type InputStream = Box<dyn AsyncWrite + Send + Unpin>;

/// Resolves once the remote process exits.
///
/// Yields the exit code, or `None` when the remote side vanished without one
/// (killed by a signal, connection dropped).
pub type ExitFuture = BoxFuture<'static, Option<i32>>;

type BoxedBufRead = Box<dyn AsyncBufRead + Send + Unpin>;

/// Captured result of a command run to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, code: Option<i32>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            code,
        }
    }

    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(stdout, "", Some(0))
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Verbatim substring match against stdout
    pub fn stdout_contains(&self, marker: &str) -> bool {
        self.stdout.contains(marker)
    }
}

/// Bound on how long a reader may wait for a line.
///
/// `max_lines` counts completed reads; `deadline` caps the total wall-clock
/// time across all of them. Both apply when both are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBound {
    pub max_lines: usize,
    pub deadline: Option<Duration>,
}

impl ReadBound {
    pub fn lines(max_lines: usize) -> Self {
        Self {
            max_lines,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Absolute instant at which the deadline expires, measured from now.
    ///
    /// A deadline too far out to represent is treated as no deadline.
    pub fn expires_at(&self) -> Option<Instant> {
        self.deadline.and_then(|d| Instant::now().checked_add(d))
    }
}

/// Outcome of a single bounded read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    Line(String),
    Eof,
    DeadlineElapsed,
}

/// Line-oriented output stream of a remote process.
///
/// Not `Clone`: exactly one task owns the stream at a time, and handing it to
/// another task is a move. Buffered but unread bytes travel with it.
///
/// Lines are decoded lossily: bytes that are not valid UTF-8 become U+FFFD
/// and never end the stream.
pub struct OutputStream {
    reader: BoxedBufRead,
    // Bytes of a line whose terminator has not arrived yet
    pending: Vec<u8>,
    lines_read: usize,
}

impl OutputStream {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(BufReader::new(reader)),
            pending: Vec::new(),
            lines_read: 0,
        }
    }

    /// An already-closed stream
    pub fn empty() -> Self {
        Self::new(tokio::io::empty())
    }

    /// Read the next line, without its terminator.
    ///
    /// Cancel safe: if the future is dropped before completion no line is lost.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.pending).await?;
        if read == 0 && self.pending.is_empty() {
            return Ok(None);
        }

        let mut bytes = std::mem::take(&mut self.pending);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
        }

        self.lines_read += 1;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Read the next line, giving up at `deadline`.
    pub async fn next_line_before(&mut self, deadline: Option<Instant>) -> Result<LineRead> {
        let line = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, self.next_line()).await {
                Ok(line) => line?,
                Err(_) => return Ok(LineRead::DeadlineElapsed),
            },
            None => self.next_line().await?,
        };

        Ok(match line {
            Some(line) => LineRead::Line(line),
            None => LineRead::Eof,
        })
    }

    /// Number of complete lines handed out so far
    pub fn lines_read(&self) -> usize {
        self.lines_read
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream")
            .field("lines_read", &self.lines_read)
            .finish()
    }
}

/// Live handle to one remote invocation.
///
/// Owned by whoever launched it. The fields are public so the owner can move
/// each part to the task responsible for it.
pub struct ProcessHandle {
    pub input: InputStream,
    pub output: OutputStream,
    pub errors: OutputStream,
    pub exit: ExitFuture,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("output", &self.output)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

/// Execute commands on a remote target.
///
/// Implementations decide how commands reach the device; callers only see
/// captured output, live streams and a reachability answer.
#[trait_variant::make(RemoteSession: Send)]
pub trait LocalRemoteSession {
    /// Run a command to completion and capture its output.
    ///
    /// A non-zero exit status is not an error; inspect [`CommandOutput::code`].
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Start a command without waiting for it to finish.
    ///
    /// Returns as soon as the command is accepted and its streams are open.
    async fn spawn(&self, command: &str) -> Result<ProcessHandle>;

    /// Can the target be reached on `port` within `timeout`?
    async fn is_reachable(&self, port: u16, timeout: Duration) -> bool;
}
