//! Test utilities for remote sessions
//!
//! Provides [`MockSession`], a scripted [`RemoteSession`] that records every
//! call in order, and helpers for building fake worker processes.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;

use robolaunch_core::prelude::*;

use crate::session::{CommandOutput, OutputStream, ProcessHandle, RemoteSession};

/// Capacity of the in-memory pipes behind [`live_process`]
const PIPE_CAPACITY: usize = 64 * 1024;

/// One recorded interaction with a [`MockSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Run(String),
    Spawn(String),
    Probe(u16),
}

impl SessionCall {
    pub fn command(&self) -> Option<&str> {
        match self {
            SessionCall::Run(c) | SessionCall::Spawn(c) => Some(c),
            SessionCall::Probe(_) => None,
        }
    }
}

/// Scripted responses for commands containing `pattern`.
///
/// Responses are consumed front to back; the last one repeats forever.
struct Script {
    pattern: String,
    responses: VecDeque<CommandOutput>,
}

/// In-memory [`RemoteSession`] for tests.
///
/// - `run` answers from scripts registered with [`respond`](Self::respond),
///   matched by substring in registration order; unmatched commands succeed
///   with empty output.
/// - `spawn` hands out processes queued with [`push_process`](Self::push_process).
/// - `is_reachable` returns answers queued with
///   [`answer_probes`](Self::answer_probes), then the value set by
///   [`set_reachable`](Self::set_reachable).
#[derive(Clone)]
pub struct MockSession {
    inner: Arc<MockInner>,
}

struct MockInner {
    calls: Mutex<Vec<SessionCall>>,
    scripts: Mutex<Vec<Script>>,
    processes: Mutex<VecDeque<ProcessHandle>>,
    probe_answers: Mutex<VecDeque<bool>>,
    reachable: AtomicBool,
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockInner {
                calls: Mutex::new(Vec::new()),
                scripts: Mutex::new(Vec::new()),
                processes: Mutex::new(VecDeque::new()),
                probe_answers: Mutex::new(VecDeque::new()),
                reachable: AtomicBool::new(true),
            }),
        }
    }

    /// Answer commands containing `pattern` with `output`.
    ///
    /// Calling this again with the same pattern queues a follow-up response.
    pub fn respond(&self, pattern: &str, output: CommandOutput) -> &Self {
        let mut scripts = self.inner.scripts.lock().unwrap();
        match scripts.iter_mut().find(|s| s.pattern == pattern) {
            Some(script) => script.responses.push_back(output),
            None => scripts.push(Script {
                pattern: pattern.to_string(),
                responses: VecDeque::from([output]),
            }),
        }
        self
    }

    /// Queue a process for the next `spawn`
    pub fn push_process(&self, process: ProcessHandle) -> &Self {
        self.inner.processes.lock().unwrap().push_back(process);
        self
    }

    pub fn set_reachable(&self, reachable: bool) -> &Self {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
        self
    }

    /// Answer the next probes in order before falling back to `set_reachable`
    pub fn answer_probes(&self, answers: &[bool]) -> &Self {
        self.inner
            .probe_answers
            .lock()
            .unwrap()
            .extend(answers.iter().copied());
        self
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<SessionCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// Commands (run or spawned) in order
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.command().map(str::to_string))
            .collect()
    }

    /// Number of recorded commands containing `pattern`
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(pattern)).count()
    }

    /// Index of the first recorded command containing `pattern`
    pub fn position_of(&self, pattern: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(pattern))
    }

    fn record(&self, call: SessionCall) {
        self.inner.calls.lock().unwrap().push(call);
    }

    fn scripted_output(&self, command: &str) -> CommandOutput {
        let mut scripts = self.inner.scripts.lock().unwrap();
        match scripts.iter_mut().find(|s| command.contains(&s.pattern)) {
            Some(script) if script.responses.len() > 1 => {
                script.responses.pop_front().unwrap_or_default()
            }
            Some(script) => script.responses.front().cloned().unwrap_or_default(),
            None => CommandOutput::ok(""),
        }
    }
}

impl RemoteSession for MockSession {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.record(SessionCall::Run(command.to_string()));
        Ok(self.scripted_output(command))
    }

    async fn spawn(&self, command: &str) -> Result<ProcessHandle> {
        self.record(SessionCall::Spawn(command.to_string()));
        self.inner
            .processes
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::remote("no scripted process queued"))
    }

    async fn is_reachable(&self, port: u16, _timeout: Duration) -> bool {
        self.record(SessionCall::Probe(port));
        let queued = self.inner.probe_answers.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.inner.reachable.load(Ordering::SeqCst))
    }
}

/// Test-side controls of a fake worker process
pub struct MockWorker {
    stdout: Option<DuplexStream>,
    exit_tx: Option<oneshot::Sender<Option<i32>>>,
    /// Reading side of the worker's stdin
    pub stdin: DuplexStream,
}

impl MockWorker {
    /// Write one line to the worker's output.
    ///
    /// Returns `false` once nobody reads the output any more.
    pub async fn emit(&mut self, line: &str) -> bool {
        let Some(stdout) = self.stdout.as_mut() else {
            return false;
        };
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        stdout.write_all(&bytes).await.is_ok()
    }

    /// Close the worker's output (EOF for the reader)
    pub fn close_output(&mut self) {
        self.stdout = None;
    }

    /// Resolve the exit future with `code`
    pub fn exit(&mut self, code: Option<i32>) {
        if let Some(tx) = self.exit_tx.take() {
            let _ = tx.send(code);
        }
    }
}

fn exit_channel() -> (oneshot::Sender<Option<i32>>, crate::session::ExitFuture) {
    let (tx, rx) = oneshot::channel();
    // A dropped sender reads as a vanished remote side
    let exit = async move { rx.await.ok().flatten() }.boxed();
    (tx, exit)
}

/// A worker whose output is written live through [`MockWorker::emit`]
pub fn live_process() -> (ProcessHandle, MockWorker) {
    let (stdout_writer, stdout_reader) = tokio::io::duplex(PIPE_CAPACITY);
    let (stdin_writer, stdin_reader) = tokio::io::duplex(PIPE_CAPACITY);
    let (exit_tx, exit) = exit_channel();

    let handle = ProcessHandle {
        input: Box::new(stdin_writer),
        output: OutputStream::new(stdout_reader),
        errors: OutputStream::empty(),
        exit,
    };
    let worker = MockWorker {
        stdout: Some(stdout_writer),
        exit_tx: Some(exit_tx),
        stdin: stdin_reader,
    };
    (handle, worker)
}

/// A worker whose whole output is known up front; the stream ends after `lines`.
pub fn scripted_process(lines: &[&str]) -> (ProcessHandle, MockWorker) {
    let mut text = String::new();
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }

    let (stdin_writer, stdin_reader) = tokio::io::duplex(PIPE_CAPACITY);
    let (exit_tx, exit) = exit_channel();

    let handle = ProcessHandle {
        input: Box::new(stdin_writer),
        output: OutputStream::new(Cursor::new(text.into_bytes())),
        errors: OutputStream::empty(),
        exit,
    };
    let worker = MockWorker {
        stdout: None,
        exit_tx: Some(exit_tx),
        stdin: stdin_reader,
    };
    (handle, worker)
}
