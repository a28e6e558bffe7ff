//! Streaming execution: live stdout chunks from a running child.
//!
//! A driver task owns the child process. It relays stdout chunks into an
//! ordered channel, drains stderr into a buffer on a separate task, and on
//! exit either closes the channel (zero status) or sends exactly one
//! [`ExecutionError`].
//!
//! The [`OutputStream`] handle is the cancellation scope: dropping it, or
//! calling [`OutputStream::cancel`], kills and reaps the child. Timeouts are
//! enforced by the driver too, so a child that already exited keeps its
//! result however slowly the consumer reads.

use crate::error::{ExecutionError, Result};
use crate::process::{exit_code, read_pipe};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const CHUNK_SIZE: usize = 8192;
const CHANNEL_CAPACITY: usize = 64;

/// One chunk of stdout text.
///
/// Chunks follow read boundaries, not line boundaries; use [`LineSplitter`]
/// or [`OutputStream::lines`] when whole lines are needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine(String);

impl OutputLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decodes UTF-8 across chunk boundaries.
///
/// A multi-byte sequence cut by a read boundary is held back until the next
/// chunk completes it. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        // Incomplete sequence at the end: wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        (!out.is_empty()).then_some(out)
    }

    /// Flush whatever is still held back
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

/// Reassembles whole lines from arbitrary chunks
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: String,
}

impl LineSplitter {
    /// Feed a chunk, returning every line it completed (without `\n` / `\r\n`)
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);
        let mut lines = Vec::new();

        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }

        lines
    }

    /// The trailing line with no terminating newline, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }
}

/// Live stdout of a running brew command.
///
/// Yields `Ok(OutputLine)` chunks in the order the child wrote them, then
/// either ends (zero exit) or yields exactly one `Err` and ends.
pub struct OutputStream {
    rx: mpsc::Receiver<Result<OutputLine>>,
    cancel: Option<oneshot::Sender<()>>,
    deadline: Option<oneshot::Sender<Duration>>,
    interrupted: Option<ExecutionError>,
    pid: Option<u32>,
    finished: bool,
}

impl OutputStream {
    /// Hand the child to a driver task
    pub(crate) fn spawn(child: Child) -> Self {
        let pid = child.id();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (deadline_tx, deadline_rx) = oneshot::channel();

        tokio::spawn(drive(child, tx, StopSignal::new(cancel_rx, deadline_rx)));

        Self {
            rx,
            cancel: Some(cancel_tx),
            deadline: Some(deadline_tx),
            interrupted: None,
            pid,
            finished: false,
        }
    }

    /// A stream that terminates immediately with `err`
    pub(crate) fn failed(err: ExecutionError) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity is 1 and the channel is fresh, so this cannot fail
        let _ = tx.try_send(Err(err));

        Self {
            rx,
            cancel: None,
            deadline: None,
            interrupted: None,
            pid: None,
            finished: false,
        }
    }

    /// OS process id of the child, `None` if it never launched
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Terminate with [`ExecutionError::Timeout`] if the child is still
    /// running after `timeout`.
    ///
    /// Output the child wrote before the deadline is still delivered, and a
    /// child that exited in time ends normally even if it is read later.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let Some(deadline) = self.deadline.take() {
            let _ = deadline.send(timeout);
        }
        self
    }

    /// Kill the child. The next item is [`ExecutionError::Cancelled`].
    pub fn cancel(&mut self) {
        if self.finished || self.interrupted.is_some() {
            return;
        }
        self.terminate();
        self.interrupted = Some(ExecutionError::Cancelled);
    }

    fn terminate(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Consume every chunk and return the terminal state
    pub async fn finish(mut self) -> Result<()> {
        while let Some(item) = self.next().await {
            item?;
        }
        Ok(())
    }

    /// Concatenate every chunk
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(item) = self.next().await {
            text.push_str(item?.as_str());
        }
        Ok(text)
    }

    /// Re-chunk the output into whole lines
    pub fn lines(self) -> Lines<Self> {
        Lines::new(self)
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream")
            .field("pid", &self.pid)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Stream for OutputStream {
    type Item = Result<OutputLine>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if let Some(err) = this.interrupted.take() {
            this.finished = true;
            return Poll::Ready(Some(Err(err)));
        }
        if this.finished {
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(line))) => Poll::Ready(Some(Ok(line))),
            Poll::Ready(Some(Err(err))) => {
                this.finished = true;
                this.cancel = None;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                this.cancel = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Whole-line view over a chunk stream
#[derive(Debug)]
pub struct Lines<S> {
    inner: S,
    splitter: LineSplitter,
    ready: VecDeque<String>,
    error: Option<ExecutionError>,
    done: bool,
}

impl<S> Lines<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            splitter: LineSplitter::default(),
            ready: VecDeque::new(),
            error: None,
            done: false,
        }
    }

    /// The underlying chunk stream, e.g. to cancel it
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S> Stream for Lines<S>
where
    S: Stream<Item = Result<OutputLine>> + Unpin,
{
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if let Some(line) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }
            if let Some(err) = this.error.take() {
                this.done = true;
                return Poll::Ready(Some(Err(err)));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.ready.extend(this.splitter.push(chunk.as_str()));
                }
                Poll::Ready(Some(Err(err))) => {
                    this.ready.extend(this.splitter.finish());
                    this.error = Some(err);
                }
                Poll::Ready(None) => {
                    this.ready.extend(this.splitter.finish());
                    this.done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Why the driver gave up on the child before it exited by itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    /// `cancel()` was called or the stream was dropped
    Cancelled,
    TimedOut,
    /// Reading stdout failed; the error has already been sent
    Failed,
}

/// Cancellation and deadline, as seen by the driver
struct StopSignal {
    cancel: oneshot::Receiver<()>,
    expiry: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl StopSignal {
    /// The deadline stays disarmed until [`OutputStream::with_timeout`] sets it
    fn new(cancel: oneshot::Receiver<()>, deadline: oneshot::Receiver<Duration>) -> Self {
        Self {
            cancel,
            expiry: Box::pin(async move {
                match deadline.await {
                    Ok(timeout) => tokio::time::sleep(timeout).await,
                    Err(_) => std::future::pending().await,
                }
            }),
        }
    }

    /// Resolves when the consumer cancels or the deadline elapses. Safe to
    /// drop and call again until it has resolved.
    async fn fired(&mut self) -> Halt {
        tokio::select! {
            // A dropped sender counts as cancellation
            _ = &mut self.cancel => Halt::Cancelled,
            () = &mut self.expiry => Halt::TimedOut,
        }
    }

    /// Turn an elapsed deadline into a reason to stop, unless the child has
    /// already exited: then the deadline no longer applies and is disarmed.
    fn should_stop(&mut self, halt: Halt, child: &mut Child) -> bool {
        if halt == Halt::TimedOut && matches!(child.try_wait(), Ok(Some(_))) {
            tracing::debug!(pid = ?child.id(), "deadline elapsed after exit, ignoring");
            self.expiry = Box::pin(std::future::pending());
            return false;
        }
        true
    }
}

async fn drive(mut child: Child, tx: mpsc::Sender<Result<OutputLine>>, mut stop: StopSignal) {
    let pid = child.id();
    // stderr is drained for the child's whole lifetime so a chatty process
    // never blocks on it while stdout is being relayed
    let child_stderr = child.stderr.take();
    let stderr = tokio::spawn(async move {
        read_pipe(child_stderr, "stderr").await.unwrap_or_default()
    });

    let Some(stdout) = child.stdout.take() else {
        let _ = tx
            .send(Err(ExecutionError::decode("stdout was not captured")))
            .await;
        return abort(&mut child, pid, stderr).await;
    };

    if let ControlFlow::Break(halt) = relay_stdout(stdout, &tx, &mut stop, &mut child).await {
        return stop_early(&mut child, pid, stderr, &tx, halt).await;
    }

    // An exit that is already known wins over a deadline elapsing at the
    // same moment
    let status = tokio::select! {
        biased;
        status = child.wait() => status,
        halt = stop.fired() => return stop_early(&mut child, pid, stderr, &tx, halt).await,
    };
    let stderr = stderr.await.unwrap_or_default();

    let err = match status {
        Ok(status) if status.success() => {
            tracing::debug!(?pid, "stream finished");
            return;
        }
        Ok(status) => ExecutionError::NonZeroExit {
            code: exit_code(status),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        },
        Err(err) => ExecutionError::decode(format!("waiting for process: {err}")),
    };
    tracing::debug!(?pid, %err, "stream failed");
    let _ = tx.send(Err(err)).await;
}

/// Forward stdout until end-of-stream
async fn relay_stdout(
    mut stdout: ChildStdout,
    tx: &mpsc::Sender<Result<OutputLine>>,
    stop: &mut StopSignal,
    child: &mut Child,
) -> ControlFlow<Halt> {
    let mut decoder = Utf8Chunker::default();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let read = tokio::select! {
            biased;
            halt = stop.fired() => {
                if stop.should_stop(halt, child) {
                    return ControlFlow::Break(halt);
                }
                continue;
            }
            read = stdout.read(&mut buf) => read,
        };

        let text = match read {
            Ok(0) => break,
            Ok(n) => decoder.push(&buf[..n]),
            Err(err) => {
                let _ = tx
                    .send(Err(ExecutionError::decode(format!("reading stdout: {err}"))))
                    .await;
                return ControlFlow::Break(Halt::Failed);
            }
        };

        if let Some(text) = text {
            forward(tx, stop, child, text).await?;
        }
    }

    match decoder.finish() {
        Some(text) => forward(tx, stop, child, text).await,
        None => ControlFlow::Continue(()),
    }
}

/// Send one chunk, waiting for channel capacity
async fn forward(
    tx: &mpsc::Sender<Result<OutputLine>>,
    stop: &mut StopSignal,
    child: &mut Child,
    text: String,
) -> ControlFlow<Halt> {
    let send = tx.send(Ok(OutputLine::new(text)));
    tokio::pin!(send);

    loop {
        tokio::select! {
            biased;
            halt = stop.fired() => {
                if stop.should_stop(halt, child) {
                    return ControlFlow::Break(halt);
                }
            }
            sent = &mut send => {
                return match sent {
                    Ok(()) => ControlFlow::Continue(()),
                    // Receiver gone: the stream was dropped
                    Err(_) => ControlFlow::Break(Halt::Cancelled),
                };
            }
        }
    }
}

async fn stop_early(
    child: &mut Child,
    pid: Option<u32>,
    stderr: JoinHandle<Vec<u8>>,
    tx: &mpsc::Sender<Result<OutputLine>>,
    halt: Halt,
) {
    abort(child, pid, stderr).await;
    if halt == Halt::TimedOut {
        tracing::warn!(?pid, "stream timed out");
        let _ = tx.send(Err(ExecutionError::Timeout)).await;
    }
}

/// Kill and reap the child so nothing outlives the stream
async fn abort(child: &mut Child, pid: Option<u32>, stderr: JoinHandle<Vec<u8>>) {
    match child.kill().await {
        Ok(()) => tracing::debug!(?pid, "terminated child process"),
        Err(err) => tracing::debug!(?pid, %err, "child already exited"),
    }
    stderr.abort();
}
