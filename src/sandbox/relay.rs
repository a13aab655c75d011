//! Stream multiplexer
//!
//! Turns an [`ExecutionSession`] into a lazy, finite stream of [`Chunk`]s.
//!
//! stdout lines are yielded the moment they are read. stderr is drained by a
//! separate task from the start so a chatty stderr can never stall the child,
//! but its lines are only yielded once stdout has closed: all stdout chunks
//! precede all stderr chunks, whatever the real interleaving was.

use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::sandbox::session::{ExecutionSession, SessionState};

/// How long captured stderr may keep trickling in after the child was killed
const KILL_GRACE: Duration = Duration::from_millis(200);

/// One unit of relayed output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// A line from stdout, trailing newline included
    Stdout(String),
    /// A line from stderr, trailing newline included
    Stderr(String),
    /// A line written by the service itself
    Notice(Notice),
    /// The child was reaped. Always the last chunk; not part of the HTTP body.
    Exit {
        exit_code: Option<i32>,
        signal: Option<i32>,
    },
}

impl Chunk {
    /// Text this chunk contributes to the response body
    pub fn into_body_text(self) -> Option<String> {
        match self {
            Chunk::Stdout(line) | Chunk::Stderr(line) => Some(line),
            Chunk::Notice(notice) => Some(notice.to_string()),
            Chunk::Exit { .. } => None,
        }
    }
}

/// Service-generated messages appended after the program's own output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    TimedOut(Duration),
    Truncated(usize),
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::TimedOut(after) => {
                writeln!(f, "Execution timed out after {}", humantime::format_duration(*after))
            }
            Notice::Truncated(limit) => writeln!(f, "[output truncated after {} bytes]", limit),
        }
    }
}

/// Byte allowance shared by both streams of one session
struct OutputBudget {
    limit: usize,
    used: usize,
}

impl OutputBudget {
    fn new(limit: usize) -> Self {
        OutputBudget { limit, used: 0 }
    }

    /// Largest single read worth attempting: one byte past what still fits,
    /// so an endless line trips the limit instead of growing unbounded
    fn read_cap(&self, pending: usize) -> u64 {
        let room = self.limit.saturating_sub(self.used).saturating_sub(pending);
        room.saturating_add(1) as u64
    }

    fn admit(&mut self, len: usize) -> bool {
        match self.used.checked_add(len) {
            Some(total) if total <= self.limit => {
                self.used = total;
                true
            }
            _ => false,
        }
    }
}

enum StdoutStep {
    Read(Result<std::io::Result<usize>, tokio::time::error::Elapsed>),
    StderrOverflow(bool),
}

fn decode(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

/// Read `pipe` line by line into `tx` until EOF or until more than `limit`
/// bytes were captured, in which case `overflow` fires and the pipe is closed.
/// A line longer than the remaining allowance is never buffered in full.
async fn capture_lines<R>(
    pipe: R,
    tx: mpsc::UnboundedSender<String>,
    limit: usize,
    overflow: oneshot::Sender<()>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut captured = 0usize;

    loop {
        buf.clear();
        let cap = limit.saturating_sub(captured).saturating_add(1) as u64;
        match (&mut reader).take(cap).read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                captured = captured.saturating_add(n);
                if captured > limit {
                    let _ = overflow.send(());
                    return;
                }
                if tx.send(decode(&buf)).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("stderr read failed: {}", e);
                break;
            }
        }
    }
}

/// Relay a session's output as it is produced.
///
/// The child is reaped before the stream ends; an [`Chunk::Exit`] is the final
/// item. Dropping the stream early kills and reaps the child in the background.
pub fn relay(mut session: ExecutionSession) -> impl Stream<Item = Chunk> + Send + 'static {
    async_stream::stream! {
        let id = session.id();
        let limits = session.limits();
        let mut deadline = session.deadline();
        let mut budget = OutputBudget::new(limits.max_output_bytes);
        let mut cut_short = false;

        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        let (overflow_tx, mut overflow_rx) = oneshot::channel();
        let capture = session
            .take_stderr()
            .map(|stderr| tokio::spawn(capture_lines(stderr, err_tx, limits.max_output_bytes, overflow_tx)));
        let mut overflow_armed = capture.is_some();

        session.advance(SessionState::DrainingStdout);
        if let Some(stdout) = session.take_stdout() {
            let mut reader = BufReader::new(stdout);
            // Partial reads stay in `buf` if the select below drops a read
            let mut buf = Vec::new();

            loop {
                let mut limited = (&mut reader).take(budget.read_cap(buf.len()));
                let step = tokio::select! {
                    read = tokio::time::timeout_at(deadline, limited.read_until(b'\n', &mut buf)) => {
                        StdoutStep::Read(read)
                    }
                    signal = &mut overflow_rx, if overflow_armed => StdoutStep::StderrOverflow(signal.is_ok()),
                };

                match step {
                    StdoutStep::Read(Ok(Ok(0))) => {
                        if !buf.is_empty() {
                            if budget.admit(buf.len()) {
                                yield Chunk::Stdout(decode(&buf));
                            } else {
                                session.mark_truncated();
                                cut_short = true;
                            }
                        }
                        break;
                    }
                    StdoutStep::Read(Ok(Ok(_))) => {
                        if !budget.admit(buf.len()) {
                            session.mark_truncated();
                            cut_short = true;
                            break;
                        }
                        yield Chunk::Stdout(decode(&buf));
                        buf.clear();
                    }
                    StdoutStep::Read(Ok(Err(e))) => {
                        warn!(session = %id, "stdout read failed: {}", e);
                        break;
                    }
                    StdoutStep::Read(Err(_)) => {
                        session.mark_timed_out();
                        cut_short = true;
                        // Deliver the unterminated tail read before the deadline
                        if !buf.is_empty() && budget.admit(buf.len()) {
                            yield Chunk::Stdout(decode(&buf));
                        }
                        break;
                    }
                    StdoutStep::StderrOverflow(true) => {
                        session.mark_truncated();
                        cut_short = true;
                        break;
                    }
                    // Capture finished normally and dropped its sender
                    StdoutStep::StderrOverflow(false) => overflow_armed = false,
                }
            }
        }

        session.advance(SessionState::DrainingStderr);
        if cut_short {
            deadline = deadline.min(Instant::now() + KILL_GRACE);
        }
        loop {
            match tokio::time::timeout_at(deadline, err_rx.recv()).await {
                Ok(Some(line)) => {
                    if session.truncated() {
                        continue;
                    }
                    if !budget.admit(line.len()) {
                        session.mark_truncated();
                        cut_short = true;
                        deadline = deadline.min(Instant::now() + KILL_GRACE);
                        continue;
                    }
                    yield Chunk::Stderr(line);
                }
                Ok(None) => break,
                Err(_) if cut_short => break,
                Err(_) => {
                    session.mark_timed_out();
                    cut_short = true;
                    deadline = Instant::now() + KILL_GRACE;
                }
            }
        }
        if let Some(task) = capture {
            task.abort();
        }

        session.advance(SessionState::Exited);
        let (exit_code, signal) = match session.reap().await {
            Ok(status) => (status.code(), exit_signal(&status)),
            Err(e) => {
                warn!(session = %id, "Failed to reap child: {}", e);
                (None, None)
            }
        };

        if session.timed_out() {
            yield Chunk::Notice(Notice::TimedOut(limits.timeout));
        }
        if session.truncated() {
            yield Chunk::Notice(Notice::Truncated(limits.max_output_bytes));
        }

        debug!(session = %id, ?exit_code, ?signal, "Relay finished");
        yield Chunk::Exit { exit_code, signal };
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Everything a session produced, gathered by [`collect`]
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub notices: Vec<Notice>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub truncated: bool,
    pub duration: Duration,
}

impl ExecutionOutput {
    /// Body text exactly as an HTTP client would receive it
    pub fn combined_output(&self) -> String {
        let mut output = String::with_capacity(self.stdout.len() + self.stderr.len());
        output.push_str(&self.stdout);
        output.push_str(&self.stderr);
        for notice in &self.notices {
            output.push_str(&notice.to_string());
        }
        output
    }
}

/// Drive [`relay`] to completion and gather its chunks
pub async fn collect(session: ExecutionSession) -> ExecutionOutput {
    let started = std::time::Instant::now();
    let mut output = ExecutionOutput::default();

    let mut chunks = Box::pin(relay(session));
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Chunk::Stdout(line) => output.stdout.push_str(&line),
            Chunk::Stderr(line) => output.stderr.push_str(&line),
            Chunk::Notice(notice) => {
                match notice {
                    Notice::TimedOut(_) => output.timed_out = true,
                    Notice::Truncated(_) => output.truncated = true,
                }
                output.notices.push(notice);
            }
            Chunk::Exit { exit_code, signal } => {
                output.exit_code = exit_code;
                output.signal = signal;
            }
        }
    }

    output.duration = started.elapsed();
    output
}
