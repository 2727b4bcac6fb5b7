//! Process handles for remote command execution
//!
//! `execute` returns a [`RemoteProcess`] exposing stdin/stdout/stderr as
//! separate async streams plus the exit code. Transports that pump channel
//! messages in a background task bridge into these streams through the
//! in-memory byte pipes defined here; the pipes are unbounded so a pump
//! never stalls on a slow consumer.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, TetherError};

/// Output from a completed command execution
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,

    /// Standard error from the command
    pub stderr: String,

    /// Exit code of the command (if the transport reported one)
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    /// Create a new empty CommandOutput
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the command succeeded (exit code 0 or no exit code available)
    pub fn success(&self) -> bool {
        self.exit_code.is_none_or(|code| code == 0)
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Boxed async sink used for process stdin and file-upload streams
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
/// Boxed async source used for process output and file-download streams
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// A live command execution on a host connection.
///
/// The streams can be taken for incremental consumption, or the whole
/// process awaited with [`RemoteProcess::wait_with_output`]. Under a PTY
/// the transport cannot distinguish stderr from stdout; such transports
/// deliver everything on stdout and close stderr immediately.
pub struct RemoteProcess {
    stdin: Option<BoxedWriter>,
    stdout: Option<BoxedReader>,
    stderr: Option<BoxedReader>,
    exit: oneshot::Receiver<Result<Option<u32>>>,
}

impl RemoteProcess {
    /// Assemble a process handle from transport-provided streams and an
    /// exit-code channel. Dropping the sender side of `exit` reads as a
    /// closed connection.
    pub fn new(
        stdin: BoxedWriter,
        stdout: BoxedReader,
        stderr: BoxedReader,
        exit: oneshot::Receiver<Result<Option<u32>>>,
    ) -> Self {
        Self {
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr: Some(stderr),
            exit,
        }
    }

    /// Take the stdin sink. Shutting it down signals EOF to the command.
    pub fn take_stdin(&mut self) -> Option<BoxedWriter> {
        self.stdin.take()
    }

    /// Take the stdout source.
    pub fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.stdout.take()
    }

    /// Take the stderr source.
    pub fn take_stderr(&mut self) -> Option<BoxedReader> {
        self.stderr.take()
    }

    /// Wait for the command to finish and return its exit code.
    ///
    /// Callers that took the output streams should drain them; the exit
    /// code arrives when the transport reports command completion.
    pub async fn wait(self) -> Result<Option<u32>> {
        match self.exit.await {
            Ok(result) => result,
            Err(_) => Err(TetherError::ConnectionClosed),
        }
    }

    /// Drain stdout and stderr, wait for completion, and collect everything.
    pub async fn wait_with_output(mut self) -> Result<CommandOutput> {
        // Closing stdin first: commands reading from it would otherwise wait
        drop(self.stdin.take());
        let stdout = self.stdout.take();
        let stderr = self.stderr.take();

        let stdout_fut = drain(stdout);
        let stderr_fut = drain(stderr);
        let (out, err) = tokio::join!(stdout_fut, stderr_fut);

        let exit_code = match self.exit.await {
            Ok(result) => result?,
            Err(_) => return Err(TetherError::ConnectionClosed),
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
            exit_code,
        })
    }
}

impl std::fmt::Debug for RemoteProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProcess")
            .field("stdin_taken", &self.stdin.is_none())
            .field("stdout_taken", &self.stdout.is_none())
            .field("stderr_taken", &self.stderr.is_none())
            .finish()
    }
}

async fn drain(reader: Option<BoxedReader>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}

/// Create an in-memory unbounded byte pipe.
pub(crate) fn byte_pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        PipeWriter { tx: Some(tx) },
        PipeReader {
            rx,
            pending: Vec::new(),
            offset: 0,
        },
    )
}

/// Write half of the in-memory byte pipe
pub(crate) struct PipeWriter {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match &this.tx {
            Some(tx) if tx.send(buf.to_vec()).is_ok() => Poll::Ready(Ok(buf.len())),
            _ => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "pipe closed",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().tx = None;
        Poll::Ready(Ok(()))
    }
}

/// Read half of the in-memory byte pipe
pub(crate) struct PipeReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.offset < this.pending.len() {
                let available = &this.pending[this.offset..];
                let n = available.len().min(buf.remaining());
                buf.put_slice(&available[..n]);
                this.offset += n;
                return Poll::Ready(Ok(()));
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    this.pending = chunk;
                    this.offset = 0;
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
