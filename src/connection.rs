//! Host connection abstraction
//!
//! A [`HostConnection`] is one live, authenticated session bound to one
//! transport and one operating system family. It creates [`RemoteFile`]
//! handles, executes commands, allocates temporary paths, and must be
//! explicitly disconnected. Disconnecting is idempotent and invalidates
//! every handle obtained from the connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::file::RemoteFile;
use crate::os::OperatingSystemFamily;
use crate::process::{CommandOutput, RemoteProcess};

/// A live session against a local or remote host.
#[async_trait]
pub trait HostConnection: Send + Sync {
    /// The operating system family this connection was configured for.
    fn os(&self) -> OperatingSystemFamily;

    /// Base directory used for temporary paths on this host.
    fn temp_dir(&self) -> String;

    /// Create a handle for an absolute path on this host.
    ///
    /// Pure composition; the path need not exist.
    fn file(&self, path: &str) -> RemoteFile;

    /// Allocate a fresh temporary path.
    ///
    /// The returned handle's name starts with `prefix` and ends with
    /// `suffix`, and is unique per call even for identical arguments. The
    /// file itself is not created; it does not exist until written to.
    fn temp_file(&self, prefix: &str, suffix: &str) -> RemoteFile {
        let os = self.os();
        let name = unique_temp_name(prefix, suffix);
        self.file(&os.join(&self.temp_dir(), &name))
    }

    /// Start a command on the host and return a handle to the live process.
    async fn execute(&self, command: &str) -> Result<RemoteProcess>;

    /// Run a command to completion and collect its output.
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.execute(command).await?.wait_with_output().await
    }

    /// Release the transport. Safe to call multiple times; every handle
    /// obtained from this connection fails with a connection-closed error
    /// afterwards.
    async fn disconnect(&self);
}

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Build a unique temporary file name.
///
/// Uniqueness comes from a process-wide monotonic counter plus a random
/// token, never from checking the remote filesystem first (which would
/// race against other processes targeting the same directory).
pub(crate) fn unique_temp_name(prefix: &str, suffix: &str) -> String {
    let seq = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}{:06}-{:08x}{}",
        prefix,
        seq,
        rand::random::<u32>(),
        suffix
    )
}

/// Shared open/closed state of a connection, cloned into every driver and
/// background pump so that `disconnect` invalidates them all and unblocks
/// in-flight reads.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionGuard {
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl ConnectionGuard {
    pub(crate) fn new() -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// Fail if the connection has been disconnected.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(crate::error::TetherError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// Mark the connection closed. Returns `true` the first time only, so
    /// double-disconnect stays benign.
    pub(crate) fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            self.cancel.cancel();
        }
        first
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves when the connection is disconnected.
    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_temp_name_shape() {
        let name = unique_temp_name("pre", ".tmp");
        assert!(name.starts_with("pre"));
        assert!(name.ends_with(".tmp"));
    }

    #[test]
    fn test_unique_temp_name_uniqueness() {
        let a = unique_temp_name("work", ".dat");
        let b = unique_temp_name("work", ".dat");
        assert_ne!(a, b);
    }

    #[test]
    fn test_guard_close_is_idempotent() {
        let guard = ConnectionGuard::new();
        assert!(guard.ensure_open().is_ok());
        assert!(guard.close());
        assert!(!guard.close());
        assert!(guard.is_closed());
        assert!(guard.ensure_open().is_err());
    }

    #[tokio::test]
    async fn test_guard_cancellation_unblocks_waiters() {
        let guard = ConnectionGuard::new();
        let waiter = guard.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        guard.close();
        assert!(handle.await.unwrap());
    }
}
