//! Local host driver
//!
//! Implements the connection and file-driver contracts in-process over
//! `tokio::fs` and `tokio::process`. Besides being useful in its own right
//! (deployment pipelines treat "this machine" as just another host), it is
//! the reference implementation the integration tests drive.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::connection::{ConnectionGuard, HostConnection};
use crate::error::{FileErrorKind, Result, TetherError};
use crate::file::{FileDriver, FileStat, FileType, RemoteFile};
use crate::options::{ConnectionOptions, TEMPORARY_DIRECTORY};
use crate::os::OperatingSystemFamily;
use crate::process::{BoxedReader, BoxedWriter, RemoteProcess};
use crate::protocol::ProtocolFactory;

/// Factory for the built-in `local` protocol
pub struct LocalFactory;

#[async_trait]
impl ProtocolFactory for LocalFactory {
    async fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn HostConnection>> {
        Ok(LocalConnection::connect(options)?)
    }
}

/// A "connection" to the machine the process runs on
pub struct LocalConnection {
    guard: ConnectionGuard,
    driver: Arc<LocalDriver>,
    temp_dir: String,
}

impl LocalConnection {
    pub fn connect(options: &ConnectionOptions) -> Result<Arc<Self>> {
        let os = host_os_family();
        let temp_dir = match options.get_str(TEMPORARY_DIRECTORY)? {
            Some(dir) => dir,
            None => std::env::temp_dir().to_string_lossy().into_owned(),
        };
        let guard = ConnectionGuard::new();
        info!("Connected to local host ({})", os);
        Ok(Arc::new(Self {
            driver: Arc::new(LocalDriver {
                guard: guard.clone(),
                os,
            }),
            guard,
            temp_dir,
        }))
    }
}

#[async_trait]
impl HostConnection for LocalConnection {
    fn os(&self) -> OperatingSystemFamily {
        self.driver.os
    }

    fn temp_dir(&self) -> String {
        self.temp_dir.clone()
    }

    fn file(&self, path: &str) -> RemoteFile {
        RemoteFile::new(self.driver.clone(), path)
    }

    async fn execute(&self, command: &str) -> Result<RemoteProcess> {
        self.guard.ensure_open()?;
        debug!("Executing local command: {}", command);

        let mut child = shell_command(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TetherError::connection(format!("Failed to spawn command: {}", e)))?;

        let stdin: BoxedWriter = Box::new(
            child
                .stdin
                .take()
                .ok_or_else(|| TetherError::connection("Child process has no stdin"))?,
        );
        let stdout: BoxedReader = Box::new(
            child
                .stdout
                .take()
                .ok_or_else(|| TetherError::connection("Child process has no stdout"))?,
        );
        let stderr: BoxedReader = Box::new(
            child
                .stderr
                .take()
                .ok_or_else(|| TetherError::connection("Child process has no stderr"))?,
        );

        let (exit_tx, exit_rx) = oneshot::channel();
        let guard = self.guard.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => Ok(status.code().and_then(|c| u32::try_from(c).ok())),
                    Err(e) => Err(TetherError::connection(format!(
                        "Failed to wait for command: {}",
                        e
                    ))),
                },
                _ = guard.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    Err(TetherError::ConnectionClosed)
                }
            };
            let _ = exit_tx.send(result);
        });

        Ok(RemoteProcess::new(stdin, stdout, stderr, exit_rx))
    }

    async fn disconnect(&self) {
        if self.guard.close() {
            info!("Local connection closed");
        }
    }
}

fn host_os_family() -> OperatingSystemFamily {
    if cfg!(windows) {
        OperatingSystemFamily::Windows
    } else {
        OperatingSystemFamily::Unix
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// File driver over the local filesystem
struct LocalDriver {
    guard: ConnectionGuard,
    os: OperatingSystemFamily,
}

#[async_trait]
impl FileDriver for LocalDriver {
    fn os(&self) -> OperatingSystemFamily {
        self.os
    }

    async fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        self.guard.ensure_open()?;
        match fs::metadata(path).await {
            Ok(meta) => {
                let file_type = if meta.is_dir() {
                    FileType::Directory
                } else if meta.is_file() {
                    FileType::File
                } else {
                    FileType::Other
                };
                Ok(Some(FileStat {
                    file_type,
                    length: meta.len(),
                    permissions: permission_bits(&meta),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(FileErrorKind::Other, path, e)),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        self.guard.ensure_open()?;
        let mut entries = fs::read_dir(path).await.map_err(|e| map_missing(path, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(FileErrorKind::Other, path, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.guard.ensure_open()?;
        match fs::create_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(io_error(FileErrorKind::ParentMissing, path, e))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(io_error(FileErrorKind::AlreadyExists, path, e))
            }
            Err(e) => Err(io_error(FileErrorKind::Other, path, e)),
        }
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.guard.ensure_open()?;
        fs::remove_file(path).await.map_err(|e| map_missing(path, e))
    }

    async fn delete_dir(&self, path: &str) -> Result<()> {
        self.guard.ensure_open()?;
        match fs::remove_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(io_error(FileErrorKind::NotFound, path, e))
            }
            Err(e) => {
                // Disambiguate: a still-populated directory is the caller's
                // problem, not an opaque IO failure
                if let Ok(mut entries) = fs::read_dir(path).await {
                    if let Ok(Some(_)) = entries.next_entry().await {
                        return Err(TetherError::file(
                            FileErrorKind::DirectoryNotEmpty,
                            path,
                            "directory has entries",
                        ));
                    }
                }
                Err(io_error(FileErrorKind::Other, path, e))
            }
        }
    }

    async fn open_read(&self, path: &str) -> Result<BoxedReader> {
        self.guard.ensure_open()?;
        let file = fs::File::open(path).await.map_err(|e| map_missing(path, e))?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &str) -> Result<BoxedWriter> {
        self.guard.ensure_open()?;
        match fs::File::create(path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(io_error(FileErrorKind::ParentMissing, path, e))
            }
            Err(e) => Err(io_error(FileErrorKind::Other, path, e)),
        }
    }
}

fn map_missing(path: &str, e: std::io::Error) -> TetherError {
    let kind = match e.kind() {
        std::io::ErrorKind::NotFound => FileErrorKind::NotFound,
        std::io::ErrorKind::PermissionDenied => FileErrorKind::PermissionDenied,
        _ => FileErrorKind::Other,
    };
    io_error(kind, path, e)
}

fn io_error(kind: FileErrorKind, path: &str, e: std::io::Error) -> TetherError {
    TetherError::file(kind, path, e.to_string())
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn permission_bits(_meta: &std::fs::Metadata) -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_collects_output() {
        let options = ConnectionOptions::new();
        let connection = LocalConnection::connect(&options).unwrap();
        let output = connection.run("echo hello").await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, Some(0));
        connection.disconnect().await;
    }

    #[tokio::test]
    async fn test_execute_reports_exit_code() {
        let options = ConnectionOptions::new();
        let connection = LocalConnection::connect(&options).unwrap();
        let output = connection.run("exit 3").await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        connection.disconnect().await;
    }

    #[tokio::test]
    async fn test_execute_after_disconnect_fails() {
        let options = ConnectionOptions::new();
        let connection = LocalConnection::connect(&options).unwrap();
        connection.disconnect().await;
        connection.disconnect().await;
        match connection.execute("echo hi").await {
            Err(TetherError::ConnectionClosed) => {}
            other => panic!("expected ConnectionClosed, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_temp_dir_override() {
        let mut options = ConnectionOptions::new();
        options.set(TEMPORARY_DIRECTORY, "/custom/tmp").unwrap();
        let connection = LocalConnection::connect(&options).unwrap();
        assert_eq!(connection.temp_dir(), "/custom/tmp");
        let temp = connection.temp_file("job", ".log");
        assert!(temp.path().starts_with("/custom/tmp"));
        connection.disconnect().await;
    }
}
