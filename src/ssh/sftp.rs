//! SFTP-backed remote file driver
//!
//! File operations ride a dedicated SFTP subsystem channel opened lazily
//! on first use, so transfers and command execution multiplex over the
//! same SSH session. The driver shares the session slot and the
//! connection guard with its [`SshConnection`](super::SshConnection):
//! disconnecting invalidates outstanding file handles immediately.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{OpenFlags, StatusCode};
use tokio::sync::Mutex;
use tracing::debug;

use crate::connection::ConnectionGuard;
use crate::error::{FileErrorKind, Result, TetherError};
use crate::file::{FileDriver, FileStat, FileType};
use crate::os::OperatingSystemFamily;
use crate::process::{BoxedReader, BoxedWriter};
use crate::ssh::handler::SshHandler;

type SessionSlot = Arc<Mutex<Option<client::Handle<SshHandler>>>>;

pub(crate) struct SftpDriver {
    session: SessionSlot,
    sftp: Mutex<Option<Arc<SftpSession>>>,
    guard: ConnectionGuard,
    os: OperatingSystemFamily,
}

impl SftpDriver {
    pub(crate) fn new(session: SessionSlot, guard: ConnectionGuard, os: OperatingSystemFamily) -> Self {
        Self {
            session,
            sftp: Mutex::new(None),
            guard,
            os,
        }
    }

    /// The SFTP session, opening the subsystem channel on first use.
    async fn sftp(&self) -> Result<Arc<SftpSession>> {
        self.guard.ensure_open()?;
        let mut slot = self.sftp.lock().await;
        if let Some(sftp) = slot.as_ref() {
            return Ok(sftp.clone());
        }

        let session_guard = self.session.lock().await;
        let session = session_guard
            .as_ref()
            .ok_or(TetherError::ConnectionClosed)?;
        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| TetherError::connection(format!("Failed to open SFTP channel: {}", e)))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| {
                TetherError::connection(format!("Failed to request SFTP subsystem: {}", e))
            })?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| {
                TetherError::connection(format!("Failed to initialize SFTP session: {}", e))
            })?;
        debug!("SFTP subsystem channel established");

        let sftp = Arc::new(sftp);
        *slot = Some(sftp.clone());
        Ok(sftp)
    }
}

#[async_trait]
impl FileDriver for SftpDriver {
    fn os(&self) -> OperatingSystemFamily {
        self.os
    }

    async fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        let sftp = self.sftp().await?;
        match sftp.metadata(path).await {
            Ok(attrs) => {
                let file_type = if attrs.file_type().is_dir() {
                    FileType::Directory
                } else if attrs.file_type().is_file() {
                    FileType::File
                } else {
                    FileType::Other
                };
                Ok(Some(FileStat {
                    file_type,
                    length: attrs.size.unwrap_or(0),
                    permissions: attrs.permissions.map(|mode| mode & 0o7777),
                }))
            }
            Err(err) if is_no_such_file(&err) => Ok(None),
            Err(err) => Err(map_sftp_error(path, err)),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let sftp = self.sftp().await?;
        let entries = sftp
            .read_dir(path)
            .await
            .map_err(|err| map_sftp_error(path, err))?;
        Ok(entries
            .into_iter()
            .map(|entry| entry.file_name())
            .filter(|name| name != "." && name != "..")
            .collect())
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let sftp = self.sftp().await?;
        match sftp.create_dir(path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let mapped = map_sftp_error(path, err);
                match mapped.file_kind() {
                    // Servers report a missing parent as no-such-file
                    Some(FileErrorKind::NotFound) => Err(TetherError::file(
                        FileErrorKind::ParentMissing,
                        path,
                        "a parent directory does not exist",
                    )),
                    // A bare failure status needs disambiguation
                    Some(FileErrorKind::Other) => {
                        if self.stat(path).await?.is_some() {
                            return Err(TetherError::file(
                                FileErrorKind::AlreadyExists,
                                path,
                                "path already exists",
                            ));
                        }
                        if let Some(parent) = self.os.parent_path(path) {
                            if self.stat(parent).await?.is_none() {
                                return Err(TetherError::file(
                                    FileErrorKind::ParentMissing,
                                    path,
                                    "a parent directory does not exist",
                                ));
                            }
                        }
                        Err(mapped)
                    }
                    _ => Err(mapped),
                }
            }
        }
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let sftp = self.sftp().await?;
        sftp.remove_file(path)
            .await
            .map_err(|err| map_sftp_error(path, err))
    }

    async fn delete_dir(&self, path: &str) -> Result<()> {
        let sftp = self.sftp().await?;
        match sftp.remove_dir(path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let mapped = map_sftp_error(path, err);
                if mapped.file_kind() == Some(FileErrorKind::Other) {
                    if let Ok(entries) = self.list(path).await {
                        if !entries.is_empty() {
                            return Err(TetherError::file(
                                FileErrorKind::DirectoryNotEmpty,
                                path,
                                "directory has entries",
                            ));
                        }
                    }
                }
                Err(mapped)
            }
        }
    }

    async fn open_read(&self, path: &str) -> Result<BoxedReader> {
        let sftp = self.sftp().await?;
        let file = sftp
            .open_with_flags(path, OpenFlags::READ)
            .await
            .map_err(|err| map_sftp_error(path, err))?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &str) -> Result<BoxedWriter> {
        let sftp = self.sftp().await?;
        match sftp
            .open_with_flags(
                path,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await
        {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if is_no_such_file(&err) => Err(TetherError::file(
                FileErrorKind::ParentMissing,
                path,
                "a parent directory does not exist",
            )),
            Err(err) => Err(map_sftp_error(path, err)),
        }
    }
}

fn is_no_such_file(err: &russh_sftp::client::error::Error) -> bool {
    matches!(
        err,
        russh_sftp::client::error::Error::Status(status)
            if status.status_code == StatusCode::NoSuchFile
    )
}

fn map_sftp_error(path: &str, err: russh_sftp::client::error::Error) -> TetherError {
    match &err {
        russh_sftp::client::error::Error::Status(status) => {
            let kind = match status.status_code {
                StatusCode::NoSuchFile => FileErrorKind::NotFound,
                StatusCode::PermissionDenied => FileErrorKind::PermissionDenied,
                _ => FileErrorKind::Other,
            };
            TetherError::file(kind, path, status.error_message.clone())
        }
        other => TetherError::file(FileErrorKind::Other, path, other.to_string()),
    }
}
