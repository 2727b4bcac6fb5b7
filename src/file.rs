//! Remote file handles
//!
//! A [`RemoteFile`] is a path-addressed reference into a connection's
//! filesystem, not a cache of filesystem state: every query goes back to
//! the transport. Handles are backed by a transport-specific [`FileDriver`]
//! and become invalid (connection-closed errors) once the owning
//! connection disconnects.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::{FileErrorKind, Result, TetherError};
use crate::os::OperatingSystemFamily;
use crate::process::{BoxedReader, BoxedWriter};

/// What a path points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Other,
}

/// A point-in-time snapshot of a remote path's metadata
#[derive(Debug, Clone)]
pub struct FileStat {
    pub file_type: FileType,
    /// Size in bytes; 0 for directories on transports that do not report one
    pub length: u64,
    /// Unix permission bits where the transport reports them
    pub permissions: Option<u32>,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }
}

/// Transport-specific filesystem backend.
///
/// Drivers operate on absolute path strings and surface conditions as
/// [`FileErrorKind`]-tagged errors; the composition and precondition logic
/// lives in [`RemoteFile`], shared by all transports.
#[async_trait]
pub trait FileDriver: Send + Sync {
    /// Operating system family of the host behind this driver.
    fn os(&self) -> OperatingSystemFamily;

    /// Metadata for a path, or `None` if it does not exist.
    async fn stat(&self, path: &str) -> Result<Option<FileStat>>;

    /// Names of the immediate children of a directory.
    async fn list(&self, path: &str) -> Result<Vec<String>>;

    /// Create exactly one directory level. Fails with
    /// [`FileErrorKind::ParentMissing`] when an ancestor is absent.
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Remove a regular file.
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// Remove an empty directory. Fails with
    /// [`FileErrorKind::DirectoryNotEmpty`] otherwise.
    async fn delete_dir(&self, path: &str) -> Result<()>;

    /// Open a path for reading.
    async fn open_read(&self, path: &str) -> Result<BoxedReader>;

    /// Open a path for writing, truncating existing content. The sink must
    /// be shut down by the caller for the write to be durable.
    async fn open_write(&self, path: &str) -> Result<BoxedWriter>;
}

/// A path-addressed handle into a host connection's filesystem.
#[derive(Clone)]
pub struct RemoteFile {
    driver: Arc<dyn FileDriver>,
    path: String,
}

impl RemoteFile {
    pub(crate) fn new(driver: Arc<dyn FileDriver>, path: impl Into<String>) -> Self {
        Self {
            driver,
            path: path.into(),
        }
    }

    /// The absolute path this handle addresses.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The final path component.
    pub fn name(&self) -> &str {
        self.driver.os().file_name(&self.path)
    }

    /// Handle for the parent directory, or `None` at a filesystem root.
    pub fn parent(&self) -> Option<RemoteFile> {
        self.driver
            .os()
            .parent_path(&self.path)
            .map(|p| RemoteFile::new(self.driver.clone(), p))
    }

    /// Handle for a child of this path.
    ///
    /// Pure path composition: never touches the network and does not imply
    /// the child (or this path) exists. The name must be a single
    /// component.
    pub fn child(&self, name: &str) -> Result<RemoteFile> {
        let os = self.driver.os();
        if name.is_empty() || name.contains(os.path_separator()) {
            return Err(TetherError::config(format!(
                "Invalid child name: {:?}",
                name
            )));
        }
        Ok(RemoteFile::new(
            self.driver.clone(),
            os.join(&self.path, name),
        ))
    }

    /// Current metadata, or `None` if the path does not exist.
    pub async fn stat(&self) -> Result<Option<FileStat>> {
        self.driver.stat(&self.path).await
    }

    /// Whether the path currently exists.
    pub async fn exists(&self) -> Result<bool> {
        Ok(self.stat().await?.is_some())
    }

    /// Whether the path currently exists and is a directory.
    pub async fn is_directory(&self) -> Result<bool> {
        Ok(self.stat().await?.map(|s| s.is_dir()).unwrap_or(false))
    }

    /// Whether the path currently exists and is a regular file.
    pub async fn is_file(&self) -> Result<bool> {
        Ok(self.stat().await?.map(|s| s.is_file()).unwrap_or(false))
    }

    /// Size of the file in bytes. Fails if the path does not exist.
    pub async fn length(&self) -> Result<u64> {
        match self.stat().await? {
            Some(stat) => Ok(stat.length),
            None => Err(TetherError::not_found(&self.path)),
        }
    }

    /// Whether the owning account can read the path. `false` when absent.
    pub async fn can_read(&self) -> Result<bool> {
        Ok(self
            .stat()
            .await?
            .map(|s| permission_bit(&s, 0o400))
            .unwrap_or(false))
    }

    /// Whether the owning account can write the path. `false` when absent.
    pub async fn can_write(&self) -> Result<bool> {
        Ok(self
            .stat()
            .await?
            .map(|s| permission_bit(&s, 0o200))
            .unwrap_or(false))
    }

    /// Whether the owning account can execute the path.
    ///
    /// Executability is a UNIX notion; on WINDOWS this fails with an
    /// unsupported-operation error instead of guessing.
    pub async fn can_execute(&self) -> Result<bool> {
        if !self.driver.os().supports_executable_check() {
            return Err(TetherError::unsupported(
                "executable checks are not defined on WINDOWS hosts",
            ));
        }
        Ok(self
            .stat()
            .await?
            .map(|s| permission_bit(&s, 0o100))
            .unwrap_or(false))
    }

    /// Names of the immediate children present at call time.
    ///
    /// Fails when the handle is not an existing directory. Order is
    /// unspecified.
    pub async fn list(&self) -> Result<Vec<String>> {
        match self.stat().await? {
            None => Err(TetherError::not_found(&self.path)),
            Some(stat) if !stat.is_dir() => Err(TetherError::file(
                FileErrorKind::NotADirectory,
                &self.path,
                "cannot list a non-directory",
            )),
            Some(_) => self.driver.list(&self.path).await,
        }
    }

    /// Create exactly one directory level.
    ///
    /// Fails if any ancestor is missing; ancestors are never created
    /// implicitly.
    pub async fn mkdir(&self) -> Result<()> {
        self.driver.mkdir(&self.path).await
    }

    /// Create this directory and any missing ancestors.
    ///
    /// Succeeds if the target already exists as a directory; fails if a
    /// non-directory occupies the target or any ancestor path.
    pub async fn mkdirs(&self) -> Result<()> {
        if let Some(stat) = self.stat().await? {
            return if stat.is_dir() {
                Ok(())
            } else {
                Err(TetherError::file(
                    FileErrorKind::AlreadyExists,
                    &self.path,
                    "a non-directory is in the way",
                ))
            };
        }
        if let Some(parent) = self.parent() {
            Box::pin(parent.mkdirs()).await?;
        }
        match self.driver.mkdir(&self.path).await {
            Ok(()) => Ok(()),
            // A concurrent creator winning the race is fine as long as the
            // result is a directory
            Err(err) if err.file_kind() == Some(FileErrorKind::AlreadyExists) => {
                if self.is_directory().await? {
                    Ok(())
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Open the file for reading. The stream is exhausted at exactly
    /// `length()` bytes.
    pub async fn open_read(&self) -> Result<BoxedReader> {
        self.driver.open_read(&self.path).await
    }

    /// Open the file for writing, overwriting existing content.
    ///
    /// The sink must be fully written and shut down for the upload to be
    /// durable; an abandoned sink leaves the target absent or truncated.
    pub async fn open_write(&self) -> Result<BoxedWriter> {
        self.driver.open_write(&self.path).await
    }

    /// Upload a byte buffer, replacing any existing content.
    pub async fn put(&self, data: &[u8]) -> Result<()> {
        let mut sink = self.open_write().await?;
        sink.write_all(data).await?;
        sink.shutdown().await?;
        Ok(())
    }

    /// Stream `length` bytes from a reader into the file.
    pub async fn put_stream<R>(&self, reader: R, length: u64) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut sink = self.open_write().await?;
        let mut limited = reader.take(length);
        let copied = tokio::io::copy(&mut limited, &mut sink).await?;
        sink.shutdown().await?;
        if copied != length {
            return Err(TetherError::file(
                FileErrorKind::Other,
                &self.path,
                format!("source ended after {} of {} bytes", copied, length),
            ));
        }
        Ok(())
    }

    /// Download the full contents.
    pub async fn read_bytes(&self) -> Result<Vec<u8>> {
        let mut source = self.open_read().await?;
        let mut buf = Vec::new();
        source.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Remove a file or an empty directory.
    ///
    /// Fails with a directory-not-empty error for directories with
    /// children, and a not-found error for absent paths.
    pub async fn delete(&self) -> Result<()> {
        match self.stat().await? {
            None => Err(TetherError::not_found(&self.path)),
            Some(stat) if stat.is_dir() => self.driver.delete_dir(&self.path).await,
            Some(_) => self.driver.delete_file(&self.path).await,
        }
    }

    /// Remove this path and, for directories, every descendant.
    ///
    /// Benign races (a descendant vanishing mid-walk) are tolerated; the
    /// operation fails if the path is still present afterwards.
    pub async fn delete_recursively(&self) -> Result<()> {
        let stat = match self.stat().await? {
            None => return Ok(()),
            Some(stat) => stat,
        };
        if stat.is_dir() {
            let children = match self.driver.list(&self.path).await {
                Ok(children) => children,
                Err(err) if err.file_kind() == Some(FileErrorKind::NotFound) => return Ok(()),
                Err(err) => return Err(err),
            };
            for name in children {
                let child = self.child(&name)?;
                Box::pin(child.delete_recursively()).await?;
            }
            match self.driver.delete_dir(&self.path).await {
                Ok(()) => {}
                Err(err) if err.file_kind() == Some(FileErrorKind::NotFound) => {}
                Err(err) => return Err(err),
            }
        } else {
            match self.driver.delete_file(&self.path).await {
                Ok(()) => {}
                Err(err) if err.file_kind() == Some(FileErrorKind::NotFound) => {}
                Err(err) => return Err(err),
            }
        }
        if self.exists().await? {
            return Err(TetherError::file(
                FileErrorKind::Other,
                &self.path,
                "path still present after recursive delete",
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("path", &self.path)
            .field("os", &self.driver.os())
            .finish()
    }
}

fn permission_bit(stat: &FileStat, bit: u32) -> bool {
    match stat.permissions {
        Some(mode) => mode & bit != 0,
        // Transports without permission metadata report existing paths as
        // readable and writable
        None => bit != 0o100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDriver(OperatingSystemFamily);

    #[async_trait]
    impl FileDriver for NullDriver {
        fn os(&self) -> OperatingSystemFamily {
            self.0
        }
        async fn stat(&self, _path: &str) -> Result<Option<FileStat>> {
            Ok(None)
        }
        async fn list(&self, _path: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn mkdir(&self, _path: &str) -> Result<()> {
            Ok(())
        }
        async fn delete_file(&self, _path: &str) -> Result<()> {
            Ok(())
        }
        async fn delete_dir(&self, _path: &str) -> Result<()> {
            Ok(())
        }
        async fn open_read(&self, path: &str) -> Result<BoxedReader> {
            Err(TetherError::not_found(path))
        }
        async fn open_write(&self, path: &str) -> Result<BoxedWriter> {
            Err(TetherError::not_found(path))
        }
    }

    fn unix_file(path: &str) -> RemoteFile {
        RemoteFile::new(Arc::new(NullDriver(OperatingSystemFamily::Unix)), path)
    }

    #[test]
    fn test_child_composes_paths() {
        let dir = unix_file("/srv/data");
        let child = dir.child("report.txt").unwrap();
        assert_eq!(child.path(), "/srv/data/report.txt");
        assert_eq!(child.name(), "report.txt");
    }

    #[test]
    fn test_child_rejects_separators() {
        let dir = unix_file("/srv/data");
        assert!(dir.child("a/b").is_err());
        assert!(dir.child("").is_err());
    }

    #[test]
    fn test_parent_chain() {
        let file = unix_file("/srv/data/report.txt");
        let parent = file.parent().unwrap();
        assert_eq!(parent.path(), "/srv/data");
        let root = unix_file("/");
        assert!(root.parent().is_none());
    }

    #[tokio::test]
    async fn test_missing_path_queries() {
        let file = unix_file("/srv/missing");
        assert!(!file.exists().await.unwrap());
        assert!(!file.is_directory().await.unwrap());
        assert!(!file.can_read().await.unwrap());
        assert!(file.length().await.is_err());
    }

    #[tokio::test]
    async fn test_can_execute_unsupported_on_windows() {
        let file = RemoteFile::new(
            Arc::new(NullDriver(OperatingSystemFamily::Windows)),
            "C:\\temp\\tool.exe",
        );
        match file.can_execute().await {
            Err(TetherError::Unsupported(_)) => {}
            other => panic!("expected Unsupported, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let file = unix_file("/srv/missing");
        match file.delete().await {
            Err(err) => assert_eq!(err.file_kind(), Some(FileErrorKind::NotFound)),
            Ok(()) => panic!("expected not-found error"),
        }
    }

    #[tokio::test]
    async fn test_delete_recursively_missing_is_ok() {
        let file = unix_file("/srv/missing");
        file.delete_recursively().await.unwrap();
    }
}
