//! Error types for the tether crate

use thiserror::Error;

/// Main error type for host connections and remote file operations
#[derive(Debug, Error)]
pub enum TetherError {
    /// Configuration error (missing/mistyped options, bad values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// No factory registered for the requested protocol
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// The protocol does not support the requested connection type
    #[error("Unknown connection type: {0}")]
    UnknownConnectionType(String),

    /// Transport-level connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Authentication failed (password or key)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Privilege elevation failed (prompt never matched, credential rejected)
    #[error("Elevation failed: {0}")]
    Elevation(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// The connection was disconnected; the handle is no longer usable
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation not supported for this operating system family or transport
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Remote filesystem error, with a kind callers can branch on
    #[error("{kind}: {path}: {message}")]
    File {
        kind: FileErrorKind,
        path: String,
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH key parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),
}

/// Distinguishes remote filesystem failure conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileErrorKind {
    /// The path does not exist
    NotFound,
    /// The path exists but is not a directory
    NotADirectory,
    /// The path exists but is a directory
    IsADirectory,
    /// A parent directory is missing
    ParentMissing,
    /// The path already exists
    AlreadyExists,
    /// The directory is not empty
    DirectoryNotEmpty,
    /// Access denied by the remote host
    PermissionDenied,
    /// Any other remote filesystem failure
    Other,
}

impl std::fmt::Display for FileErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileErrorKind::NotFound => "no such file or directory",
            FileErrorKind::NotADirectory => "not a directory",
            FileErrorKind::IsADirectory => "is a directory",
            FileErrorKind::ParentMissing => "parent directory missing",
            FileErrorKind::AlreadyExists => "already exists",
            FileErrorKind::DirectoryNotEmpty => "directory not empty",
            FileErrorKind::PermissionDenied => "permission denied",
            FileErrorKind::Other => "filesystem error",
        };
        f.write_str(s)
    }
}

/// Result type alias using TetherError
pub type Result<T> = std::result::Result<T, TetherError>;

impl TetherError {
    /// Create a configuration error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        TetherError::Config(msg.into())
    }

    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        TetherError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        TetherError::Authentication(msg.into())
    }

    /// Create an elevation error from a string
    pub fn elevation(msg: impl Into<String>) -> Self {
        TetherError::Elevation(msg.into())
    }

    /// Create an unsupported-operation error from a string
    pub fn unsupported(msg: impl Into<String>) -> Self {
        TetherError::Unsupported(msg.into())
    }

    /// Create a filesystem error for a path
    pub fn file(kind: FileErrorKind, path: impl Into<String>, msg: impl Into<String>) -> Self {
        TetherError::File {
            kind,
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found filesystem error for a path
    pub fn not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        TetherError::File {
            kind: FileErrorKind::NotFound,
            message: format!("{} does not exist", path),
            path,
        }
    }

    /// The filesystem error kind, if this is a filesystem error
    pub fn file_kind(&self) -> Option<FileErrorKind> {
        match self {
            TetherError::File { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TetherError::Connection("refused".to_string());
        assert_eq!(err.to_string(), "Connection error: refused");

        let err = TetherError::Timeout(5000);
        assert_eq!(err.to_string(), "Timeout after 5000ms");

        let err = TetherError::not_found("/tmp/gone");
        assert_eq!(
            err.to_string(),
            "no such file or directory: /tmp/gone: /tmp/gone does not exist"
        );
    }

    #[test]
    fn test_file_kind() {
        let err = TetherError::file(FileErrorKind::DirectoryNotEmpty, "/srv/data", "2 entries");
        assert_eq!(err.file_kind(), Some(FileErrorKind::DirectoryNotEmpty));
        assert_eq!(TetherError::ConnectionClosed.file_kind(), None);
    }
}
