//! tether - uniform file manipulation and command execution on remote hosts
//!
//! This crate lets a caller manipulate files and run commands on a remote
//! or local machine through one interface while the underlying transport
//! varies. SSH (with several privilege-escalation flavors) and local
//! execution are built in; WinRM and Telnet transports plug into the same
//! dispatcher from their own crates.
//!
//! # Features
//!
//! - Typed, validated connection options with redacted secrets
//! - Protocol dispatcher with pluggable transport factories
//! - Remote file handles: existence, metadata, directory operations,
//!   recursive delete, streamed read/write
//! - Command execution with split stdin/stdout/stderr and exit codes
//! - SSH connection types: `REGULAR`, `SUDO`, `INTERACTIVE_SUDO`, `SUEXEC`
//! - Interactive sudo drives a PTY, detects the password prompt with a
//!   configurable pattern, and injects the credential exactly once
//!
//! # Example
//!
//! ```no_run
//! use tether::options::{self, ConnectionOptions};
//! use tether::HostConnection;
//!
//! # async fn example() -> tether::Result<()> {
//! let mut opts = ConnectionOptions::new();
//! opts.set(options::ADDRESS, "app-server.internal")?;
//! opts.set(options::USERNAME, "deploy")?;
//! opts.set(options::PASSWORD, "secret")?;
//! opts.set(options::CONNECTION_TYPE, "INTERACTIVE_SUDO")?;
//! opts.set(options::SUDO_USERNAME, "app")?;
//!
//! let connection = tether::connect("ssh", &opts).await?;
//! let output = connection.run("systemctl status app").await?;
//! println!("{}", output.stdout);
//!
//! let remote = connection.file("/etc/app/app.conf");
//! let content = remote.read_bytes().await?;
//! # let _ = content;
//! connection.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod file;
pub mod local;
pub mod options;
pub mod os;
pub mod process;
pub mod protocol;
pub mod ssh;

use std::sync::Arc;

// Re-exports for convenience
pub use connection::HostConnection;
pub use error::{FileErrorKind, Result, TetherError};
pub use file::{FileDriver, FileStat, FileType, RemoteFile};
pub use local::LocalConnection;
pub use options::{ConnectionOptions, OptionValue, Secret};
pub use os::OperatingSystemFamily;
pub use process::{BoxedReader, BoxedWriter, CommandOutput, RemoteProcess};
pub use protocol::ProtocolFactory;
pub use ssh::{SshConnection, SshConnectionType};

/// Open a connection using the factory registered for `protocol`.
///
/// Built-in protocols are `"ssh"` and `"local"`; additional transports
/// register through [`protocol::register`].
pub async fn connect(
    protocol: &str,
    options: &ConnectionOptions,
) -> Result<Arc<dyn HostConnection>> {
    protocol::connect(protocol, options).await
}
