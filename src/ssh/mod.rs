//! SSH transport
//!
//! Connects over `russh`, authenticates with a password or an OpenSSH
//! private key, and specializes into the privilege-escalation variants
//! selected by the `connection_type` option. File operations ride a
//! dedicated SFTP subsystem channel so transfers and command execution can
//! run concurrently over the same session.

pub mod command;
pub mod config;
pub mod connection;
pub mod connection_type;
pub mod elevation;
pub mod handler;
pub mod sftp;

// Re-exports
pub use config::SshConfig;
pub use connection::{SshConnection, SshFactory};
pub use connection_type::SshConnectionType;
pub use elevation::{escape_for_shell, PromptScanner};
pub use handler::SshHandler;
