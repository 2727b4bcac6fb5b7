//! SSH host connection
//!
//! Owns the `russh` session and drives the connection-type state machine:
//!
//! ```text
//! UNAUTHENTICATED -> TRANSPORT_CONNECTED -> (ESCALATING) -> READY -> CLOSED
//! ```
//!
//! Regular and command-wrapping variants go straight to READY once the
//! transport authenticates. Interactive sudo first allocates a PTY,
//! launches the escalation command, and answers the password prompt; only
//! then is the connection handed to callers. Disconnecting is idempotent
//! and unblocks anything still reading from the session.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh::{Channel, ChannelStream};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionGuard, HostConnection};
use crate::error::{Result, TetherError};
use crate::file::RemoteFile;
use crate::options::ConnectionOptions;
use crate::os::OperatingSystemFamily;
use crate::process::RemoteProcess;
use crate::protocol::ProtocolFactory;
use crate::ssh::command::{spawn_channel_process, spawn_shell_process};
use crate::ssh::config::SshConfig;
use crate::ssh::elevation::{self, PromptScanner};
use crate::ssh::handler::SshHandler;
use crate::ssh::sftp::SftpDriver;

/// Factory for the built-in `ssh` protocol
pub struct SshFactory;

#[async_trait]
impl ProtocolFactory for SshFactory {
    async fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn HostConnection>> {
        let config = SshConfig::from_options(options)?;
        Ok(SshConnection::connect(config).await?)
    }
}

type ShellStream = ChannelStream<client::Msg>;

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionPhase {
    Unauthenticated,
    TransportConnected,
    Escalating,
    Ready,
    Closed,
}

/// One authenticated SSH session, specialized by connection type
pub struct SshConnection {
    config: SshConfig,

    /// Underlying session handle; `None` once disconnected
    session: Arc<Mutex<Option<Handle<SshHandler>>>>,

    /// Persistent escalated shell stream (interactive sudo only). Taken
    /// while a command runs, restored when its completion marker is seen.
    shell: Arc<Mutex<Option<ShellStream>>>,

    /// SFTP-backed file driver shared with every handle from `file()`
    driver: Arc<SftpDriver>,

    phase: StdMutex<ConnectionPhase>,
    guard: ConnectionGuard,
}

impl SshConnection {
    /// Establish the transport, authenticate, and (for interactive sudo)
    /// negotiate escalation before returning.
    pub async fn connect(config: SshConfig) -> Result<Arc<Self>> {
        info!(
            "Connecting to {}@{}:{} ({})",
            config.username, config.address, config.port, config.connection_type
        );

        let ssh_config = Arc::new(client::Config::default());
        let addr = format!("{}:{}", config.address, config.port);
        let connect_result = timeout(
            config.connection_timeout,
            client::connect(ssh_config, addr.as_str(), SshHandler::new()),
        )
        .await;

        let mut session = match connect_result {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(TetherError::connection(e.to_string())),
            Err(_) => {
                return Err(TetherError::connection(format!(
                    "Connection timeout after {}ms",
                    config.connection_timeout.as_millis()
                )))
            }
        };

        authenticate(&mut session, &config).await?;
        debug!(
            "Connection phase: {:?} -> {:?}",
            ConnectionPhase::Unauthenticated,
            ConnectionPhase::TransportConnected
        );

        let guard = ConnectionGuard::new();
        let session = Arc::new(Mutex::new(Some(session)));
        let driver = Arc::new(SftpDriver::new(session.clone(), guard.clone(), config.os));
        let connection = Arc::new(Self {
            shell: Arc::new(Mutex::new(None)),
            driver,
            phase: StdMutex::new(ConnectionPhase::TransportConnected),
            guard,
            session,
            config,
        });

        if connection.config.connection_type.interactive() {
            connection.set_phase(ConnectionPhase::Escalating);
            if let Err(e) = connection.escalate().await {
                // No further transitions: tear the transport down and
                // surface the escalation failure
                connection.disconnect().await;
                return Err(e);
            }
        }

        connection.set_phase(ConnectionPhase::Ready);
        info!("Connection ready ({})", connection.config.connection_type);
        Ok(connection)
    }

    /// Open a new session channel on the underlying transport.
    async fn open_channel(&self) -> Result<Channel<client::Msg>> {
        self.guard.ensure_open()?;
        let session_guard = self.session.lock().await;
        let session = session_guard
            .as_ref()
            .ok_or(TetherError::ConnectionClosed)?;
        session
            .channel_open_session()
            .await
            .map_err(|e| TetherError::connection(format!("Failed to open channel: {}", e)))
    }

    /// Negotiate the interactive sudo handshake over a fresh PTY shell.
    async fn escalate(&self) -> Result<()> {
        let channel = self
            .open_channel()
            .await
            .map_err(|e| TetherError::elevation(format!("Failed to open channel: {}", e)))?;

        // Mandatory for this variant: escalation cannot observe or answer
        // a prompt without a terminal
        channel
            .request_pty(true, "xterm", 80, 24, 0, 0, &[])
            .await
            .map_err(|e| TetherError::elevation(format!("Failed to request PTY: {}", e)))?;
        channel
            .request_shell(true)
            .await
            .map_err(|e| TetherError::elevation(format!("Failed to request shell: {}", e)))?;

        let mut stream = channel.into_stream();
        let command = elevation::escalation_command(&self.config);
        debug!("Starting escalation: {}", command);
        stream
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .map_err(|e| {
                TetherError::elevation(format!("Failed to start escalation command: {}", e))
            })?;

        let secret = self
            .config
            .sudo_password
            .clone()
            .ok_or_else(|| TetherError::elevation("No credential available for the sudo prompt"))?;
        let mut scanner = PromptScanner::new(self.config.prompt_pattern.clone());
        elevation::negotiate(
            &mut stream,
            &mut scanner,
            &secret,
            self.config.prompt_retries,
            self.config.escalation_timeout,
            &self.guard,
        )
        .await?;
        // Scanner is done; the same stream now carries command output
        *self.shell.lock().await = Some(stream);

        if self.config.sudo_override_umask {
            let output = self.shell_execute("umask 0022").await?.wait_with_output().await?;
            if !output.success() {
                warn!("Failed to override umask: {}", output.combined_output());
            }
        }

        info!(
            "Escalated to {} via interactive sudo",
            self.config.sudo_username.as_deref().unwrap_or("root")
        );
        Ok(())
    }

    /// Run a command through the persistent escalated shell.
    async fn shell_execute(&self, command: &str) -> Result<RemoteProcess> {
        let stream = {
            let mut slot = self.shell.lock().await;
            slot.take().ok_or_else(|| {
                TetherError::connection("Escalated shell is busy or unavailable")
            })?
        };
        spawn_shell_process(
            stream,
            self.shell.clone(),
            command.to_string(),
            self.guard.clone(),
        )
    }

    /// Run a command on a fresh exec channel.
    async fn channel_execute(&self, command: &str) -> Result<RemoteProcess> {
        let channel = self.open_channel().await?;
        if self.config.allocate_default_pty {
            // Compatibility terminal for remote tools that refuse to run
            // without one; independent of the escalation PTY
            channel
                .request_pty(true, "xterm", 80, 24, 0, 0, &[])
                .await
                .map_err(|e| TetherError::connection(format!("Failed to request PTY: {}", e)))?;
        }
        channel
            .exec(true, command)
            .await
            .map_err(|e| TetherError::connection(format!("Failed to exec command: {}", e)))?;
        Ok(spawn_channel_process(channel, self.guard.clone()))
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        let mut current = self
            .phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!("Connection phase: {:?} -> {:?}", *current, phase);
        *current = phase;
    }
}

#[async_trait]
impl HostConnection for SshConnection {
    fn os(&self) -> OperatingSystemFamily {
        self.config.os
    }

    fn temp_dir(&self) -> String {
        self.config.temp_dir.clone()
    }

    fn file(&self, path: &str) -> RemoteFile {
        RemoteFile::new(self.driver.clone(), path)
    }

    async fn execute(&self, command: &str) -> Result<RemoteProcess> {
        self.guard.ensure_open()?;
        if self.config.connection_type.interactive() {
            debug!("Executing in escalated shell: {}", command);
            self.shell_execute(command).await
        } else {
            let wrapped = elevation::wrap_command(&self.config, command);
            debug!("Executing: {}", wrapped);
            self.channel_execute(&wrapped).await
        }
    }

    async fn disconnect(&self) {
        if !self.guard.close() {
            // Benign double-disconnect
            return;
        }
        self.set_phase(ConnectionPhase::Closed);

        // Dropping the shell stream closes the escalated PTY channel
        self.shell.lock().await.take();

        let mut session_guard = self.session.lock().await;
        if let Some(session) = session_guard.take() {
            let _ = session
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
        }
        info!("SSH connection closed");
    }
}

impl std::fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnection")
            .field("address", &self.config.address)
            .field("port", &self.config.port)
            .field("username", &self.config.username)
            .field("connection_type", &self.config.connection_type)
            .field("closed", &self.guard.is_closed())
            .finish()
    }
}

/// Authenticate with the SSH server: password first, then private key.
async fn authenticate(session: &mut Handle<SshHandler>, config: &SshConfig) -> Result<()> {
    if let Some(ref password) = config.password {
        debug!(
            "Attempting password authentication for user '{}'",
            config.username
        );
        let auth_result = session
            .authenticate_password(&config.username, password.expose())
            .await
            .map_err(|e| TetherError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Password authentication successful");
            return Ok(());
        }
        if config.private_key.is_none() {
            return Err(TetherError::auth("Password authentication rejected"));
        }
        warn!("Password authentication rejected, trying private key");
    }

    if let Some(ref key_content) = config.private_key {
        debug!(
            "Attempting key authentication for user '{}'",
            config.username
        );
        let key = russh::keys::PrivateKey::from_openssh(key_content.expose().as_bytes())
            .map_err(|e| TetherError::SshKey(format!("Failed to parse private key: {}", e)))?;
        let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);

        let auth_result = session
            .authenticate_publickey(&config.username, key_with_alg)
            .await
            .map_err(|e| TetherError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Key authentication successful");
            return Ok(());
        }
        return Err(TetherError::auth("Key authentication rejected"));
    }

    Err(TetherError::auth(
        "No authentication method available (require password or private_key)",
    ))
}
