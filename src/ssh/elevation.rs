//! Privilege elevation for SSH command execution
//!
//! Two escalation styles live here:
//!
//! - Command wrapping for the non-interactive variants (`sudo -n`, `su -c`),
//!   plus the shell escaping they depend on.
//! - The interactive handshake: scan a live PTY stream for the configured
//!   password prompt, inject the credential, and confirm the prompt does
//!   not come back. The handshake is generic over any async byte stream so
//!   it can be exercised against a scripted in-memory peer.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connection::ConnectionGuard;
use crate::error::{Result, TetherError};
use crate::options::Secret;
use crate::ssh::config::SshConfig;
use crate::ssh::connection_type::SshConnectionType;

/// Bytes of unmatched output kept while scanning for the prompt
const SCAN_BUFFER_LIMIT: usize = 4096;

/// Poll interval for reads during the handshake
const READ_STEP: Duration = Duration::from_millis(500);

/// Quiet period after an injection before escalation counts as settled
const SETTLE_WINDOW: Duration = Duration::from_millis(1500);

/// Scans a byte stream for a password prompt.
///
/// Transient state scoped to one escalation handshake: the compiled
/// pattern, a bounded rolling buffer of unmatched bytes, and a matched
/// flag. Bytes consumed before the match are escalation noise and are
/// discarded, never relayed as command output.
pub struct PromptScanner {
    pattern: regex::bytes::Regex,
    buffer: Vec<u8>,
    matched: bool,
}

impl PromptScanner {
    pub fn new(pattern: regex::bytes::Regex) -> Self {
        Self {
            pattern,
            buffer: Vec::new(),
            matched: false,
        }
    }

    /// Append bytes and evaluate the pattern against the rolling buffer.
    ///
    /// Returns `true` exactly once per arming, on the read that completes
    /// a match. The buffer is cleared on match so the prompt bytes are not
    /// re-matched later.
    pub fn feed(&mut self, bytes: &[u8]) -> bool {
        if self.matched {
            return false;
        }
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > SCAN_BUFFER_LIMIT {
            let excess = self.buffer.len() - SCAN_BUFFER_LIMIT;
            self.buffer.drain(..excess);
        }
        if self.pattern.is_match(&self.buffer) {
            self.matched = true;
            self.buffer.clear();
            true
        } else {
            false
        }
    }

    /// Whether the pattern has matched since the last (re)arming
    pub fn matched(&self) -> bool {
        self.matched
    }

    /// Restart scanning, e.g. after injecting a credential, to detect a
    /// reappearing prompt
    pub fn rearm(&mut self) {
        self.matched = false;
        self.buffer.clear();
    }
}

/// Drive the interactive escalation handshake on a live stream.
///
/// Reads incrementally until the scanner reports the prompt, writes the
/// secret followed by a line terminator, and keeps watching: a prompt that
/// reappears beyond the allowed retries means the credential was rejected.
/// Escalation settles once the stream stays quiet after an injection.
/// A read window that closes with no prompt seen is a hard failure, and
/// `disconnect()` unblocks the loop through the connection guard.
pub(crate) async fn negotiate<S>(
    stream: &mut S,
    scanner: &mut PromptScanner,
    secret: &Secret,
    retries: u32,
    window: Duration,
    guard: &ConnectionGuard,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let deadline = Instant::now() + window;
    let mut injections: u32 = 0;
    let mut last_injection: Option<Instant> = None;
    let mut buf = [0u8; 1024];

    loop {
        if let Some(at) = last_injection {
            if at.elapsed() >= SETTLE_WINDOW {
                debug!("Prompt did not reappear; escalation settled");
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            return if injections > 0 {
                // Window closed while waiting out the settle period
                Ok(())
            } else {
                Err(TetherError::elevation(format!(
                    "Password prompt not detected within {}ms",
                    window.as_millis()
                )))
            };
        }

        let read = tokio::select! {
            _ = guard.cancelled() => return Err(TetherError::ConnectionClosed),
            r = tokio::time::timeout(READ_STEP, stream.read(&mut buf)) => r,
        };

        match read {
            // Poll step elapsed; loop around to re-check the windows
            Err(_) => continue,
            Ok(Ok(0)) => {
                return Err(TetherError::elevation(
                    "Stream closed before escalation completed",
                ))
            }
            Ok(Ok(n)) => {
                if scanner.feed(&buf[..n]) {
                    if injections > retries {
                        return Err(TetherError::elevation(
                            "Password prompt reappeared: credential rejected",
                        ));
                    }
                    if injections > 0 {
                        warn!("Password prompt reappeared, injecting credential again");
                    } else {
                        debug!("Password prompt detected, injecting credential");
                    }
                    stream
                        .write_all(secret.expose().as_bytes())
                        .await
                        .map_err(|e| {
                            TetherError::elevation(format!("Failed to send credential: {}", e))
                        })?;
                    stream.write_all(b"\n").await.map_err(|e| {
                        TetherError::elevation(format!("Failed to send credential: {}", e))
                    })?;
                    stream.flush().await.map_err(|e| {
                        TetherError::elevation(format!("Failed to send credential: {}", e))
                    })?;
                    injections += 1;
                    scanner.rearm();
                    last_injection = Some(Instant::now());
                }
            }
            Ok(Err(e)) => {
                return Err(TetherError::connection(format!(
                    "Read failed during escalation: {}",
                    e
                )))
            }
        }
    }
}

/// The command launched over the PTY to start an interactive escalated
/// shell.
pub(crate) fn escalation_command(config: &SshConfig) -> String {
    let user = config.sudo_username.as_deref().unwrap_or("root");
    format!("sudo -u {} -i", user)
}

/// Wrap a command for the configured connection type.
///
/// The interactive variant returns the command untouched: its shell is
/// already escalated. The non-interactive variants wrap each command so no
/// prompt can ever appear (`sudo -n` fails instead of asking).
pub fn wrap_command(config: &SshConfig, command: &str) -> String {
    let user = config.sudo_username.as_deref().unwrap_or("root");
    let body = if config.sudo_override_umask {
        format!("umask 0022; {}", command)
    } else {
        command.to_string()
    };
    match config.connection_type {
        SshConnectionType::Regular | SshConnectionType::InteractiveSudo => command.to_string(),
        SshConnectionType::Sudo => format!(
            "sudo -n -u {} sh -c '{}'",
            user,
            escape_for_shell(&body)
        ),
        SshConnectionType::SuExec => {
            format!("su {} -c '{}'", user, escape_for_shell(&body))
        }
    }
}

/// Escapes a string for safe use in single-quoted shell contexts.
///
/// Replaces single quotes with the pattern `'"'"'` which:
/// 1. Ends the current single-quoted string
/// 2. Adds an escaped single quote
/// 3. Starts a new single-quoted string
pub fn escape_for_shell(s: &str) -> String {
    s.replace('\'', "'\"'\"'")
}
