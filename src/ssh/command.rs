//! Command execution over SSH
//!
//! Two execution paths share the [`RemoteProcess`] surface:
//!
//! - Exec channels: each command gets a fresh session channel, giving the
//!   caller distinct stdout/stderr streams and the server-reported exit
//!   status.
//! - The escalated shell: interactive-sudo connections own one persistent
//!   PTY shell. Commands are written into it delimited by a per-command
//!   random completion marker that carries `$?`; output is relayed with
//!   the echo and marker stripped, and the shell is handed back for the
//!   next command. A PTY merges stderr into stdout, so the stderr stream
//!   closes empty on this path.

use std::sync::Arc;

use russh::client;
use russh::{Channel, ChannelMsg};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::connection::ConnectionGuard;
use crate::error::{Result, TetherError};
use crate::process::{byte_pipe, RemoteProcess};

/// Relay a fresh exec channel into a [`RemoteProcess`].
///
/// A background pump forwards channel data to the stdout/stderr pipes,
/// feeds stdin writes back into the channel, captures the exit status, and
/// unblocks on disconnect through the connection guard.
pub(crate) fn spawn_channel_process(
    mut channel: Channel<client::Msg>,
    guard: ConnectionGuard,
) -> RemoteProcess {
    let (mut out_wr, out_rd) = byte_pipe();
    let (mut err_wr, err_rd) = byte_pipe();
    let (stdin_wr, mut stdin_rd) = byte_pipe();
    let (exit_tx, exit_rx) = oneshot::channel();

    tokio::spawn(async move {
        enum Event {
            Msg(Option<ChannelMsg>),
            Stdin(std::io::Result<usize>),
            Cancelled,
        }

        let mut exit_code: Option<u32> = None;
        let mut stdin_open = true;
        let mut ibuf = [0u8; 4096];

        let result = loop {
            let event = tokio::select! {
                msg = channel.wait() => Event::Msg(msg),
                r = stdin_rd.read(&mut ibuf), if stdin_open => Event::Stdin(r),
                _ = guard.cancelled() => Event::Cancelled,
            };
            match event {
                Event::Cancelled => break Err(TetherError::ConnectionClosed),
                Event::Msg(None) => break Ok(exit_code),
                Event::Msg(Some(msg)) => match msg {
                    ChannelMsg::Data { data } => {
                        let _ = out_wr.write_all(&data).await;
                    }
                    ChannelMsg::ExtendedData { data, ext } => {
                        // ext == 1 is stderr
                        if ext == 1 {
                            let _ = err_wr.write_all(&data).await;
                        } else {
                            let _ = out_wr.write_all(&data).await;
                        }
                    }
                    ChannelMsg::ExitStatus { exit_status } => {
                        exit_code = Some(exit_status);
                    }
                    ChannelMsg::Close => break Ok(exit_code),
                    // Keep draining after Eof: the exit status may follow
                    ChannelMsg::Eof => {}
                    _ => {}
                },
                Event::Stdin(Ok(0)) => {
                    let _ = channel.eof().await;
                    stdin_open = false;
                }
                Event::Stdin(Ok(n)) => {
                    if channel.data(&ibuf[..n]).await.is_err() {
                        stdin_open = false;
                    }
                }
                Event::Stdin(Err(_)) => {
                    let _ = channel.eof().await;
                    stdin_open = false;
                }
            }
        };

        debug!("Command channel finished: {:?}", result);
        drop(out_wr);
        drop(err_wr);
        let _ = exit_tx.send(result);
    });

    RemoteProcess::new(Box::new(stdin_wr), Box::new(out_rd), Box::new(err_rd), exit_rx)
}

/// Run a command in the persistent escalated shell stream.
///
/// Takes the stream out of `slot` for the duration of the command and puts
/// it back once the completion marker is seen, keeping executions
/// sequential. On stream failure or disconnect the shell is not restored;
/// later executions report the connection unusable.
pub(crate) fn spawn_shell_process<S>(
    stream: S,
    slot: Arc<Mutex<Option<S>>>,
    command: String,
    guard: ConnectionGuard,
) -> Result<RemoteProcess>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let marker = format!("__TETHER_STATUS_{:08x}__", rand::random::<u32>());
    let status_pattern =
        regex::bytes::Regex::new(&format!("{} ([0-9]+)", regex::escape(&marker)))
            .map_err(|e| TetherError::connection(format!("Bad status marker: {}", e)))?;
    let line = format!("{}; printf '{} %s\\n' \"$?\"\n", command, marker);

    let (mut out_wr, out_rd) = byte_pipe();
    let (err_wr, err_rd) = byte_pipe();
    let (stdin_wr, mut stdin_rd) = byte_pipe();
    let (exit_tx, exit_rx) = oneshot::channel();
    // A PTY has no separate stderr; close it up front
    drop(err_wr);

    tokio::spawn(async move {
        let mut stream = stream;

        if let Err(e) = stream.write_all(line.as_bytes()).await {
            drop(out_wr);
            let _ = exit_tx.send(Err(TetherError::connection(format!(
                "Failed to send command to escalated shell: {}",
                e
            ))));
            return;
        }

        enum Event {
            Read(std::io::Result<usize>),
            Stdin(std::io::Result<usize>),
            Cancelled,
        }

        let mut acc: Vec<u8> = Vec::new();
        let mut echo_skipped = false;
        let mut stdin_open = true;
        let mut sbuf = [0u8; 4096];
        let mut ibuf = [0u8; 4096];
        // Never forward a tail that could hold a split marker
        let holdback = marker.len() + 16;

        let result = loop {
            let event = tokio::select! {
                r = stream.read(&mut sbuf) => Event::Read(r),
                r = stdin_rd.read(&mut ibuf), if stdin_open => Event::Stdin(r),
                _ = guard.cancelled() => Event::Cancelled,
            };
            match event {
                Event::Cancelled => break Err(TetherError::ConnectionClosed),
                Event::Stdin(Ok(0)) | Event::Stdin(Err(_)) => {
                    stdin_open = false;
                }
                Event::Stdin(Ok(n)) => {
                    if stream.write_all(&ibuf[..n]).await.is_err() {
                        break Err(TetherError::connection(
                            "Failed to write to escalated shell",
                        ));
                    }
                }
                Event::Read(Ok(0)) => {
                    break Err(TetherError::connection(
                        "Escalated shell closed during command execution",
                    ))
                }
                Event::Read(Err(e)) => {
                    break Err(TetherError::connection(format!(
                        "Escalated shell read failed: {}",
                        e
                    )))
                }
                Event::Read(Ok(n)) => {
                    acc.extend_from_slice(&sbuf[..n]);

                    if !echo_skipped {
                        // The PTY echoes the command line, marker included.
                        // Everything through the end of that echoed line is
                        // noise (leftover prompt bytes land before it).
                        match find_subslice(&acc, marker.as_bytes()) {
                            Some(at) => match find_byte(&acc[at..], b'\n') {
                                Some(nl) => {
                                    acc.drain(..at + nl + 1);
                                    echo_skipped = true;
                                }
                                None => continue,
                            },
                            None => {
                                trim_front(&mut acc, 8 * 1024);
                                continue;
                            }
                        }
                    }

                    if let Some(found) = status_pattern.captures(&acc) {
                        let code = found
                            .get(1)
                            .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
                            .and_then(|s| s.parse::<u32>().ok());
                        let cut = found.get(0).map(|m| m.start()).unwrap_or(acc.len());
                        let _ = out_wr.write_all(&acc[..cut]).await;
                        break Ok(code);
                    }
                    if acc.len() > holdback {
                        let flush = acc.len() - holdback;
                        let _ = out_wr.write_all(&acc[..flush]).await;
                        acc.drain(..flush);
                    }
                }
            }
        };

        drop(out_wr);
        match result {
            Ok(code) => {
                // Shell survives the command; hand it back for the next one
                *slot.lock().await = Some(stream);
                let _ = exit_tx.send(Ok(code));
            }
            Err(e) => {
                let _ = exit_tx.send(Err(e));
            }
        }
    });

    Ok(RemoteProcess::new(
        Box::new(stdin_wr),
        Box::new(out_rd),
        Box::new(err_rd),
        exit_rx,
    ))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn find_byte(haystack: &[u8], byte: u8) -> Option<usize> {
    haystack.iter().position(|b| *b == byte)
}

fn trim_front(buf: &mut Vec<u8>, limit: usize) {
    if buf.len() > limit {
        let excess = buf.len() - limit;
        buf.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_find_subslice() {
        assert_eq!(find_subslice(b"hello world", b"world"), Some(6));
        assert_eq!(find_subslice(b"hello", b"world"), None);
        assert_eq!(find_subslice(b"ab", b"abc"), None);
    }

    async fn scripted_shell_exchange(
        command: &str,
        server_script: impl FnOnce(Vec<u8>) -> Vec<u8> + Send + 'static,
    ) -> (Result<Option<u32>>, String, bool) {
        let (client, mut server) = duplex(64 * 1024);
        let slot = Arc::new(Mutex::new(None));
        let guard = ConnectionGuard::new();

        let process =
            spawn_shell_process(client, slot.clone(), command.to_string(), guard).unwrap();

        tokio::spawn(async move {
            // Read the full command line the way a PTY would, echo it back,
            // then emit the scripted response
            let mut line = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                if server.read_exact(&mut byte).await.is_err() {
                    return;
                }
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
            }
            let response = server_script(line.clone());
            let mut echoed = line;
            // PTYs echo the newline as CRLF
            echoed.pop();
            echoed.extend_from_slice(b"\r\n");
            server.write_all(&echoed).await.unwrap();
            server.write_all(&response).await.unwrap();
            // Hold the shell open; the pump returns it to the slot
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        });

        let output = process.wait_with_output().await;
        let restored = slot.lock().await.is_some();
        match output {
            Ok(output) => (Ok(output.exit_code), output.stdout, restored),
            Err(e) => (Err(e), String::new(), restored),
        }
    }

    #[tokio::test]
    async fn test_shell_process_strips_echo_and_marker() {
        let (exit, stdout, restored) = scripted_shell_exchange("ls /srv", move |line| {
            // Recover the marker from the command line the pump sent
            let text = String::from_utf8(line).unwrap();
            let marker_start = text.find("__TETHER_STATUS_").unwrap();
            let marker_end = text[marker_start..].find("__ ").unwrap() + marker_start + 2;
            let marker = &text[marker_start..marker_end];
            format!("app.conf\r\ndata\r\n{} 0\r\nprompt$ ", marker).into_bytes()
        })
        .await;

        assert_eq!(exit.unwrap(), Some(0));
        assert_eq!(stdout, "app.conf\r\ndata\r\n");
        assert!(restored, "shell should be returned for the next command");
    }

    #[tokio::test]
    async fn test_shell_process_reports_exit_code() {
        let (exit, stdout, restored) = scripted_shell_exchange("false", move |line| {
            let text = String::from_utf8(line).unwrap();
            let marker_start = text.find("__TETHER_STATUS_").unwrap();
            let marker_end = text[marker_start..].find("__ ").unwrap() + marker_start + 2;
            let marker = &text[marker_start..marker_end];
            format!("{} 1\r\n", marker).into_bytes()
        })
        .await;

        assert_eq!(exit.unwrap(), Some(1));
        assert_eq!(stdout, "");
        assert!(restored);
    }

    #[tokio::test]
    async fn test_shell_process_closed_stream_is_an_error() {
        let (client, server) = duplex(1024);
        drop(server);
        let slot = Arc::new(Mutex::new(None));
        let guard = ConnectionGuard::new();
        let process =
            spawn_shell_process(client, slot.clone(), "true".to_string(), guard).unwrap();
        assert!(process.wait_with_output().await.is_err());
        assert!(slot.lock().await.is_none());
    }
}
