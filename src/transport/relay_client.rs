/*
 * SHM RELAY - REMOTE RELAY CLIENT
 * =================================================================
 * Component Name: src/transport/relay_client.rs
 * Core Responsibility: Reach a host's buffer over TCP without mapping memory locally.
 * Design Pattern: Connection State Machine (Disconnected -> Connecting -> Handshaking -> Ready)
 * =================================================================
 */

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::framing::Command;
use super::{BufferAccess, Handshake, Response};
use crate::buffer::MAX_DATA_SIZE;
use crate::error::{RelayError, RelayResult};

/// Longest response we accept: `OK ` + a full payload (with replacement
/// characters it can grow) + newline.
const MAX_RESPONSE_LEN: usize = 4 * MAX_DATA_SIZE + 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTimeouts {
    pub connect: Duration,
    pub handshake: Duration,
    pub response: Duration,
}

impl Default for RelayTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            handshake: Duration::from_secs(15),
            response: Duration::from_secs(10),
        }
    }
}

/// Client-side handle on a host's buffer. Never reconnects by itself.
#[derive(Debug)]
pub struct RemoteBuffer {
    addr: String,
    expected_name: String,
    timeouts: RelayTimeouts,
    state: RelayState,
    stream: Option<TcpStream>,
    handshake: Option<Handshake>,
}

impl RemoteBuffer {
    pub fn new(addr: impl Into<String>, expected_name: impl Into<String>, timeouts: RelayTimeouts) -> Self {
        Self {
            addr: addr.into(),
            expected_name: expected_name.into(),
            timeouts,
            state: RelayState::Disconnected,
            stream: None,
            handshake: None,
        }
    }

    /// `new` followed by `connect`.
    pub async fn open(
        addr: impl Into<String>,
        expected_name: impl Into<String>,
        timeouts: RelayTimeouts,
    ) -> RelayResult<Self> {
        let mut remote = Self::new(addr, expected_name, timeouts);
        remote.connect().await?;
        Ok(remote)
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == RelayState::Ready
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn name(&self) -> &str {
        &self.expected_name
    }

    /// Layout announced by the host, once connected.
    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    /// Open the socket, read and check the handshake.
    pub async fn connect(&mut self) -> RelayResult<Handshake> {
        if self.stream.is_some() {
            self.close().await;
        }

        self.state = RelayState::Connecting;
        debug!("RELAY_CLIENT: connecting to {}", self.addr);

        let stream = match tokio::time::timeout(self.timeouts.connect, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = RelayState::Disconnected;
                return Err(RelayError::Io(e));
            }
            Err(_) => {
                self.state = RelayState::Disconnected;
                return Err(RelayError::ConnectTimeout(self.addr.clone()));
            }
        };
        let _ = stream.set_nodelay(true);
        self.stream = Some(stream);
        self.state = RelayState::Handshaking;

        let line = match self
            .read_line(self.timeouts.handshake, RelayError::HandshakeTimeout)
            .await
        {
            Ok(line) => line,
            Err(e) => {
                self.close().await;
                return Err(e);
            }
        };

        let handshake = match Handshake::parse(&String::from_utf8_lossy(&line)) {
            Ok(hs) => hs,
            Err(e) => {
                self.close().await;
                return Err(e);
            }
        };

        if handshake.name != self.expected_name {
            warn!(
                "RELAY_CLIENT: {} serves '{}', expected '{}'",
                self.addr, handshake.name, self.expected_name
            );
            self.close().await;
            return Err(RelayError::NameMismatch {
                expected: self.expected_name.clone(),
                actual: handshake.name,
            });
        }

        info!("RELAY_CLIENT: connected to {} ({})", self.addr, handshake);
        self.state = RelayState::Ready;
        self.handshake = Some(handshake.clone());
        Ok(handshake)
    }

    /// Current content of the host's buffer.
    pub async fn remote_read(&mut self) -> RelayResult<String> {
        match self.exchange(Command::Read, RelayError::ReadTimeout).await? {
            Response::Done => Ok(String::new()),
            Response::Content(text) => Ok(text),
            Response::Error(message) => Err(RelayError::ServerError(message)),
        }
    }

    /// Replace the host's buffer content.
    pub async fn remote_write(&mut self, text: &str) -> RelayResult<()> {
        let data = text.trim_end().as_bytes();
        if data.len() > MAX_DATA_SIZE {
            return Err(RelayError::PayloadTooLarge {
                size: data.len(),
                max: MAX_DATA_SIZE,
            });
        }

        let command = Command::Write(Bytes::copy_from_slice(data));
        match self.exchange(command, RelayError::WriteTimeout).await? {
            Response::Done => Ok(()),
            Response::Content(extra) if extra.trim().is_empty() => Ok(()),
            Response::Content(extra) => {
                self.fail(RelayError::ProtocolViolation(format!("unexpected WRITE reply: OK {}", extra)))
                    .await
            }
            Response::Error(message) => Err(RelayError::ServerError(message)),
        }
    }

    /// Send a legacy refresh marker (`DONE` or `SYNC_UPDATE`); no reply is expected.
    pub async fn notify(&mut self, command: Command) -> RelayResult<()> {
        if !matches!(command, Command::Done | Command::SyncUpdate) {
            return Err(RelayError::ProtocolViolation(format!("{} expects a reply", command.verb())));
        }
        let frame = command.encode();
        let sent = self.ready_stream()?.write_all(&frame).await;
        if let Err(e) = sent {
            return self.fail(RelayError::Io(e)).await;
        }
        Ok(())
    }

    /// Shut the socket down and return to Disconnected.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("RELAY_CLIENT: shutdown of {} failed: {}", self.addr, e);
            }
        }
        self.state = RelayState::Disconnected;
    }

    // =================================================================
    // Internals
    // =================================================================

    fn ready_stream(&mut self) -> RelayResult<&mut TcpStream> {
        match (self.state, self.stream.as_mut()) {
            (RelayState::Ready, Some(stream)) => Ok(stream),
            _ => Err(RelayError::NotConnected),
        }
    }

    /// One request/response round trip.
    async fn exchange(&mut self, command: Command, on_timeout: RelayError) -> RelayResult<Response> {
        let frame = command.encode();
        let sent = self.ready_stream()?.write_all(&frame).await;
        if let Err(e) = sent {
            return self.fail(RelayError::Io(e)).await;
        }

        let line = match self.read_line(self.timeouts.response, on_timeout).await {
            Ok(line) => line,
            Err(e) => return self.fail(e).await,
        };

        match Response::parse(&line) {
            Ok(response) => Ok(response),
            Err(e) => self.fail(e).await,
        }
    }

    /// Accumulate until the received bytes end with a newline; the newline is
    /// stripped. Content may itself contain newlines, so the host is expected
    /// to send each response in one write.
    async fn read_line(&mut self, limit: Duration, on_timeout: RelayError) -> RelayResult<BytesMut> {
        let stream = self.stream.as_mut().ok_or(RelayError::NotConnected)?;
        let mut buf = BytesMut::with_capacity(MAX_DATA_SIZE + 16);

        let receive = async {
            loop {
                let n = match stream.read_buf(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => return Err(RelayError::Io(e)),
                };
                if n == 0 {
                    return Err(RelayError::ConnectionClosed);
                }
                if buf.ends_with(b"\n") {
                    return Ok(());
                }
                if buf.len() > MAX_RESPONSE_LEN {
                    return Err(RelayError::ProtocolViolation(format!(
                        "response exceeds {} bytes without terminator",
                        MAX_RESPONSE_LEN
                    )));
                }
            }
        };

        match tokio::time::timeout(limit, receive).await {
            Ok(Ok(())) => {
                buf.truncate(buf.len() - 1);
                Ok(buf)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(on_timeout),
        }
    }

    /// Transport failures leave the socket unusable; logical ones do not.
    async fn fail<T>(&mut self, error: RelayError) -> RelayResult<T> {
        if error.is_transport_failure() {
            warn!("RELAY_CLIENT: dropping connection to {}: {}", self.addr, error);
            self.close().await;
        }
        Err(error)
    }
}

#[async_trait::async_trait]
impl BufferAccess for RemoteBuffer {
    fn name(&self) -> &str {
        RemoteBuffer::name(self)
    }

    async fn read_text(&mut self) -> RelayResult<String> {
        self.remote_read().await
    }

    async fn write_text(&mut self, text: &str) -> RelayResult<()> {
        self.remote_write(text).await
    }
}
