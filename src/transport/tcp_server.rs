// Relay Port

/*
 * SHM RELAY - TCP CONNECTION MANAGER
 * =================================================================
 * Component Name: src/transport/tcp_server.rs
 * Core Responsibility: Expose the local buffer to remote peers: handshake, then READ/WRITE commands.
 * Design Pattern: Accept Loop + Task per Connection
 * =================================================================
 */

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::framing::{Command, FrameDecoder};
use super::{run_blocking, Handshake, Response};
use crate::buffer::LocalBuffer;
use crate::error::{RelayError, RelayResult};
use crate::utils::logger::log_relay_command;

const EVENT_CAPACITY: usize = 64;

// =================================================================
// Host events (consumed by whoever displays the host's view)
// =================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEventKind {
    Connected,
    /// A remote WRITE landed in the buffer.
    Written { bytes: usize },
    /// DONE / SYNC_UPDATE marker.
    SyncRequested,
    Disconnected,
}

impl HostEventKind {
    /// Whether the local view should re-read the buffer.
    pub fn wants_refresh(&self) -> bool {
        matches!(self, HostEventKind::Written { .. } | HostEventKind::SyncRequested)
    }
}

#[derive(Debug, Clone)]
pub struct HostEvent {
    pub peer: SocketAddr,
    pub kind: HostEventKind,
    pub at: DateTime<Utc>,
}

impl HostEvent {
    fn new(peer: SocketAddr, kind: HostEventKind) -> Self {
        Self { peer, kind, at: Utc::now() }
    }
}

// =================================================================
// Connection manager
// =================================================================

pub struct ConnectionManager {
    listener: TcpListener,
    buffer: Arc<LocalBuffer>,
    events: broadcast::Sender<HostEvent>,
}

impl ConnectionManager {
    /// Bind the relay port. Use port 0 for an ephemeral one.
    pub async fn bind(addr: SocketAddr, buffer: Arc<LocalBuffer>) -> RelayResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Bootstrap(format!("TCP bind error on {}: {}", addr, e)))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            "RELAY: listening on {} for buffer '{}'",
            listener.local_addr()?,
            buffer.name()
        );
        Ok(Self { listener, buffer, events })
    }

    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handshake(&self) -> Handshake {
        Handshake::for_buffer(self.buffer.name())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    /// Accept until `shutdown` resolves, then abort every open connection.
    pub async fn run_until<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let ConnectionManager { listener, buffer, events } = self;
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("RELAY: shutting down, closing {} connection(s)", connections.len());
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        info!("RELAY: new connection from {}", peer);
                        let buffer = Arc::clone(&buffer);
                        let events = events.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(socket, peer, buffer, events.clone()).await {
                                warn!("RELAY: connection {} closed with error: {}", peer, e);
                            }
                            let _ = events.send(HostEvent::new(peer, HostEventKind::Disconnected));
                        });
                    }
                    Err(e) => error!("RELAY: accept error: {}", e),
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("RELAY: connection task failed: {}", e);
                    }
                }
            }
        }

        connections.shutdown().await;
        Ok(())
    }

    /// Run the accept loop on its own task.
    pub fn spawn(self) -> RelayResult<ServerHandle> {
        let addr = self.local_addr()?;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(self.run_until(async move {
            let _ = stop_rx.await;
        }));
        Ok(ServerHandle { addr, stop: Some(stop_tx), task })
    }
}

/// Handle to a spawned [`ConnectionManager`].
pub struct ServerHandle {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<RelayResult<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, drop all connections, wait for the loop to exit.
    pub async fn shutdown(mut self) -> RelayResult<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(RelayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))),
        }
    }
}

// =================================================================
// Per-connection session
// =================================================================

async fn handle_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    buffer: Arc<LocalBuffer>,
    events: broadcast::Sender<HostEvent>,
) -> RelayResult<()> {
    let _ = socket.set_nodelay(true);

    // 1. Handshake
    let handshake = Handshake::for_buffer(buffer.name());
    socket.write_all(handshake.encode().as_bytes()).await?;
    let _ = events.send(HostEvent::new(peer, HostEventKind::Connected));

    // 2. Command loop
    let mut decoder = FrameDecoder::new();
    loop {
        let n = socket.read_buf(decoder.buffer_mut()).await?;
        if n == 0 {
            if !decoder.is_idle() {
                match decoder.body_remaining() {
                    Some(missing) => debug!("RELAY: {} hung up {} bytes short of a WRITE", peer, missing),
                    None => debug!("RELAY: {} hung up mid-command", peer),
                }
            }
            break;
        }

        while let Some(command) = decoder.decode().map_err(|e| {
            log_relay_command(&peer, "INVALID", &e.to_string());
            e
        })? {
            if let Some(response) = dispatch(command, peer, &buffer, &events).await {
                socket.write_all(&response.encode()).await?;
            }
        }
    }

    info!("RELAY: session with {} closed", peer);
    Ok(())
}

async fn dispatch(
    command: Command,
    peer: SocketAddr,
    buffer: &Arc<LocalBuffer>,
    events: &broadcast::Sender<HostEvent>,
) -> Option<Response> {
    let verb = command.verb();

    let response = match command {
        Command::Read => {
            let buffer = Arc::clone(buffer);
            match run_blocking(move || buffer.read()).await {
                Ok(text) => Response::Content(text),
                Err(e) => Response::Error(e.to_string()),
            }
        }
        Command::Write(payload) => {
            let text = String::from_utf8_lossy(&payload).into_owned();
            let target = Arc::clone(buffer);
            match run_blocking(move || target.write(&text)).await {
                Ok(()) => {
                    let _ = events.send(HostEvent::new(peer, HostEventKind::Written { bytes: payload.len() }));
                    Response::Done
                }
                Err(e) => Response::Error(e.to_string()),
            }
        }
        Command::Done | Command::SyncUpdate => {
            let _ = events.send(HostEvent::new(peer, HostEventKind::SyncRequested));
            log_relay_command(&peer, verb, "refresh");
            return None;
        }
    };

    let outcome = match &response {
        Response::Error(message) => message.as_str(),
        _ => "ok",
    };
    log_relay_command(&peer, verb, outcome);
    Some(response)
}
