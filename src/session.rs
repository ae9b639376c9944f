/*
 * SHM RELAY - REFRESH SESSION
 * =================================================================
 * Component Name: src/session.rs
 * Core Responsibility: One task per peer that owns the buffer access and runs periodic refreshes and user writes in turn.
 * Design Pattern: Actor (mpsc requests + watch updates)
 * =================================================================
 */

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::{RelayError, RelayResult};
use crate::transport::BufferAccess;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(500);
const REQUEST_QUEUE: usize = 32;

enum SessionRequest {
    Read(oneshot::Sender<RelayResult<String>>),
    Write(String, oneshot::Sender<RelayResult<()>>),
    Refresh,
    Shutdown,
}

/// Cloneable front end of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    requests: mpsc::Sender<SessionRequest>,
    updates: watch::Receiver<String>,
}

impl SessionHandle {
    pub async fn read(&self) -> RelayResult<String> {
        let (tx, rx) = oneshot::channel();
        self.submit(SessionRequest::Read(tx)).await?;
        rx.await.map_err(|_| RelayError::NotConnected)?
    }

    pub async fn write(&self, text: impl Into<String>) -> RelayResult<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(SessionRequest::Write(text.into(), tx)).await?;
        rx.await.map_err(|_| RelayError::NotConnected)?
    }

    /// Ask for an out-of-schedule refresh; does not wait for it.
    pub async fn refresh(&self) -> RelayResult<()> {
        self.submit(SessionRequest::Refresh).await
    }

    pub async fn shutdown(&self) {
        let _ = self.requests.send(SessionRequest::Shutdown).await;
    }

    /// Receiver notified whenever a refresh observes new content.
    pub fn updates(&self) -> watch::Receiver<String> {
        self.updates.clone()
    }

    /// Last content seen by the session.
    pub fn current(&self) -> String {
        self.updates.borrow().clone()
    }

    async fn submit(&self, request: SessionRequest) -> RelayResult<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| RelayError::NotConnected)
    }
}

pub struct RefreshSession<B> {
    access: B,
    interval: Duration,
    content: watch::Sender<String>,
}

impl<B> RefreshSession<B>
where
    B: BufferAccess + 'static,
{
    /// Start the session task. The access object is handed back when it ends.
    pub fn spawn(access: B, interval: Duration) -> (SessionHandle, JoinHandle<B>) {
        let (requests, inbox) = mpsc::channel(REQUEST_QUEUE);
        let (content, updates) = watch::channel(String::new());

        let session = RefreshSession { access, interval, content };
        let task = tokio::spawn(session.run(inbox));
        (SessionHandle { requests, updates }, task)
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<SessionRequest>) -> B {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("SESSION: started on '{}' (every {:?})", self.access.name(), self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.refresh().await,
                request = inbox.recv() => match request {
                    Some(SessionRequest::Refresh) => self.refresh().await,
                    Some(SessionRequest::Read(reply)) => {
                        let result = self.access.read_text().await;
                        if let Ok(text) = &result {
                            self.publish(text.clone());
                        }
                        let _ = reply.send(result);
                    }
                    Some(SessionRequest::Write(text, reply)) => {
                        let result = self.access.write_text(&text).await;
                        if result.is_ok() {
                            // The writer already knows; record without notifying.
                            let written = text.trim_end().to_string();
                            self.content.send_if_modified(|current| {
                                *current = written;
                                false
                            });
                        }
                        let _ = reply.send(result);
                    }
                    Some(SessionRequest::Shutdown) | None => break,
                },
            }
        }

        info!("SESSION: stopped on '{}'", self.access.name());
        self.access
    }

    /// Failures are expected here (host busy, link down) and retried next tick.
    async fn refresh(&mut self) {
        match self.access.read_text().await {
            Ok(text) => self.publish(text),
            Err(e) => debug!("SESSION: refresh of '{}' failed: {}", self.access.name(), e),
        }
    }

    fn publish(&self, text: String) {
        self.content.send_if_modified(|current| {
            if *current != text {
                *current = text;
                true
            } else {
                false
            }
        });
    }
}
