//! The realtime connection service: one physical connection per process.
//!
//! Every realtime consumer - queue client, seat client, the notification
//! feed - multiplexes over a single STOMP-over-WebSocket connection owned by
//! a background actor. The service is explicitly constructed and explicitly
//! injected: [`RealtimeService::init`] on login, [`RealtimeService::teardown`]
//! on logout or user switch (a fresh `init` avoids leaking a stale token
//! binding). There is no module-level singleton.
//!
//! The actor owns an explicit connection state machine:
//!
//! ```text
//! Idle ──connect()──> Connecting ──ok──> Connected
//!                        │                   │ drop/error
//!                        └──err──> Backoff(n) <┘
//!                                    │ n = max
//!                                    ▼
//!                                  Failed ──connect()──> Connecting
//! ```
//!
//! Reconnection is owned here - the transport's built-in retry stays
//! disabled - with a linear ladder (3 s × attempt, 5 attempts) and
//! teardown-interruptible sleeps. Concurrent `connect()` calls coalesce onto
//! the single in-flight handshake and every caller is resolved exactly once.
//!
//! Subscription invariants: at most one live subscription per destination
//! (duplicates are logged no-ops), unsubscribing an unknown destination is a
//! no-op, and active subscriptions are re-issued after a reconnect so
//! consumer streams survive the gap.

mod actor;

use crate::config::Config;
use crate::environment::TokenProvider;
use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Explicit connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, no attempt in flight
    Idle,
    /// Handshake in flight
    Connecting,
    /// Live connection
    Connected,
    /// Waiting out the delay before reconnect attempt `attempt`
    Backoff {
        /// 1-based attempt number about to be made
        attempt: u32,
    },
    /// Reconnection exhausted; only an explicit `connect()` revives it
    Failed,
}

/// Commands from handles to the connection actor.
pub(crate) enum Command {
    Connect {
        done: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        destination: String,
        done: oneshot::Sender<Option<mpsc::Receiver<String>>>,
    },
    Unsubscribe {
        destination: String,
    },
    Teardown {
        done: oneshot::Sender<()>,
    },
}

/// Owner of the background connection actor.
///
/// Process-wide lifecycle: `init()` on login, `teardown()` on logout. Both
/// coordination clients share the same service through cloned
/// [`RealtimeHandle`]s.
pub struct RealtimeService {
    handle: RealtimeHandle,
    task: JoinHandle<()>,
}

impl RealtimeService {
    /// Spawn the connection actor.
    ///
    /// No connection attempt is made until the first
    /// [`RealtimeHandle::connect`].
    #[must_use]
    pub fn init(config: Config, tokens: Arc<dyn TokenProvider>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (connected_tx, connected_rx) = watch::channel(false);

        let task = tokio::spawn(actor::run(config, tokens, cmd_rx, connected_tx));

        Self {
            handle: RealtimeHandle {
                cmd_tx,
                connected: connected_rx,
            },
            task,
        }
    }

    /// A cloneable handle onto the shared connection.
    #[must_use]
    pub fn handle(&self) -> RealtimeHandle {
        self.handle.clone()
    }

    /// Tear the connection down and stop the actor.
    ///
    /// Cancels every subscription, fails pending waiters, and closes the
    /// transport. A later [`RealtimeService::init`] starts from scratch -
    /// required when switching authenticated users.
    pub async fn teardown(self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .handle
            .cmd_tx
            .send(Command::Teardown { done: done_tx })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
        self.task.abort();
    }
}

/// Cloneable handle for talking to the connection actor.
#[derive(Clone)]
pub struct RealtimeHandle {
    cmd_tx: mpsc::Sender<Command>,
    connected: watch::Receiver<bool>,
}

impl RealtimeHandle {
    /// Establish the connection, coalescing with any attempt in flight.
    ///
    /// Resolves immediately when already connected. When an attempt (or a
    /// reconnect ladder) is in flight the caller is queued and resolved by
    /// its outcome - no second handshake is started.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthMissing`] when the token provider has no token; no
    ///   attempt is made.
    /// - [`Error::Transport`] when the handshake fails.
    /// - [`Error::ReconnectExhausted`] when the backoff ladder ran out.
    pub async fn connect(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(Command::Connect { done: done_tx }).await?;
        done_rx.await.map_err(|_| service_gone())?
    }

    /// Subscribe to a destination, returning the inbound message stream.
    ///
    /// Returns `Ok(None)` without side effects when the destination is
    /// already subscribed (idempotence) or when not connected - subscribing
    /// requires an active connection and is a logged no-op otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Subscription`] only when the connection service is
    /// not running.
    pub async fn subscribe(&self, destination: impl Into<String>) -> Result<Option<mpsc::Receiver<String>>> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(Command::Subscribe {
            destination: destination.into(),
            done: done_tx,
        })
        .await?;
        done_rx.await.map_err(|_| service_gone())
    }

    /// Cancel the subscription for a destination; no-op when unknown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Subscription`] only when the connection service is
    /// not running.
    pub async fn unsubscribe(&self, destination: impl Into<String>) -> Result<()> {
        self.send(Command::Unsubscribe {
            destination: destination.into(),
        })
        .await
    }

    /// Whether the connection is currently live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Watch the connected flag (drives the UI's disconnected banner).
    #[must_use]
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| service_gone())
    }
}

fn service_gone() -> Error {
    Error::Subscription("connection service is not running".to_string())
}
