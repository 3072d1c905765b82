//! Background task that owns the physical connection.
//!
//! All socket I/O, the subscription registry, and the reconnect ladder live
//! in one task; handles talk to it through a command mailbox. Single
//! ownership means no locking around the socket and a natural serialization
//! point: while a handshake is in flight, later `connect()` commands wait in
//! the mailbox and observe its outcome instead of starting a second attempt.

use super::{Command, ConnectionState};
use crate::config::Config;
use crate::environment::TokenProvider;
use crate::error::Error;
use crate::stomp::{self, Frame};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use turnstile_runtime::backoff::BackoffPolicy;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Per-destination inbound channel capacity. A consumer that falls this far
/// behind starts losing frames (logged), not memory.
const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 256;

/// What the main loop should do next.
enum Flow {
    /// Keep looping in the current offline state
    Continue,
    /// A connection was established; drive it
    Online(Box<WsStream>),
    /// Teardown requested or mailbox closed
    Shutdown,
}

/// Entry point spawned by `RealtimeService::init`.
pub(crate) async fn run(
    config: Config,
    tokens: Arc<dyn TokenProvider>,
    cmd_rx: mpsc::Receiver<Command>,
    connected_tx: watch::Sender<bool>,
) {
    let policy = BackoffPolicy::linear(config.reconnect.base_delay, config.reconnect.max_attempts);
    let mut actor = Actor {
        config,
        tokens,
        cmd_rx,
        connected_tx,
        registry: HashMap::new(),
        waiters: Vec::new(),
        state: ConnectionState::Idle,
        reconnect_attempts: 0,
        policy,
    };

    loop {
        let flow = match actor.state {
            ConnectionState::Backoff { attempt } => actor.backoff_then_connect(attempt).await,
            _ => actor.await_command().await,
        };

        match flow {
            Flow::Shutdown => return,
            Flow::Continue => {},
            Flow::Online(socket) => {
                if matches!(actor.drive(*socket).await, Flow::Shutdown) {
                    return;
                }
            },
        }
    }
}

struct Actor {
    config: Config,
    tokens: Arc<dyn TokenProvider>,
    cmd_rx: mpsc::Receiver<Command>,
    connected_tx: watch::Sender<bool>,
    /// destination → inbound frame channel; at most one entry per destination
    registry: HashMap<String, mpsc::Sender<String>>,
    /// `connect()` callers waiting on the in-flight attempt or ladder
    waiters: Vec<oneshot::Sender<crate::error::Result<()>>>,
    state: ConnectionState,
    /// Reconnect attempts made since the last successful connection
    reconnect_attempts: u32,
    policy: BackoffPolicy,
}

impl Actor {
    // ── Offline states ──────────────────────────────────────────────────

    /// Idle/Failed: nothing to do until a command arrives.
    async fn await_command(&mut self) -> Flow {
        let Some(cmd) = self.cmd_rx.recv().await else {
            return Flow::Shutdown;
        };
        match cmd {
            Command::Connect { done } => {
                self.waiters.push(done);
                self.reconnect_attempts = 0;
                self.try_connect().await
            },
            Command::Subscribe { destination, done } => {
                tracing::warn!(%destination, "subscribe ignored: not connected");
                let _ = done.send(None);
                Flow::Continue
            },
            Command::Unsubscribe { destination } => {
                self.registry.remove(&destination);
                Flow::Continue
            },
            Command::Teardown { done } => {
                self.teardown_offline();
                let _ = done.send(());
                Flow::Shutdown
            },
        }
    }

    /// Backoff: wait out the delay (still answering commands), then retry.
    async fn backoff_then_connect(&mut self, attempt: u32) -> Flow {
        let delay = self.policy.delay_for_attempt(attempt);
        tracing::info!(attempt, delay_ms = delay.as_millis(), "reconnecting after delay");
        metrics::counter!("turnstile.connection.reconnect_attempts").increment(1);

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    // connect() during backoff coalesces onto the ladder.
                    Some(Command::Connect { done }) => self.waiters.push(done),
                    Some(Command::Subscribe { destination, done }) => {
                        tracing::warn!(%destination, "subscribe ignored: not connected");
                        let _ = done.send(None);
                    },
                    Some(Command::Unsubscribe { destination }) => {
                        self.registry.remove(&destination);
                    },
                    Some(Command::Teardown { done }) => {
                        self.teardown_offline();
                        let _ = done.send(());
                        return Flow::Shutdown;
                    },
                    None => return Flow::Shutdown,
                },

                () = &mut sleep => break,
            }
        }

        self.try_connect().await
    }

    /// One handshake attempt; the token is re-queried every time since
    /// tokens rotate.
    async fn try_connect(&mut self) -> Flow {
        let Some(token) = self.tokens.access_token() else {
            // Auth-missing is terminal: report immediately, make no attempt.
            tracing::warn!("no access token available, not connecting");
            self.fail_waiters(|| Error::AuthMissing);
            self.state = ConnectionState::Failed;
            return Flow::Continue;
        };

        self.state = ConnectionState::Connecting;

        match self.handshake(&token).await {
            Ok(mut socket) => {
                tracing::info!("realtime connection established");
                self.state = ConnectionState::Connected;
                self.reconnect_attempts = 0;
                let _ = self.connected_tx.send(true);
                for done in self.waiters.drain(..) {
                    let _ = done.send(Ok(()));
                }
                if self.resubscribe_all(&mut socket).await {
                    Flow::Online(Box::new(socket))
                } else {
                    // Lost the socket while re-issuing subscriptions.
                    self.connection_lost("resubscribe failed");
                    Flow::Continue
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "connection attempt failed");
                metrics::counter!("turnstile.connection.failures").increment(1);
                self.connection_lost("handshake failed");
                Flow::Continue
            },
        }
    }

    /// WebSocket upgrade plus STOMP CONNECT/CONNECTED exchange.
    async fn handshake(&self, token: &str) -> crate::error::Result<WsStream> {
        let mut request = self
            .config
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Transport(format!("invalid websocket url: {e}")))?;

        let host = request
            .uri()
            .host()
            .unwrap_or("localhost")
            .to_string();

        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::Transport(format!("invalid bearer token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (mut socket, _response) =
            tokio::time::timeout(self.config.request_timeout, connect_async(request))
                .await
                .map_err(|_| Error::Timeout)?
                .map_err(|e| Error::Transport(e.to_string()))?;

        let heartbeat_ms = u64::try_from(self.config.heartbeat.as_millis()).unwrap_or(4000);
        let connect = Frame::connect(&host, token, heartbeat_ms);
        socket
            .send(Message::Text(connect.serialize()))
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        tokio::time::timeout(self.config.request_timeout, wait_for_connected(&mut socket))
            .await
            .map_err(|_| Error::Timeout)??;

        Ok(socket)
    }

    /// Re-issue SUBSCRIBE for every registered destination after a
    /// reconnect, so consumer streams survive the gap. Returns false if the
    /// socket died mid-way.
    async fn resubscribe_all(&mut self, socket: &mut WsStream) -> bool {
        for destination in self.registry.keys() {
            tracing::debug!(%destination, "re-subscribing after reconnect");
            let frame = Frame::subscribe(destination);
            if let Err(err) = socket.send(Message::Text(frame.serialize())).await {
                tracing::warn!(%destination, error = %err, "re-subscribe failed");
                return false;
            }
        }
        true
    }

    // ── Connected state ─────────────────────────────────────────────────

    /// Drive a live connection until it drops or teardown is requested.
    async fn drive(&mut self, mut socket: WsStream) -> Flow {
        let mut beat = tokio::time::interval(self.config.heartbeat);
        beat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it.
        beat.tick().await;

        // The server promises beats at the same cadence; twice the interval
        // with no traffic means the link is dead.
        let stale_after = self.config.heartbeat * 2 + Duration::from_millis(500);
        let mut last_received = Instant::now();

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Connect { done }) => {
                        // Already connected: resolve immediately.
                        let _ = done.send(Ok(()));
                    },
                    Some(Command::Subscribe { destination, done }) => {
                        let outcome = self.subscribe(&mut socket, destination).await;
                        match outcome {
                            Ok(rx) => { let _ = done.send(rx); },
                            Err(()) => {
                                let _ = done.send(None);
                                self.connection_lost("send failed");
                                return Flow::Continue;
                            },
                        }
                    },
                    Some(Command::Unsubscribe { destination }) => {
                        if self.registry.remove(&destination).is_some() {
                            let frame = Frame::unsubscribe(&destination);
                            if socket.send(Message::Text(frame.serialize())).await.is_err() {
                                self.connection_lost("send failed");
                                return Flow::Continue;
                            }
                        }
                    },
                    Some(Command::Teardown { done }) => {
                        self.graceful_close(&mut socket).await;
                        let _ = done.send(());
                        return Flow::Shutdown;
                    },
                    None => {
                        self.graceful_close(&mut socket).await;
                        return Flow::Shutdown;
                    },
                },

                frame = socket.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_received = Instant::now();
                        self.handle_text(&text);
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        last_received = Instant::now();
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            self.connection_lost("pong failed");
                            return Flow::Continue;
                        }
                    },
                    Some(Ok(Message::Pong(_))) => {
                        last_received = Instant::now();
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        self.connection_lost("closed by server");
                        return Flow::Continue;
                    },
                    Some(Ok(_)) => {
                        // Binary and raw frames are not part of the contract.
                        last_received = Instant::now();
                    },
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "websocket error");
                        self.connection_lost("websocket error");
                        return Flow::Continue;
                    },
                },

                _ = beat.tick() => {
                    if last_received.elapsed() > stale_after {
                        tracing::warn!("no traffic within heartbeat window, dropping connection");
                        self.connection_lost("heartbeat timeout");
                        return Flow::Continue;
                    }
                    // A STOMP heart-beat is a lone EOL.
                    if socket.send(Message::Text("\n".to_string())).await.is_err() {
                        self.connection_lost("heartbeat send failed");
                        return Flow::Continue;
                    }
                },
            }
        }
    }

    /// Register a subscription: at most one per destination.
    ///
    /// `Ok(None)` means no new subscription was made (duplicate);
    /// `Err(())` means the socket write failed.
    async fn subscribe(
        &mut self,
        socket: &mut WsStream,
        destination: String,
    ) -> Result<Option<mpsc::Receiver<String>>, ()> {
        if self.registry.contains_key(&destination) {
            tracing::debug!(%destination, "already subscribed, ignoring");
            return Ok(None);
        }

        let frame = Frame::subscribe(&destination);
        if socket.send(Message::Text(frame.serialize())).await.is_err() {
            return Err(());
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_CAPACITY);
        self.registry.insert(destination, tx);
        Ok(Some(rx))
    }

    /// Route one inbound text message.
    fn handle_text(&mut self, text: &str) {
        let frame = match Frame::parse(text) {
            Ok(Some(frame)) => frame,
            // Heart-beat.
            Ok(None) => return,
            Err(err) => {
                // Malformed frames are logged and dropped; they must never
                // take down the connection.
                tracing::warn!(error = %err, "dropping malformed frame");
                metrics::counter!("turnstile.connection.frames_dropped").increment(1);
                return;
            },
        };

        match frame.command {
            stomp::Command::Message => self.route_message(&frame),
            stomp::Command::Error => {
                tracing::warn!(
                    message = frame.header("message").unwrap_or("<none>"),
                    "server error frame"
                );
            },
            other => {
                tracing::debug!(command = other.as_str(), "ignoring unexpected frame");
            },
        }
    }

    fn route_message(&mut self, frame: &Frame) {
        let Some(destination) = frame.destination() else {
            tracing::warn!("MESSAGE frame without destination, dropping");
            return;
        };

        let Some(tx) = self.registry.get(destination) else {
            tracing::debug!(%destination, "no subscription for destination");
            return;
        };

        match tx.try_send(frame.body.clone()) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(%destination, "subscriber lagging, dropping frame");
                metrics::counter!("turnstile.connection.frames_dropped").increment(1);
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Consumer went away without unsubscribing.
                tracing::debug!(%destination, "subscriber gone, removing subscription");
                self.registry.remove(destination);
            },
        }
    }

    // ── Failure and teardown paths ──────────────────────────────────────

    /// Transition after losing (or failing to establish) the connection.
    ///
    /// Schedules the next rung of the ladder, or goes terminal once the
    /// attempt cap is reached. Waiters are resolved only by terminal
    /// outcomes, so a caller queued mid-ladder is answered by the ladder's
    /// result rather than by each transient failure.
    fn connection_lost(&mut self, reason: &str) {
        let _ = self.connected_tx.send(false);

        if self.policy.should_retry(self.reconnect_attempts) {
            self.reconnect_attempts += 1;
            tracing::info!(
                reason,
                attempt = self.reconnect_attempts,
                "connection lost, scheduling reconnect"
            );
            self.state = ConnectionState::Backoff {
                attempt: self.reconnect_attempts,
            };
        } else {
            let attempts = self.policy.max_attempts();
            tracing::error!(reason, attempts, "reconnection exhausted");
            self.state = ConnectionState::Failed;
            self.fail_waiters(|| Error::ReconnectExhausted { attempts });
        }
    }

    fn fail_waiters(&mut self, err: impl Fn() -> Error) {
        for done in self.waiters.drain(..) {
            let _ = done.send(Err(err()));
        }
    }

    /// Graceful teardown of a live connection: cancel every subscription,
    /// say goodbye, close.
    async fn graceful_close(&mut self, socket: &mut WsStream) {
        for destination in std::mem::take(&mut self.registry).into_keys() {
            let frame = Frame::unsubscribe(&destination);
            let _ = socket.send(Message::Text(frame.serialize())).await;
        }
        let _ = socket.send(Message::Text(Frame::disconnect().serialize())).await;
        let _ = socket.close(None).await;
        self.reset();
    }

    /// Teardown while offline: nothing on the wire to say goodbye to.
    fn teardown_offline(&mut self) {
        self.registry.clear();
        self.reset();
    }

    /// After this the actor state is as if freshly constructed.
    fn reset(&mut self) {
        let _ = self.connected_tx.send(false);
        self.fail_waiters(|| Error::Transport("connection service torn down".to_string()));
        self.state = ConnectionState::Idle;
        self.reconnect_attempts = 0;
    }
}

/// Read frames until the server acknowledges the STOMP handshake.
async fn wait_for_connected(socket: &mut WsStream) -> crate::error::Result<()> {
    while let Some(message) = socket.next().await {
        let message = message.map_err(|e| Error::Transport(e.to_string()))?;
        let Message::Text(text) = message else {
            continue;
        };
        match Frame::parse(&text) {
            Ok(Some(frame)) if frame.command == stomp::Command::Connected => return Ok(()),
            Ok(Some(frame)) if frame.command == stomp::Command::Error => {
                let message = frame.header("message").unwrap_or("connect rejected");
                return Err(Error::Transport(format!("server rejected connect: {message}")));
            },
            Ok(_) => {},
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed frame during handshake");
            },
        }
    }
    Err(Error::Transport("connection closed during handshake".to_string()))
}
