//! Connection service behavior against an in-process STOMP server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use turnstile_client::config::{Config, ReconnectConfig};
use turnstile_client::connection::RealtimeService;
use turnstile_client::error::Error;
use turnstile_client::queue::QueueLiveClient;
use turnstile_client::stomp::{Command, Frame};
use turnstile_client::types::{EventId, PersonalQueueEvent, UserId};
use turnstile_testing::mocks::{NoTokens, RecordingQueueApi, StaticTokens};

const KICK: &str = "\u{0}KICK";

/// Minimal STOMP-over-WebSocket server for driving the client.
struct StompServer {
    addr: std::net::SocketAddr,
    connects: Arc<AtomicUsize>,
    subscribes: Arc<Mutex<Vec<String>>>,
    unsubscribes: Arc<Mutex<Vec<String>>>,
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<String>>>>,
}

impl StompServer {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connects = Arc::new(AtomicUsize::new(0));
        let subscribes = Arc::new(Mutex::new(Vec::new()));
        let unsubscribes = Arc::new(Mutex::new(Vec::new()));
        let clients = Arc::new(Mutex::new(Vec::new()));

        let server = Self {
            addr,
            connects: connects.clone(),
            subscribes: subscribes.clone(),
            unsubscribes: unsubscribes.clone(),
            clients: clients.clone(),
        };

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let connects = connects.clone();
                let subscribes = subscribes.clone();
                let unsubscribes = unsubscribes.clone();
                let clients = clients.clone();

                tokio::spawn(async move {
                    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let (mut sink, mut stream) = ws.split();
                    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                    clients.lock().unwrap().push(tx);

                    loop {
                        tokio::select! {
                            msg = stream.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let Ok(Some(frame)) = Frame::parse(&text) else {
                                        continue;
                                    };
                                    match frame.command {
                                        Command::Connect => {
                                            connects.fetch_add(1, Ordering::SeqCst);
                                            let connected = Frame::new(Command::Connected)
                                                .with_header("version", "1.2")
                                                .with_header("heart-beat", "4000,4000");
                                            if sink
                                                .send(Message::Text(connected.serialize()))
                                                .await
                                                .is_err()
                                            {
                                                return;
                                            }
                                        },
                                        Command::Subscribe => {
                                            let dest = frame
                                                .destination()
                                                .unwrap_or_default()
                                                .to_string();
                                            subscribes.lock().unwrap().push(dest);
                                        },
                                        Command::Unsubscribe => {
                                            let id =
                                                frame.header("id").unwrap_or_default().to_string();
                                            unsubscribes.lock().unwrap().push(id);
                                        },
                                        _ => {},
                                    }
                                },
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = sink.send(Message::Pong(payload)).await;
                                },
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                                Some(Ok(_)) => {},
                            },
                            out = rx.recv() => match out {
                                Some(text) if text == KICK => return,
                                Some(text) => {
                                    if sink.send(Message::Text(text)).await.is_err() {
                                        return;
                                    }
                                },
                                None => return,
                            },
                        }
                    }
                });
            }
        });

        server
    }

    fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn subscribes_for(&self, destination: &str) -> usize {
        self.subscribes
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.as_str() == destination)
            .count()
    }

    fn unsubscribes(&self) -> Vec<String> {
        self.unsubscribes.lock().unwrap().clone()
    }

    /// Send a MESSAGE frame to every connected client.
    fn push_message(&self, destination: &str, body: &str) {
        let mut frame = Frame::new(Command::Message)
            .with_header("destination", destination)
            .with_header("subscription", destination);
        frame.body = body.to_string();
        for tx in self.clients.lock().unwrap().iter() {
            let _ = tx.send(frame.serialize());
        }
    }

    /// Hard-drop every connection (simulates a transport failure).
    fn kick_all(&self) {
        for tx in self.clients.lock().unwrap().drain(..) {
            let _ = tx.send(KICK.to_string());
        }
    }
}

fn test_config(ws_url: String) -> Config {
    Config {
        ws_url,
        api_base_url: "http://127.0.0.1:0".to_string(),
        request_timeout: Duration::from_secs(2),
        // Long heartbeat so staleness detection never trips inside a test.
        heartbeat: Duration::from_secs(10),
        reconnect: ReconnectConfig {
            base_delay: Duration::from_millis(10),
            max_attempts: 5,
        },
        purchase_window_secs: 900,
        seat_log_capacity: 100,
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was never reached");
}

#[tokio::test]
async fn concurrent_connects_share_one_handshake() {
    let server = StompServer::spawn().await;
    let service = RealtimeService::init(test_config(server.ws_url()), Arc::new(StaticTokens::new("t")));
    let handle = service.handle();

    let (a, b) = tokio::join!(handle.connect(), handle.connect());
    a.unwrap();
    b.unwrap();

    assert_eq!(server.connects(), 1, "one handshake serves both callers");
    assert!(handle.is_connected());

    service.teardown().await;
}

#[tokio::test]
async fn subscribing_twice_registers_once() {
    let server = StompServer::spawn().await;
    let service = RealtimeService::init(test_config(server.ws_url()), Arc::new(StaticTokens::new("t")));
    let handle = service.handle();
    handle.connect().await.unwrap();

    let first = handle.subscribe("/topic/events/1/queue").await.unwrap();
    let second = handle.subscribe("/topic/events/1/queue").await.unwrap();

    assert!(first.is_some());
    assert!(second.is_none(), "duplicate subscription is a no-op");
    wait_until(|| server.subscribes_for("/topic/events/1/queue") == 1).await;

    service.teardown().await;
}

#[tokio::test]
async fn messages_route_to_their_destination() {
    let server = StompServer::spawn().await;
    let service = RealtimeService::init(test_config(server.ws_url()), Arc::new(StaticTokens::new("t")));
    let handle = service.handle();
    handle.connect().await.unwrap();

    let mut rx = handle
        .subscribe("/topic/events/9/seats")
        .await
        .unwrap()
        .unwrap();

    server.push_message("/topic/events/9/seats", r#"{"hello": true}"#);

    let body = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body, r#"{"hello": true}"#);

    service.teardown().await;
}

#[tokio::test]
async fn missing_token_fails_without_any_attempt() {
    let server = StompServer::spawn().await;
    let service = RealtimeService::init(test_config(server.ws_url()), Arc::new(NoTokens));
    let handle = service.handle();

    let result = handle.connect().await;
    assert!(matches!(result, Err(Error::AuthMissing)));
    assert_eq!(server.connects(), 0, "no handshake may be attempted");

    service.teardown().await;
}

#[tokio::test]
async fn reconnect_gives_up_after_five_attempts() {
    // A listener that accepts TCP and immediately hangs up: every WebSocket
    // handshake fails, and accepts count the attempts.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));
    let accepts_counter = accepts.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            accepts_counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    let service = RealtimeService::init(
        test_config(format!("ws://{addr}")),
        Arc::new(StaticTokens::new("t")),
    );
    let handle = service.handle();

    let result = handle.connect().await;
    assert!(
        matches!(result, Err(Error::ReconnectExhausted { attempts: 5 })),
        "got {result:?}"
    );

    // 1 initial + 5 ladder attempts, and nothing further once exhausted.
    let seen = accepts.load(Ordering::SeqCst);
    assert_eq!(seen, 6);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), seen, "no sixth retry");

    service.teardown().await;
}

#[tokio::test]
async fn reconnect_reissues_subscriptions() {
    let server = StompServer::spawn().await;
    let service = RealtimeService::init(test_config(server.ws_url()), Arc::new(StaticTokens::new("t")));
    let handle = service.handle();
    handle.connect().await.unwrap();

    let mut rx = handle
        .subscribe("/topic/events/2/queue")
        .await
        .unwrap()
        .unwrap();
    wait_until(|| server.subscribes_for("/topic/events/2/queue") == 1).await;

    let mut connected = handle.watch_connected();
    server.kick_all();

    // Drop observed, then the ladder brings the connection back.
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            connected.changed().await.unwrap();
            if *connected.borrow() {
                return;
            }
        }
    })
    .await
    .expect("connection never came back");

    wait_until(|| server.subscribes_for("/topic/events/2/queue") == 2).await;

    // The original stream keeps working across the gap.
    server.push_message("/topic/events/2/queue", "{}");
    let body = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body, "{}");

    service.teardown().await;
}

#[tokio::test]
async fn teardown_stops_the_service() {
    let server = StompServer::spawn().await;
    let service = RealtimeService::init(test_config(server.ws_url()), Arc::new(StaticTokens::new("t")));
    let handle = service.handle();
    handle.connect().await.unwrap();

    service.teardown().await;

    let result = handle.connect().await;
    assert!(matches!(result, Err(Error::Subscription(_))));
}

#[tokio::test]
async fn queue_client_reconciles_broadcasts_and_personal_events() {
    let server = StompServer::spawn().await;
    let service = RealtimeService::init(test_config(server.ws_url()), Arc::new(StaticTokens::new("t")));
    let api = RecordingQueueApi::new();

    let client = QueueLiveClient::attach(
        service.handle(),
        &api,
        EventId(3),
        UserId::new("u1"),
    )
    .await
    .unwrap();

    // Seeded from the REST snapshot (rank 5).
    assert_eq!(client.snapshot().position, Some(5));
    assert!(client.is_connected());

    // Broadcast carries the whole roster; only our entry applies.
    server.push_message(
        "/topic/events/3/queue",
        r#"{
            "u1": {"position": 3, "estimatedWaitMinutes": 1, "progressPercent": 88.0},
            "u2": {"position": 77, "estimatedWaitMinutes": 40, "progressPercent": 2.0}
        }"#,
    );
    let mut state = client.state();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if state.borrow().position == Some(3) {
                return;
            }
            state.changed().await.unwrap();
        }
    })
    .await
    .expect("broadcast never applied");

    // A malformed frame is dropped without killing the subscription.
    server.push_message("/topic/events/3/queue", "not json");

    // Personal event lands in the one-shot slot and is consumed once.
    server.push_message(
        "/topic/users/u1/queue",
        r#"{"completedAt": "2025-03-01T12:00:00Z", "message": "Enjoy"}"#,
    );
    let mut state = client.state();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if state.borrow().pending_event.is_some() {
                return;
            }
            state.changed().await.unwrap();
        }
    })
    .await
    .expect("personal event never arrived");

    let event = client.take_event();
    assert!(matches!(event, Some(PersonalQueueEvent::Completed { .. })));
    assert!(client.take_event().is_none(), "one-shot slot was cleared");

    // Detaching unsubscribes both destinations but keeps the connection up.
    let handle = service.handle();
    client.detach().await.unwrap();
    wait_until(|| server.unsubscribes().len() == 2).await;
    assert!(handle.is_connected());

    service.teardown().await;
}
