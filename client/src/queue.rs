//! Queue coordination: REST snapshot reconciled with live events.
//!
//! A user's queue standing has two sources of truth: a REST snapshot fetched
//! at attach time, and live frames on two destinations - the per-event
//! broadcast (position/wait/progress for everyone in the line, keyed by user
//! id) and the per-user personal topic (lifecycle transitions). The
//! [`QueueLiveClient`] folds all of it into one [`QueueLiveState`] published
//! over a `watch` channel: snapshot seeds, any newer broadcast overwrites.
//!
//! Personal events are a one-shot slot, not a log: the UI consumes the
//! pending event promptly via [`QueueLiveClient::take_event`], and a second
//! event arriving first wins the slot (last-write-wins; the displaced event
//! is logged).

use crate::api::QueueApi;
use crate::connection::RealtimeHandle;
use crate::error::{Error, Result};
use crate::types::{
    EventId, PersonalQueueEvent, QueueStatus, UserId, WaitingQueueBroadcast, destinations,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Reconciled queue standing for (user, event).
///
/// Live fields are `None` until the first broadcast arrives when the REST
/// snapshot could not provide them.
#[derive(Debug, Clone, Default)]
pub struct QueueLiveState {
    /// Position in the line (1-based)
    pub position: Option<u32>,
    /// Server-estimated wait in minutes
    pub estimated_wait_minutes: Option<u32>,
    /// Progress through the line, 0.0–100.0
    pub progress_percent: Option<f64>,
    /// The unconsumed personal lifecycle event, if any (one-shot slot)
    pub pending_event: Option<PersonalQueueEvent>,
    /// Whether the realtime connection is currently live
    pub connected: bool,
}

impl QueueLiveState {
    /// Seed live state from the REST snapshot.
    #[must_use]
    pub fn seed(status: &QueueStatus) -> Self {
        Self {
            position: Some(status.rank),
            estimated_wait_minutes: Some(status.estimated_wait_minutes),
            progress_percent: Some(status.progress_percent),
            pending_event: None,
            connected: false,
        }
    }

    /// Fold one broadcast entry for the current user; newer broadcast wins.
    pub fn apply_broadcast(&mut self, broadcast: &WaitingQueueBroadcast) {
        self.position = Some(broadcast.position);
        self.estimated_wait_minutes = Some(broadcast.estimated_wait_minutes);
        self.progress_percent = Some(broadcast.progress_percent);
    }

    /// Store a personal event in the one-shot slot, returning whatever it
    /// displaced.
    pub fn store_personal(&mut self, event: PersonalQueueEvent) -> Option<PersonalQueueEvent> {
        self.pending_event.replace(event)
    }
}

/// Live queue client for one (user, event) pair.
///
/// Obtains the shared connection, subscribes the personal and broadcast
/// destinations, and keeps [`QueueLiveState`] current until
/// [`QueueLiveClient::detach`]. Detaching unsubscribes its own destinations
/// only - the connection is shared with other consumers and stays up.
pub struct QueueLiveClient {
    handle: RealtimeHandle,
    state: Arc<watch::Sender<QueueLiveState>>,
    personal_destination: String,
    broadcast_destination: String,
    tasks: Vec<JoinHandle<()>>,
}

impl QueueLiveClient {
    /// Connect (via the shared service), seed from REST, and start folding
    /// live frames.
    ///
    /// # Errors
    ///
    /// Connection errors from [`RealtimeHandle::connect`], REST errors from
    /// the snapshot fetch, or [`Error::Subscription`] when one of the two
    /// destinations is already claimed by another live client.
    pub async fn attach(
        handle: RealtimeHandle,
        api: &dyn QueueApi,
        event: EventId,
        user: UserId,
    ) -> Result<Self> {
        handle.connect().await?;
        let snapshot = api.fetch_status(event).await?;

        let personal_destination = destinations::user_queue(&user);
        let broadcast_destination = destinations::event_queue(event);

        let personal_rx = claim(&handle, &personal_destination).await?;
        let broadcast_rx = claim(&handle, &broadcast_destination).await?;

        let state = Arc::new(watch::channel(QueueLiveState::seed(&snapshot)).0);

        let tasks = vec![
            tokio::spawn(fold_personal(personal_rx, Arc::clone(&state))),
            tokio::spawn(fold_broadcast(broadcast_rx, Arc::clone(&state), user)),
            tokio::spawn(mirror_connected(
                handle.watch_connected(),
                Arc::clone(&state),
            )),
        ];

        Ok(Self {
            handle,
            state,
            personal_destination,
            broadcast_destination,
            tasks,
        })
    }

    /// Watch the reconciled state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<QueueLiveState> {
        self.state.subscribe()
    }

    /// Current state snapshot.
    #[must_use]
    pub fn snapshot(&self) -> QueueLiveState {
        self.state.borrow().clone()
    }

    /// Consume the pending personal event, clearing the slot.
    pub fn take_event(&self) -> Option<PersonalQueueEvent> {
        let mut taken = None;
        self.state.send_modify(|s| taken = s.pending_event.take());
        taken
    }

    /// Whether the realtime connection is currently live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    /// Unsubscribe this client's destinations and stop folding.
    ///
    /// Must not tear down the shared connection - other consumers may still
    /// need it.
    ///
    /// # Errors
    ///
    /// [`Error::Subscription`] when the connection service is not running
    /// (in which case there is nothing to unsubscribe from anyway).
    pub async fn detach(self) -> Result<()> {
        let result_personal = self.handle.unsubscribe(self.personal_destination).await;
        let result_broadcast = self.handle.unsubscribe(self.broadcast_destination).await;
        for task in self.tasks {
            task.abort();
        }
        result_personal.and(result_broadcast)
    }
}

async fn claim(handle: &RealtimeHandle, destination: &str) -> Result<mpsc::Receiver<String>> {
    handle
        .subscribe(destination)
        .await?
        .ok_or_else(|| Error::Subscription(format!("destination already active: {destination}")))
}

/// Fold personal lifecycle events into the one-shot slot.
async fn fold_personal(
    mut rx: mpsc::Receiver<String>,
    state: Arc<watch::Sender<QueueLiveState>>,
) {
    while let Some(body) = rx.recv().await {
        match serde_json::from_str::<PersonalQueueEvent>(&body) {
            Ok(event) => {
                tracing::debug!(kind = event.kind(), "personal queue event");
                state.send_modify(|s| {
                    if let Some(displaced) = s.store_personal(event) {
                        // Last write wins; an unconsumed event being displaced
                        // is worth a trace when diagnosing delivery issues.
                        tracing::debug!(
                            displaced = displaced.kind(),
                            "personal event overwritten before consumption"
                        );
                    }
                });
            },
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed personal queue event");
            },
        }
    }
}

/// Fold per-event broadcasts, extracting only the current user's entry.
async fn fold_broadcast(
    mut rx: mpsc::Receiver<String>,
    state: Arc<watch::Sender<QueueLiveState>>,
    user: UserId,
) {
    while let Some(body) = rx.recv().await {
        match serde_json::from_str::<HashMap<String, WaitingQueueBroadcast>>(&body) {
            Ok(roster) => {
                // The rest of the roster is other users' standings; only
                // ours matters and nothing else is retained.
                if let Some(mine) = roster.get(user.as_str()) {
                    state.send_modify(|s| s.apply_broadcast(mine));
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed queue broadcast");
            },
        }
    }
}

/// Mirror the connection flag into the published state.
async fn mirror_connected(
    mut connected: watch::Receiver<bool>,
    state: Arc<watch::Sender<QueueLiveState>>,
) {
    loop {
        let flag = *connected.borrow_and_update();
        state.send_if_modified(|s| {
            let changed = s.connected != flag;
            s.connected = flag;
            changed
        });
        if connected.changed().await.is_err() {
            return;
        }
    }
}
