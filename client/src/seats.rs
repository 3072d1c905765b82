//! Seat coordination: a bounded change log plus pure reconciliation.
//!
//! The seat client does not keep a continuously-reduced seat map. It retains
//! a bounded most-recent-first log of [`SeatStatusChange`]s (the UI also
//! wants "N seats just changed"), and [`reconcile`] folds that log onto a
//! REST-fetched seat list on demand. Reconciliation is a pure function -
//! newest change per seat wins, untouched seats pass through - so it is
//! trivially unit-testable and idempotent.

use crate::connection::RealtimeHandle;
use crate::error::{Error, Result};
use crate::types::{EventId, Seat, SeatId, SeatStatus, SeatStatusChange, destinations};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use turnstile_core::ring::RecentLog;

/// Fold a change log onto a seat list.
///
/// `changes` must iterate newest → oldest (as [`RecentLog`] does). For each
/// seat id present in the log only the most recent change - the first
/// occurrence in iteration order - overwrites that seat's status; seats not
/// mentioned are returned unchanged.
///
/// Pure and idempotent: reconciling twice with the same inputs yields the
/// same output, and duplicate or stale entries for a seat have no effect.
#[must_use]
pub fn reconcile<'a, I>(seats: &[Seat], changes: I) -> Vec<Seat>
where
    I: IntoIterator<Item = &'a SeatStatusChange>,
{
    let mut newest: HashMap<SeatId, SeatStatus> = HashMap::new();
    for change in changes {
        // First occurrence wins: iteration is newest-first.
        newest.entry(change.seat_id).or_insert(change.status);
    }

    seats
        .iter()
        .map(|seat| {
            let mut seat = seat.clone();
            if let Some(status) = newest.get(&seat.id) {
                seat.status = *status;
            }
            seat
        })
        .collect()
}

/// Live seat-change client for one event.
///
/// Subscribes the per-event seat destination and maintains the bounded
/// change log, published over a `watch` channel.
pub struct SeatLiveClient {
    handle: RealtimeHandle,
    destination: String,
    log: Arc<watch::Sender<RecentLog<SeatStatusChange>>>,
    task: JoinHandle<()>,
}

impl SeatLiveClient {
    /// Connect (via the shared service) and start collecting seat changes.
    ///
    /// # Errors
    ///
    /// Connection errors from [`RealtimeHandle::connect`], or
    /// [`Error::Subscription`] when the seat destination is already claimed
    /// by another live client.
    pub async fn attach(
        handle: RealtimeHandle,
        event: EventId,
        log_capacity: usize,
    ) -> Result<Self> {
        handle.connect().await?;

        let destination = destinations::event_seats(event);
        let rx = handle
            .subscribe(&destination)
            .await?
            .ok_or_else(|| Error::Subscription(format!("destination already active: {destination}")))?;

        let log = Arc::new(watch::channel(RecentLog::new(log_capacity)).0);
        let task = tokio::spawn(collect(rx, Arc::clone(&log)));

        Ok(Self {
            handle,
            destination,
            log,
            task,
        })
    }

    /// Watch the change log.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<RecentLog<SeatStatusChange>> {
        self.log.subscribe()
    }

    /// Snapshot of the change log, newest first.
    #[must_use]
    pub fn recent_changes(&self) -> Vec<SeatStatusChange> {
        self.log.borrow().snapshot()
    }

    /// Reconcile a seat list against the current change log.
    #[must_use]
    pub fn reconciled(&self, seats: &[Seat]) -> Vec<Seat> {
        reconcile(seats, self.log.borrow().iter())
    }

    /// Whether the realtime connection is currently live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Unsubscribe and stop collecting.
    ///
    /// Leaves the shared connection up for other consumers.
    ///
    /// # Errors
    ///
    /// [`Error::Subscription`] when the connection service is not running.
    pub async fn detach(self) -> Result<()> {
        let result = self.handle.unsubscribe(self.destination).await;
        self.task.abort();
        result
    }
}

async fn collect(
    mut rx: mpsc::Receiver<String>,
    log: Arc<watch::Sender<RecentLog<SeatStatusChange>>>,
) {
    while let Some(body) = rx.recv().await {
        match serde_json::from_str::<SeatStatusChange>(&body) {
            Ok(change) => {
                tracing::debug!(
                    seat = %change.seat_id,
                    status = ?change.status,
                    "seat status change"
                );
                log.send_modify(|l| l.push(change));
            },
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed seat change");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat(id: u64, status: SeatStatus) -> Seat {
        Seat {
            id: SeatId(id),
            code: format!("A-{id}"),
            status,
            price: 50_000,
            grade: "R".to_string(),
        }
    }

    fn change(id: u64, status: SeatStatus) -> SeatStatusChange {
        SeatStatusChange {
            event_id: EventId(1),
            seat_id: SeatId(id),
            seat_code: format!("A-{id}"),
            status,
            price: 50_000,
            grade: "R".to_string(),
        }
    }

    #[test]
    fn newest_change_per_seat_wins() {
        let seats = vec![seat(42, SeatStatus::Available)];
        // Newest first: SOLD arrived after RESERVED.
        let changes = vec![change(42, SeatStatus::Sold), change(42, SeatStatus::Reserved)];

        let reconciled = reconcile(&seats, &changes);
        assert_eq!(reconciled[0].status, SeatStatus::Sold);
    }

    #[test]
    fn unmentioned_seats_pass_through() {
        let seats = vec![
            seat(1, SeatStatus::Available),
            seat(2, SeatStatus::Reserved),
        ];
        let changes = vec![change(1, SeatStatus::Sold)];

        let reconciled = reconcile(&seats, &changes);
        assert_eq!(reconciled[0].status, SeatStatus::Sold);
        assert_eq!(reconciled[1].status, SeatStatus::Reserved);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let seats = vec![seat(1, SeatStatus::Available), seat(2, SeatStatus::Available)];
        let changes = vec![change(2, SeatStatus::Reserved), change(1, SeatStatus::Sold)];

        let once = reconcile(&seats, &changes);
        let twice = reconcile(&once, &changes);
        assert_eq!(once, twice);
    }

    #[test]
    fn changes_for_unknown_seats_are_ignored() {
        let seats = vec![seat(1, SeatStatus::Available)];
        let changes = vec![change(99, SeatStatus::Sold)];

        let reconciled = reconcile(&seats, &changes);
        assert_eq!(reconciled, seats);
    }
}
