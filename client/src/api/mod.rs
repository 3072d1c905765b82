//! Typed REST layer over the backend's response envelope.
//!
//! Every backend response is `{ status, message, data }`; any non-success
//! status becomes [`crate::Error::Api`] carrying the server's
//! user-displayable message. The queue and seat endpoints are exposed behind
//! traits so the flow bootstrap and exit guard can be exercised against
//! recording fakes.

mod client;
mod envelope;

pub use client::ApiClient;
pub use envelope::ApiEnvelope;

use crate::error::Result;
use crate::types::{EventId, QueueStatus, RankChange, Seat, SeatId};
use async_trait::async_trait;

/// Queue endpoints scoped to (authenticated user, event).
#[async_trait]
pub trait QueueApi: Send + Sync {
    /// Snapshot of the user's queue standing.
    async fn fetch_status(&self, event: EventId) -> Result<QueueStatus>;

    /// Release the held slot and rejoin at the back of the line.
    ///
    /// Returns the rank movement so the UI can show "you were #5, you are
    /// now #214".
    async fn move_to_back(&self, event: EventId) -> Result<RankChange>;

    /// Ask the backend to process the queue up to and including this user.
    async fn process_until_me(&self, event: EventId) -> Result<()>;
}

/// Seat endpoints for one event.
#[async_trait]
pub trait SeatApi: Send + Sync {
    /// The full seat list for the event.
    async fn fetch_seats(&self, event: EventId) -> Result<Vec<Seat>>;

    /// Place a hold on a seat.
    async fn select_seat(&self, event: EventId, seat: SeatId) -> Result<()>;

    /// Release a previously held seat.
    async fn release_seat(&self, event: EventId, seat: SeatId) -> Result<()>;
}
