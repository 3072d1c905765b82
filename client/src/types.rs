//! Domain types shared across the coordination layer.
//!
//! Wire-facing types deserialize the backend's camelCase JSON payloads;
//! everything else is plain owned data cheap to clone through `watch`
//! channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque backend user identifier.
///
/// The backend keys queue broadcasts by user id rendered as a string, so the
/// id is carried verbatim rather than parsed into anything richer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create a user id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Backend event (concert/show) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend seat identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeatId(pub u64);

impl std::fmt::Display for SeatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The server's authoritative view of a user's queue progress for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueLifecycle {
    /// Still in the waiting line
    Waiting,
    /// Admitted; the purchase window is open
    Entered,
    /// The purchase window lapsed before completion
    Expired,
    /// Purchase completed
    Completed,
}

/// REST snapshot of queue standing, scoped to (user, event).
///
/// Fetched once at mount and overridden in memory by any newer broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Position in the line (1-based)
    pub rank: u32,
    /// Number of users ahead
    pub waiting_ahead: u32,
    /// Server-estimated wait in minutes
    pub estimated_wait_minutes: u32,
    /// Progress through the line, 0.0–100.0
    pub progress_percent: f64,
    /// Authoritative lifecycle state
    #[serde(rename = "lifecycleState")]
    pub lifecycle: QueueLifecycle,
}

/// One user's entry in a per-event queue broadcast.
///
/// Broadcast frames carry a map of user id → this snapshot; the client
/// extracts only the entry for the current user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingQueueBroadcast {
    /// Current position in the line
    pub position: u32,
    /// Server-estimated wait in minutes
    pub estimated_wait_minutes: u32,
    /// Progress through the line, 0.0–100.0
    pub progress_percent: f64,
}

/// A personal queue lifecycle event, delivered on the per-user topic.
///
/// Exactly one logical event fires per lifecycle transition. It is a one-shot
/// signal consumed by the UI effect loop, not a retained log.
///
/// The backend sends one of three shapes distinguished by which timestamp
/// field is present (`enteredAt` / `expiredAt` / `completedAt`); the variant
/// tag is assigned here, at the deserialization boundary, so downstream
/// matching is exhaustive rather than key-sniffing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawPersonalEvent")]
pub enum PersonalQueueEvent {
    /// Admitted into the purchase window
    Entered {
        /// When admission happened
        at: DateTime<Utc>,
        /// Server-authored, user-displayable message
        message: String,
    },
    /// The purchase window lapsed
    Expired {
        /// When expiry happened
        at: DateTime<Utc>,
        /// Server-authored, user-displayable message
        message: String,
    },
    /// Purchase completed
    Completed {
        /// When completion happened
        at: DateTime<Utc>,
        /// Server-authored, user-displayable message
        message: String,
    },
}

impl PersonalQueueEvent {
    /// Short tag for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Entered { .. } => "entered",
            Self::Expired { .. } => "expired",
            Self::Completed { .. } => "completed",
        }
    }
}

/// The raw wire shape of a personal queue event.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPersonalEvent {
    entered_at: Option<DateTime<Utc>>,
    expired_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    message: String,
}

impl TryFrom<RawPersonalEvent> for PersonalQueueEvent {
    type Error = String;

    fn try_from(raw: RawPersonalEvent) -> Result<Self, Self::Error> {
        let RawPersonalEvent {
            entered_at,
            expired_at,
            completed_at,
            message,
        } = raw;

        if let Some(at) = entered_at {
            Ok(Self::Entered { at, message })
        } else if let Some(at) = expired_at {
            Ok(Self::Expired { at, message })
        } else if let Some(at) = completed_at {
            Ok(Self::Completed { at, message })
        } else {
            Err("personal queue event carries no lifecycle timestamp".to_string())
        }
    }
}

/// Seat availability as broadcast by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    /// Free to select
    Available,
    /// Purchased
    Sold,
    /// Held by another user's in-progress purchase
    Reserved,
}

/// A single seat status change, delivered on the per-event seat topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatStatusChange {
    /// Event the seat belongs to
    pub event_id: EventId,
    /// Seat identifier
    pub seat_id: SeatId,
    /// Human-readable seat code, e.g. `A-12`
    pub seat_code: String,
    /// New status
    #[serde(rename = "currentStatus")]
    pub status: SeatStatus,
    /// Price in minor currency units
    pub price: u64,
    /// Seat grade, e.g. `VIP`
    pub grade: String,
}

/// A seat as returned by the seat list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    /// Seat identifier
    pub id: SeatId,
    /// Human-readable seat code
    pub code: String,
    /// Current status
    pub status: SeatStatus,
    /// Price in minor currency units
    pub price: u64,
    /// Seat grade
    pub grade: String,
}

/// Rank movement reported by the move-to-back endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankChange {
    /// Rank before the move
    pub previous_rank: u32,
    /// Rank after the move (back of the line)
    pub new_rank: u32,
}

/// Where the coordination layer can send the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The events listing
    Events,
    /// The user's purchased tickets
    MyTickets,
    /// One step back in history (a previously intercepted back navigation)
    Back,
    /// An explicit path (a previously intercepted link click)
    Path(String),
}

/// WebSocket subscription destinations.
///
/// These strings are part of the backend contract and must be reproduced
/// bit-exact.
pub mod destinations {
    use super::{EventId, UserId};

    /// Personal notification feed (shares the connection service; no typed
    /// client ships for it).
    pub const NOTIFICATIONS: &str = "/user/notifications";

    /// Personal queue events for one user.
    #[must_use]
    pub fn user_queue(user: &UserId) -> String {
        format!("/topic/users/{user}/queue")
    }

    /// Queue position broadcasts for one event.
    #[must_use]
    pub fn event_queue(event: EventId) -> String {
        format!("/topic/events/{event}/queue")
    }

    /// Seat status broadcasts for one event.
    #[must_use]
    pub fn event_seats(event: EventId) -> String {
        format!("/topic/events/{event}/seats")
    }
}
