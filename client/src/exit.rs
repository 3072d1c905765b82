//! Exit guard: leaving the page releases the held queue slot.
//!
//! Once a user holds a queue slot, abandoning the flow (link click, back
//! button, tab close) should return the slot to the back of the line -
//! unless a payment is in flight, because the payment provider redirects the
//! user away and back and that must not cost them their slot.
//!
//! The guard is presentation-agnostic: the embedding shell reports leave
//! attempts as [`LeaveIntent`]s and acts on the returned [`ExitDecision`]
//! (cancel the navigation and show a confirmation, or let it happen). On a
//! confirmed exit the move-to-back call is awaited and the deferred
//! navigation is replayed through the injected navigator; on a tab close the
//! call is fire-and-forget on a detached task that survives guard teardown.

use crate::api::QueueApi;
use crate::environment::Navigator;
use crate::error::Result;
use crate::types::{Destination, EventId, RankChange};
use std::sync::Arc;

/// A leave attempt reported by the embedding shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveIntent {
    /// A link click towards a different path
    Navigate(String),
    /// Browser back navigation (the shell re-pushes the current entry)
    HistoryBack,
    /// Tab/window close or unload
    Unload,
}

/// What the shell should do with the leave attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// Let the navigation proceed untouched
    Allow,
    /// Cancel the navigation and show the exit confirmation; the intended
    /// destination is remembered for [`ExitGuard::confirm_exit`]
    Intercept,
    /// Closing: the slot release is already on its way; show the native
    /// close prompt if the platform permits
    ConfirmClose,
}

/// Guards the purchase flow against accidental abandonment.
pub struct ExitGuard {
    api: Arc<dyn QueueApi>,
    navigator: Arc<dyn Navigator>,
    event: EventId,
    active: bool,
    payment_in_flight: bool,
    pending: Option<Destination>,
    navigation_in_progress: bool,
}

impl ExitGuard {
    /// Create an inactive guard for one event.
    #[must_use]
    pub fn new(api: Arc<dyn QueueApi>, navigator: Arc<dyn Navigator>, event: EventId) -> Self {
        Self {
            api,
            navigator,
            event,
            active: false,
            payment_in_flight: false,
            pending: None,
            navigation_in_progress: false,
        }
    }

    /// Start intercepting leave attempts. Idempotent.
    pub fn activate(&mut self) {
        if !self.active {
            tracing::debug!("exit guard activated");
            self.active = true;
        }
    }

    /// Stop intercepting and forget any deferred destination. Idempotent.
    pub fn deactivate(&mut self) {
        if self.active {
            tracing::debug!("exit guard deactivated");
            self.active = false;
            self.pending = None;
        }
    }

    /// Whether the guard is currently intercepting.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Mark a payment as in flight (or no longer so).
    ///
    /// While set, nothing is intercepted and no slot release is issued: the
    /// provider redirect must survive.
    pub fn set_payment_in_flight(&mut self, in_flight: bool) {
        self.payment_in_flight = in_flight;
    }

    /// Handle a leave attempt.
    pub fn on_leave_intent(&mut self, intent: LeaveIntent) -> ExitDecision {
        if !self.active || self.payment_in_flight || self.navigation_in_progress {
            return ExitDecision::Allow;
        }

        match intent {
            LeaveIntent::Navigate(path) => {
                tracing::debug!(%path, "intercepted navigation while holding a slot");
                self.pending = Some(Destination::Path(path));
                ExitDecision::Intercept
            },
            LeaveIntent::HistoryBack => {
                tracing::debug!("intercepted back navigation while holding a slot");
                self.pending = Some(Destination::Back);
                ExitDecision::Intercept
            },
            LeaveIntent::Unload => {
                // Fire-and-forget: the page is going away, so the release
                // rides a detached task (keep-alive semantics) and is never
                // awaited.
                let api = Arc::clone(&self.api);
                let event = self.event;
                tokio::spawn(async move {
                    if let Err(err) = api.move_to_back(event).await {
                        tracing::warn!(error = %err, "slot release on unload failed");
                    }
                });
                ExitDecision::ConfirmClose
            },
        }
    }

    /// The user dismissed the exit confirmation; stay on the page.
    pub fn cancel_exit(&mut self) {
        self.pending = None;
    }

    /// The user confirmed leaving: release the slot, surface the rank
    /// movement, then perform the deferred navigation.
    ///
    /// Unlike the unload path this one has time to complete, so the call is
    /// awaited and its result returned for display ("you were #5, you are
    /// now #214").
    ///
    /// # Errors
    ///
    /// Propagates the move-to-back REST error; the guard stays active and
    /// the deferred destination is kept so the user can retry.
    pub async fn confirm_exit(&mut self) -> Result<RankChange> {
        self.navigation_in_progress = true;

        let moved = match self.api.move_to_back(self.event).await {
            Ok(moved) => moved,
            Err(err) => {
                self.navigation_in_progress = false;
                return Err(err);
            },
        };

        tracing::info!(
            previous_rank = moved.previous_rank,
            new_rank = moved.new_rank,
            "slot released to back of queue"
        );

        if let Some(destination) = self.pending.take() {
            self.navigator.redirect(destination);
        }

        self.active = false;
        self.navigation_in_progress = false;
        Ok(moved)
    }
}
