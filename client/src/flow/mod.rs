//! The four-stage purchase flow state machine.
//!
//! waiting → ready → purchase → payment, driven by server-pushed personal
//! events, REST status polling, user intents, and countdown ticks. The
//! machine is a pure reducer run on the runtime [`Store`]; redirects leave
//! through the injected [`crate::environment::Navigator`] and make the
//! machine inert.
//!
//! Ordering across destinations is not guaranteed - a personal "entered"
//! event and a broadcast position update for the same transition can arrive
//! in either order - so entry into `ready` is idempotent and guarded.

pub mod countdown;
mod reducer;

pub use countdown::{CountdownState, TickOutcome};
pub use reducer::{COUNTDOWN_EFFECT, FlowEnvironment, FlowReducer};

use crate::types::{Destination, PersonalQueueEvent, QueueLifecycle, QueueStatus};
use turnstile_runtime::{Store, StoreError};

/// The purchase flow stages, in normal forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    /// Holding a place in the virtual line
    Waiting,
    /// Admitted; the purchase window is open and counting down
    Ready,
    /// Selecting seats
    Purchase,
    /// Paying for held seats
    Payment,
}

/// Inputs to the flow reducer.
#[derive(Debug, Clone)]
pub enum FlowAction {
    /// Arm the countdown chain after bootstrap (no-op unless counting)
    Activate,
    /// A personal lifecycle event from the realtime feed
    Personal(PersonalQueueEvent),
    /// A REST status poll result
    StatusRefetched(QueueLifecycle),
    /// The explicit process-until-me call completed successfully
    ProcessUntilMeSucceeded,
    /// User moved on to seat selection (no server round-trip gates this)
    SelectSeats,
    /// User proceeded to payment with this many seats held
    ProceedToPayment {
        /// Seats currently held; at least one is required
        seats_held: usize,
    },
    /// One second elapsed on the purchase countdown
    CountdownTick,
    /// Suspend the countdown
    PauseCountdown,
    /// Resume a paused countdown
    ResumeCountdown,
}

/// Flow machine state.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowState {
    /// Current stage
    pub stage: FlowStage,
    /// The purchase countdown
    pub countdown: CountdownState,
    /// Set once a redirect was issued; the machine is inert afterwards
    pub exited: Option<Destination>,
    /// Purchase window length in seconds (used on ready entry and resync)
    pub window_secs: u32,
}

/// How the machine should begin, derived from the REST snapshot at mount.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialDisposition {
    /// Enter the machine in the given state
    Start(FlowState),
    /// Do not enter the machine at all; send the user away
    Redirect(Destination),
}

impl FlowState {
    /// Derive the initial disposition from a queue status snapshot.
    ///
    /// `WAITING` starts at `waiting`; `ENTERED` starts directly at `ready`
    /// with the countdown armed (bypassing `waiting`); `EXPIRED` and
    /// `COMPLETED` redirect away without entering the machine.
    #[must_use]
    pub fn from_snapshot(status: &QueueStatus, window_secs: u32) -> InitialDisposition {
        match status.lifecycle {
            QueueLifecycle::Waiting => InitialDisposition::Start(Self {
                stage: FlowStage::Waiting,
                countdown: CountdownState::idle(),
                exited: None,
                window_secs,
            }),
            QueueLifecycle::Entered => {
                let mut countdown = CountdownState::idle();
                countdown.start(window_secs);
                InitialDisposition::Start(Self {
                    stage: FlowStage::Ready,
                    countdown,
                    exited: None,
                    window_secs,
                })
            },
            QueueLifecycle::Expired => InitialDisposition::Redirect(Destination::Events),
            QueueLifecycle::Completed => InitialDisposition::Redirect(Destination::MyTickets),
        }
    }
}

/// The flow machine running on the runtime store.
pub type FlowStore = Store<FlowState, FlowAction, FlowEnvironment, FlowReducer>;

/// Result of [`bootstrap`].
pub enum Bootstrap {
    /// The machine is running
    Started(FlowStore),
    /// The snapshot said the flow is already over; the user was redirected
    Redirected(Destination),
}

/// Start the flow machine from a REST snapshot.
///
/// `EXPIRED`/`COMPLETED` snapshots redirect immediately through the
/// environment's navigator instead of entering the machine.
///
/// # Errors
///
/// Propagates [`StoreError`] from arming the countdown chain.
pub async fn bootstrap(
    status: &QueueStatus,
    window_secs: u32,
    environment: FlowEnvironment,
) -> Result<Bootstrap, StoreError> {
    match FlowState::from_snapshot(status, window_secs) {
        InitialDisposition::Start(state) => {
            let store = Store::new(state, FlowReducer, environment);
            store.send(FlowAction::Activate).await?;
            Ok(Bootstrap::Started(store))
        },
        InitialDisposition::Redirect(destination) => {
            environment.navigator().redirect(destination.clone());
            Ok(Bootstrap::Redirected(destination))
        },
    }
}
