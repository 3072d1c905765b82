//! The flow reducer.

use super::{FlowAction, FlowStage, FlowState};
use crate::environment::Navigator;
use crate::types::{Destination, PersonalQueueEvent, QueueLifecycle};
use smallvec::smallvec;
use std::sync::Arc;
use std::time::Duration;
use turnstile_core::effect::{Effect, EffectId, Effects};
use turnstile_core::reducer::Reducer;

/// Cancellation id for the purchase countdown tick chain.
pub const COUNTDOWN_EFFECT: EffectId = EffectId::from_static("purchase_countdown");

/// Dependencies for the flow reducer.
///
/// Redirects go through the injected [`Navigator`]; the embedding shell
/// decides what "navigate" means.
#[derive(Clone)]
pub struct FlowEnvironment {
    navigator: Arc<dyn Navigator>,
}

impl FlowEnvironment {
    /// Create an environment around the shell's navigator.
    #[must_use]
    pub fn new(navigator: Arc<dyn Navigator>) -> Self {
        Self { navigator }
    }

    /// The navigator, shared.
    #[must_use]
    pub fn navigator(&self) -> Arc<dyn Navigator> {
        Arc::clone(&self.navigator)
    }
}

/// Reducer for the purchase flow.
///
/// All transitions are pure; no two are ever applied concurrently because
/// the store serializes reductions.
pub struct FlowReducer;

impl Reducer for FlowReducer {
    type State = FlowState;
    type Action = FlowAction;
    type Environment = FlowEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Effects<Self::Action> {
        // Once redirected the machine is inert; late ticks and stale events
        // must not resurrect it.
        if state.exited.is_some() {
            return smallvec![Effect::None];
        }

        match action {
            FlowAction::Activate => {
                if state.stage == FlowStage::Ready && state.countdown.is_running() {
                    tick_chain()
                } else {
                    smallvec![Effect::None]
                }
            },

            FlowAction::Personal(event) => match event {
                PersonalQueueEvent::Entered { .. } => enter_ready(state),
                PersonalQueueEvent::Expired { .. } => redirect(state, env, Destination::Events),
                PersonalQueueEvent::Completed { .. } => {
                    redirect(state, env, Destination::MyTickets)
                },
            },

            FlowAction::StatusRefetched(lifecycle) => match lifecycle {
                QueueLifecycle::Entered => enter_ready(state),
                QueueLifecycle::Waiting => resync_to_waiting(state),
                QueueLifecycle::Expired => redirect(state, env, Destination::Events),
                QueueLifecycle::Completed => redirect(state, env, Destination::MyTickets),
            },

            FlowAction::ProcessUntilMeSucceeded => enter_ready(state),

            FlowAction::SelectSeats => {
                if state.stage == FlowStage::Ready {
                    state.stage = FlowStage::Purchase;
                }
                smallvec![Effect::None]
            },

            FlowAction::ProceedToPayment { seats_held } => {
                if state.stage == FlowStage::Purchase && seats_held >= 1 {
                    state.stage = FlowStage::Payment;
                }
                smallvec![Effect::None]
            },

            FlowAction::CountdownTick => match state.countdown.tick() {
                super::TickOutcome::Idle => smallvec![Effect::None],
                super::TickOutcome::Running(remaining) => {
                    tracing::trace!(remaining, "purchase countdown tick");
                    tick_chain()
                },
                super::TickOutcome::Expired => {
                    tracing::info!("purchase window expired");
                    redirect(state, env, Destination::Events)
                },
            },

            FlowAction::PauseCountdown => {
                state.countdown.pause();
                smallvec![Effect::Cancel(COUNTDOWN_EFFECT)]
            },

            FlowAction::ResumeCountdown => {
                // A resume while already ticking must not arm a second
                // chain; two live chains would double the tick rate.
                if state.countdown.is_running() {
                    smallvec![Effect::None]
                } else {
                    state.countdown.resume();
                    if state.countdown.is_running() {
                        tick_chain()
                    } else {
                        smallvec![Effect::None]
                    }
                }
            },
        }
    }
}

/// Schedule the next 1 Hz tick under the countdown's cancellation id.
fn tick_chain() -> Effects<FlowAction> {
    smallvec![
        Effect::Delay {
            duration: Duration::from_secs(1),
            action: Box::new(FlowAction::CountdownTick),
        }
        .cancellable(COUNTDOWN_EFFECT)
    ]
}

/// waiting → ready, idempotent.
///
/// Fed by three sources (personal event, status refetch, process-until-me)
/// that can race across destinations; only the first one transitions, and
/// an admission observed in `purchase`/`payment` is stale and ignored.
fn enter_ready(state: &mut FlowState) -> Effects<FlowAction> {
    if state.stage != FlowStage::Waiting {
        return smallvec![Effect::None];
    }
    tracing::info!(window_secs = state.window_secs, "admitted, purchase window open");
    state.stage = FlowStage::Ready;
    state.countdown.start(state.window_secs);
    tick_chain()
}

/// Force `ready` back to `waiting` when the server disagrees.
///
/// Guards against stale local state after a missed event (reconnect gap).
/// `purchase` and `payment` are deliberately left alone - a user holding
/// seats is not yanked back by a late poll.
fn resync_to_waiting(state: &mut FlowState) -> Effects<FlowAction> {
    if state.stage == FlowStage::Ready {
        tracing::warn!("server reports WAITING while ready, resyncing");
        state.stage = FlowStage::Waiting;
        state.countdown.cancel();
        smallvec![Effect::Cancel(COUNTDOWN_EFFECT)]
    } else {
        smallvec![Effect::None]
    }
}

/// Leave the machine: cancel the countdown and route the user away.
fn redirect(
    state: &mut FlowState,
    env: &FlowEnvironment,
    destination: Destination,
) -> Effects<FlowAction> {
    state.exited = Some(destination.clone());
    state.countdown.cancel();

    let navigator = env.navigator();
    smallvec![
        Effect::Cancel(COUNTDOWN_EFFECT),
        Effect::Future(Box::pin(async move {
            navigator.redirect(destination);
            None
        })),
    ]
}
