//! # Turnstile Core
//!
//! Core traits and types for the Turnstile real-time coordination layer.
//!
//! This crate provides the fundamental abstractions the coordination clients
//! are built on: pure state machines driven by discrete actions, with side
//! effects described as values and executed by the runtime.
//!
//! ## Core Concepts
//!
//! - **State**: Domain state for a feature (queue position, purchase stage)
//! - **Action**: All possible inputs to a reducer (server-pushed events,
//!   user intents, timer ticks)
//! - **Reducer**: Pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Side effect descriptions (not execution), including
//!   cancellable timers
//! - **Environment**: Injected dependencies via traits
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Unidirectional Data Flow
//! - Explicit Effects (no hidden I/O)
//! - Dependency Injection via Environment
//!
//! ## Example
//!
//! ```ignore
//! use turnstile_core::{Reducer, Effect, Effects};
//! use smallvec::smallvec;
//!
//! struct CounterReducer;
//!
//! impl Reducer for CounterReducer {
//!     type State = i64;
//!     type Action = i64;
//!     type Environment = ();
//!
//!     fn reduce(&self, state: &mut i64, action: i64, _env: &()) -> Effects<i64> {
//!         *state += action;
//!         smallvec![Effect::None]
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod ring;

pub use effect::{Effect, EffectId, Effects};
pub use reducer::Reducer;
pub use ring::RecentLog;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They contain all business logic and are deterministic and testable without
/// a runtime: feed actions in, assert on state and returned effect descriptions.
pub mod reducer {
    use super::effect::Effects;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for PurchaseFlowReducer {
    ///     type State = FlowState;
    ///     type Action = FlowAction;
    ///     type Environment = FlowEnvironment;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut FlowState,
    ///         action: FlowAction,
    ///         env: &FlowEnvironment,
    ///     ) -> Effects<FlowAction> {
    ///         match action {
    ///             FlowAction::CountdownTick => { /* ... */ }
    ///             _ => smallvec![Effect::None],
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed by the runtime
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Effects<Self::Action>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime. They are
/// values, not executions; they compose, and timer chains can be cancelled
/// by id. The runtime feeds actions produced by effects back into the
/// reducer.
pub mod effect {
    use smallvec::SmallVec;
    use std::borrow::Cow;
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// The effect collection returned by a reducer.
    ///
    /// Most reductions produce zero or one effect; four slots of inline
    /// storage keep the common case off the heap.
    pub type Effects<A> = SmallVec<[Effect<A>; 4]>;

    /// Identifier for a cancellable effect.
    ///
    /// Registering a new [`Effect::Cancellable`] under an id that is already
    /// live replaces the previous registration; [`Effect::Cancel`] aborts
    /// whatever is currently registered under the id.
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct EffectId(Cow<'static, str>);

    impl EffectId {
        /// Create an effect id from a static name.
        #[must_use]
        pub const fn from_static(name: &'static str) -> Self {
            Self(Cow::Borrowed(name))
        }

        /// Create an effect id from an owned name.
        #[must_use]
        pub fn new(name: impl Into<String>) -> Self {
            Self(Cow::Owned(name.into()))
        }

        /// The id as a string slice.
        #[must_use]
        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl std::fmt::Display for EffectId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what
    /// should happen, returned from reducers and executed by the Store
    /// runtime.
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially
        Sequential(Vec<Effect<Action>>),

        /// Delayed action (for timers, countdown ticks)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),

        /// An effect that can be aborted later via [`Effect::Cancel`]
        ///
        /// The purchase countdown uses this: each tick is scheduled under a
        /// stable id so a redirect or resync can cancel the chain.
        Cancellable {
            /// Identifier the runtime registers the running effect under
            id: EffectId,
            /// The effect to run
            effect: Box<Effect<Action>>,
        },

        /// Abort the effect currently registered under the given id, if any
        Cancel(EffectId),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
                Effect::Cancellable { id, effect } => f
                    .debug_struct("Effect::Cancellable")
                    .field("id", id)
                    .field("effect", effect)
                    .finish(),
                Effect::Cancel(id) => f.debug_tuple("Effect::Cancel").field(id).finish(),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Wrap this effect so it can be aborted via [`Effect::Cancel`]
        #[must_use]
        pub fn cancellable(self, id: EffectId) -> Effect<Action> {
            Effect::Cancellable {
                id,
                effect: Box::new(self),
            }
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected via
/// the Environment parameter, so reducers stay pure and tests substitute
/// deterministic implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Production uses [`SystemClock`]; tests use a fixed clock so
    /// time-dependent logic is reproducible.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// System clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::{Effect, EffectId};

    #[test]
    fn effect_id_display_matches_name() {
        let id = EffectId::from_static("purchase_countdown");
        assert_eq!(id.as_str(), "purchase_countdown");
        assert_eq!(id.to_string(), "purchase_countdown");
    }

    #[test]
    fn cancellable_wraps_inner_effect() {
        let effect: Effect<u8> = Effect::None.cancellable(EffectId::from_static("t"));
        assert!(matches!(
            effect,
            Effect::Cancellable { ref id, ref effect }
                if id.as_str() == "t" && matches!(**effect, Effect::None)
        ));
    }
}
