//! # Turnstile Testing
//!
//! Testing utilities and fakes for the Turnstile coordination layer.
//!
//! This crate provides:
//! - Deterministic fakes for the environment traits (clock, tokens,
//!   navigator, queue API)
//! - A fluent Given-When-Then harness for reducers
//! - Assertion helpers for effect lists
//!
//! ## Example
//!
//! ```ignore
//! use turnstile_testing::{ReducerTest, mocks};
//!
//! ReducerTest::new(FlowReducer)
//!     .with_env(test_environment())
//!     .given_state(waiting_state())
//!     .when_action(FlowAction::SelectSeats)
//!     .then_state(|state| assert_eq!(state.stage, FlowStage::Waiting))
//!     .run();
//! ```

pub mod reducer_test;

pub use reducer_test::{ReducerTest, assertions};

/// Deterministic fakes for the environment traits.
pub mod mocks {
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use turnstile_client::api::QueueApi;
    use turnstile_client::environment::{Navigator, TokenProvider};
    use turnstile_client::error::Result;
    use turnstile_client::types::{
        Destination, EventId, QueueLifecycle, QueueStatus, RankChange,
    };
    use turnstile_core::environment::Clock;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Token provider that always returns the same token.
    #[derive(Debug, Clone)]
    pub struct StaticTokens {
        token: String,
    }

    impl StaticTokens {
        /// Create a provider returning `token` forever.
        pub fn new(token: impl Into<String>) -> Self {
            Self {
                token: token.into(),
            }
        }
    }

    impl TokenProvider for StaticTokens {
        fn access_token(&self) -> Option<String> {
            Some(self.token.clone())
        }
    }

    /// Token provider for the signed-out case: never has a token.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NoTokens;

    impl TokenProvider for NoTokens {
        fn access_token(&self) -> Option<String> {
            None
        }
    }

    /// Navigator that records every redirect instead of navigating.
    #[derive(Debug, Default)]
    pub struct RecordingNavigator {
        redirects: Mutex<Vec<Destination>>,
    }

    impl RecordingNavigator {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything redirected so far, in order.
        #[must_use]
        pub fn redirects(&self) -> Vec<Destination> {
            self.redirects
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }
    }

    impl Navigator for RecordingNavigator {
        fn redirect(&self, destination: Destination) {
            self.redirects
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(destination);
        }
    }

    /// Queue API fake that records calls and serves canned responses.
    #[derive(Debug)]
    pub struct RecordingQueueApi {
        status: Mutex<QueueStatus>,
        rank_change: RankChange,
        move_to_back_calls: AtomicUsize,
        process_until_me_calls: AtomicUsize,
    }

    impl Default for RecordingQueueApi {
        fn default() -> Self {
            Self {
                status: Mutex::new(QueueStatus {
                    rank: 5,
                    waiting_ahead: 4,
                    estimated_wait_minutes: 3,
                    progress_percent: 50.0,
                    lifecycle: QueueLifecycle::Waiting,
                }),
                rank_change: RankChange {
                    previous_rank: 5,
                    new_rank: 214,
                },
                move_to_back_calls: AtomicUsize::new(0),
                process_until_me_calls: AtomicUsize::new(0),
            }
        }
    }

    impl RecordingQueueApi {
        /// A fake with a WAITING snapshot at rank 5.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Replace the canned status snapshot.
        #[must_use]
        pub fn with_status(self, status: QueueStatus) -> Self {
            *self
                .status
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = status;
            self
        }

        /// Number of move-to-back calls observed.
        #[must_use]
        pub fn move_to_back_calls(&self) -> usize {
            self.move_to_back_calls.load(Ordering::SeqCst)
        }

        /// Number of process-until-me calls observed.
        #[must_use]
        pub fn process_until_me_calls(&self) -> usize {
            self.process_until_me_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl QueueApi for RecordingQueueApi {
        async fn fetch_status(&self, _event: EventId) -> Result<QueueStatus> {
            Ok(self
                .status
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone())
        }

        async fn move_to_back(&self, _event: EventId) -> Result<RankChange> {
            self.move_to_back_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rank_change)
        }

        async fn process_until_me(&self, _event: EventId) -> Result<()> {
            self.process_until_me_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
