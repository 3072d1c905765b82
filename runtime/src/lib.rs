//! # Turnstile Runtime
//!
//! Runtime implementation for the Turnstile coordination layer.
//!
//! This crate provides the Store runtime that coordinates reducer execution
//! and effect handling.
//!
//! ## Core Components
//!
//! - **Store**: The runtime that manages state and executes effects
//! - **Effect Executor**: Executes effect descriptions and feeds actions back
//!   to reducers, with cancellation support for timer chains
//! - **Backoff Policy**: Reconnect delay schedules for the connection layer
//!
//! ## Example
//!
//! ```ignore
//! use turnstile_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//!
//! // Send an action
//! store.send(Action::DoSomething).await?;
//!
//! // Read state
//! let value = store.state(|s| s.some_field).await;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tokio::task::AbortHandle;
use turnstile_core::effect::{Effect, EffectId};
use turnstile_core::reducer::Reducer;

/// Reconnect backoff schedules
pub mod backoff;

pub use backoff::BackoffPolicy;
pub use error::StoreError;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        ///
        /// Some effects were still running when the timeout elapsed.
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for terminal action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        ///
        /// Typically means the store is shutting down.
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

/// Guard that decrements an atomic counter on drop (for shutdown tracking)
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Inner<S, A, E, R> {
    state: RwLock<S>,
    reducer: R,
    environment: E,
    shutdown: AtomicBool,
    pending_effects: Arc<AtomicUsize>,
    /// Action broadcast channel for observing actions produced by effects.
    ///
    /// Actions produced by effects (delays, futures) are broadcast to
    /// observers. This enables request-response waiting and real-time
    /// streaming of state-machine output to the embedding shell.
    action_tx: broadcast::Sender<A>,
    /// Abort handles for effects registered via `Effect::Cancellable`,
    /// keyed by effect id. Registering under a live id replaces the
    /// previous registration; `Effect::Cancel` aborts the current one.
    cancellations: Mutex<HashMap<EffectId, AbortHandle>>,
}

/// The Store - runtime coordinator for a reducer
///
/// The Store manages:
/// 1. State (behind `RwLock` for concurrent access)
/// 2. Reducer (business logic)
/// 3. Environment (injected dependencies)
/// 4. Effect execution (with feedback loop and cancellation)
///
/// Cloning a Store is cheap and yields another handle on the same state.
///
/// # Type Parameters
///
/// - `S`: State type
/// - `A`: Action type
/// - `E`: Environment type
/// - `R`: Reducer implementation
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    inner: Arc<Inner<S, A, E, R>>,
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    A: Send + Clone + 'static,
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a new store with initial state, reducer, and environment
    ///
    /// Action broadcast capacity defaults to 16; increase with
    /// [`Store::with_broadcast_capacity`] if observers frequently lag.
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self::with_broadcast_capacity(initial_state, reducer, environment, 16)
    }

    /// Create a new Store with custom action broadcast capacity
    #[must_use]
    pub fn with_broadcast_capacity(
        initial_state: S,
        reducer: R,
        environment: E,
        capacity: usize,
    ) -> Self {
        let (action_tx, _) = broadcast::channel(capacity);

        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(initial_state),
                reducer,
                environment,
                shutdown: AtomicBool::new(false),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_tx,
                cancellations: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Send an action to the store
    ///
    /// 1. Acquires the write lock on state
    /// 2. Calls the reducer with (state, action, environment)
    /// 3. Executes returned effects asynchronously
    /// 4. Effects may produce more actions (feedback loop)
    ///
    /// `send()` returns after starting effect execution, not completion.
    /// Multiple concurrent `send()` calls serialize at the reducer level,
    /// so no two reductions are ever applied concurrently to one store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
    #[tracing::instrument(skip(self, action), name = "store_send")]
    pub async fn send(&self, action: A) -> Result<(), StoreError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            tracing::warn!("Rejected action: store is shutting down");
            return Err(StoreError::ShutdownInProgress);
        }

        metrics::counter!("store.actions.total").increment(1);
        Inner::reduce_and_run(&self.inner, action).await;
        Ok(())
    }

    /// Send an action and wait for a matching result action
    ///
    /// Designed for request-response patterns: subscribes to the action
    /// broadcast BEFORE sending (avoiding a race), sends the action, then
    /// waits for an effect-produced action matching the predicate.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Timeout`]: timeout expired before a matching action
    /// - [`StoreError::ChannelClosed`]: broadcast channel closed
    /// - [`StoreError::ShutdownInProgress`]: store is shutting down
    pub async fn send_and_wait_for<F>(
        &self,
        action: A,
        predicate: F,
        timeout: Duration,
    ) -> Result<A, StoreError>
    where
        F: Fn(&A) -> bool,
    {
        let mut rx = self.inner.action_tx.subscribe();

        self.send(action).await?;

        tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok(action) if predicate(&action) => return Ok(action),
                    Ok(_) => {},
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Slow consumer; if the terminal action was among the
                        // skipped ones the timeout catches it.
                        tracing::warn!(skipped, "Action observer lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(StoreError::ChannelClosed);
                    },
                }
            }
        })
        .await
        .map_err(|_| StoreError::Timeout)?
    }

    /// Subscribe to all actions produced by effects
    ///
    /// Only effect-produced actions are broadcast, not the initial actions
    /// passed to [`Store::send`].
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
        self.inner.action_tx.subscribe()
    }

    /// Read current state via a closure
    ///
    /// ```ignore
    /// let stage = store.state(|s| s.stage).await;
    /// ```
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.inner.state.read().await;
        f(&state)
    }

    /// Number of effects currently running (for diagnostics and tests).
    #[must_use]
    pub fn pending_effects(&self) -> usize {
        self.inner.pending_effects.load(Ordering::Acquire)
    }

    /// Initiate graceful shutdown of the store
    ///
    /// Sets the shutdown flag (rejecting new actions) and waits for pending
    /// effects to complete, polling until done or the timeout expires.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if the timeout expires before
    /// all pending effects complete.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        tracing::info!("Initiating graceful store shutdown");
        self.inner.shutdown.store(true, Ordering::Release);

        // Abort anything cancellable; timers have no business outliving the store.
        {
            let mut map = self
                .inner
                .cancellations
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            for (_, handle) in map.drain() {
                handle.abort();
            }
        }

        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(10);

        loop {
            let pending = self.inner.pending_effects.load(Ordering::Acquire);
            if pending == 0 {
                tracing::info!("All effects completed, shutdown successful");
                return Ok(());
            }
            if start.elapsed() >= timeout {
                tracing::error!(pending_effects = pending, "Shutdown timed out");
                return Err(StoreError::ShutdownTimeout(pending));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl<S, A, E, R> Inner<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    A: Send + Clone + 'static,
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Run the reducer for one action and start its effects.
    async fn reduce_and_run(this: &Arc<Self>, action: A) {
        let effects = {
            let mut state = this.state.write().await;
            this.reducer.reduce(&mut state, action, &this.environment)
        };

        // Effect counts are tiny; the cast cannot lose precision.
        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("store.effects.count").record(effects.len() as f64);
        for effect in effects {
            Self::start_effect(this, effect);
        }
    }

    /// Feed an effect-produced action back into the reducer.
    ///
    /// Effect-produced actions (and only those) are broadcast to observers
    /// before being reduced.
    async fn feedback(this: &Arc<Self>, action: A) {
        if this.shutdown.load(Ordering::Acquire) {
            tracing::debug!("Dropping effect-produced action: store is shutting down");
            return;
        }
        let _ = this.action_tx.send(action.clone());
        Self::reduce_and_run(this, action).await;
    }

    /// Start executing one effect.
    ///
    /// `None` and `Cancel` are handled inline; everything else runs in a
    /// spawned task tracked by the pending-effect counter.
    fn start_effect(this: &Arc<Self>, effect: Effect<A>) {
        match effect {
            Effect::None => {},
            Effect::Cancel(id) => {
                let removed = {
                    let mut map = this
                        .cancellations
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    map.remove(&id)
                };
                if let Some(handle) = removed {
                    tracing::debug!(effect_id = %id, "Cancelling effect");
                    handle.abort();
                }
            },
            Effect::Parallel(effects) => {
                for effect in effects {
                    Self::start_effect(this, effect);
                }
            },
            Effect::Cancellable { id, effect } => {
                this.pending_effects.fetch_add(1, Ordering::SeqCst);
                let guard = PendingGuard(Arc::clone(&this.pending_effects));
                let inner = Arc::clone(this);
                let task = tokio::spawn(async move {
                    let _guard = guard;
                    Self::run_effect(inner, *effect).await;
                });

                // Re-registration replaces the handle without aborting: a
                // tick chain re-registers from within the task being
                // replaced, which has already done its work. Restarting a
                // chain from elsewhere must emit Effect::Cancel first.
                let mut map = this
                    .cancellations
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                map.insert(id, task.abort_handle());
            },
            effect => {
                this.pending_effects.fetch_add(1, Ordering::SeqCst);
                let guard = PendingGuard(Arc::clone(&this.pending_effects));
                let inner = Arc::clone(this);
                tokio::spawn(async move {
                    let _guard = guard;
                    Self::run_effect(inner, effect).await;
                });
            },
        }
    }

    /// Execute one effect to completion within the current task.
    ///
    /// Boxed because `Sequential` recurses.
    fn run_effect(this: Arc<Self>, effect: Effect<A>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            match effect {
                structural @ (Effect::None
                | Effect::Cancel(_)
                | Effect::Cancellable { .. }
                | Effect::Parallel(_)) => {
                    // Structural effects re-enter the dispatcher so their
                    // bookkeeping (counters, cancellation registry) happens
                    // in one place.
                    Self::start_effect(&this, structural);
                },
                Effect::Sequential(effects) => {
                    for effect in effects {
                        Self::run_effect(Arc::clone(&this), effect).await;
                    }
                },
                Effect::Delay { duration, action } => {
                    tokio::time::sleep(duration).await;
                    Self::feedback(&this, *action).await;
                },
                Effect::Future(fut) => {
                    if let Some(action) = fut.await {
                        Self::feedback(&this, action).await;
                    }
                },
            }
        })
    }
}
