//! `useSubscription` (§4.5): a long-lived graphql-ws stream with retry/backoff on top of
//! [`crate::ws::SubscriptionManager`].

use std::rc::Rc;
use std::time::Duration;

use futures::future::AbortHandle;
use pulse_reactive::{create_signal, on_cleanup, Signal};
use rand::Rng;
use serde_json::Value;

use crate::client::GraphQlErrorEntry;
use crate::error::{GraphQlErrorCode, PulseError};
use crate::runtime::{sleep, spawn_local_scoped_abortable};
use crate::ws::{SubscriptionId, SubscriptionManager, WsConnection};

/// `status` values for a live subscription (§4.5/§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// The initial subscribe frame has been sent (or queued) but no data has arrived yet.
    Connecting,
    /// At least one `next` message has been received.
    Connected,
    /// The most recent attempt ended in a server `error` or socket closure.
    Error,
    /// A retry is scheduled and its backoff delay is counting down.
    Reconnecting,
    /// `unsubscribe()` was called, or the server sent `complete`.
    Closed,
    /// `maxRetries` was exceeded; no further automatic attempts will be made.
    Failed,
}

/// Options accepted by [`use_subscription`].
#[derive(Clone)]
pub struct SubscriptionOptions {
    /// Whether an error triggers an automatic resubscribe. Default `true`.
    pub should_resubscribe: bool,
    /// Maximum automatic retry attempts before transitioning to `Failed`. Default 5.
    pub max_retries: u32,
    /// Base delay for [`calculate_backoff_delay`]. Default 1000ms.
    pub base_delay: Duration,
    /// Maximum delay for [`calculate_backoff_delay`]. Default 30_000ms.
    pub max_delay: Duration,
    /// Called with each `next` payload.
    pub on_data: Option<Rc<dyn Fn(&Value)>>,
    /// Called with each normalized error (server `error` frame or socket closure).
    pub on_error: Option<Rc<dyn Fn(&PulseError)>>,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        SubscriptionOptions {
            should_resubscribe: true,
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            on_data: None,
            on_error: None,
        }
    }
}

/// Computes the backoff delay for retry attempt `attempt` (0-indexed): `min(base * 2^attempt,
/// max)`, jittered by up to ±25%. Matches §4.5/§8's `0 <= delay <= 1.25 * min(base * 2^k, max)`
/// bound (the lower bound is enforced by clamping jitter from below at 0.75x rather than allowing
/// it to go negative).
pub fn calculate_backoff_delay(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    let exponential = base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = exponential.min(max_delay);
    let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
    let factor = (1.0 + jitter).max(0.0);
    capped.mul_f64(factor)
}

struct SubscriptionState<C> {
    manager: SubscriptionManager<C>,
    query: String,
    operation_name: Option<String>,
    variables: Option<Value>,
    data: Signal<Option<Value>>,
    error: Signal<Option<Rc<PulseError>>>,
    status: Signal<SubscriptionStatus>,
    retry_count: Signal<u32>,
    options: SubscriptionOptions,
    current_id: std::cell::RefCell<Option<SubscriptionId>>,
    retry_handle: std::cell::RefCell<Option<AbortHandle>>,
}

impl<C: WsConnection + 'static> SubscriptionState<C> {
    fn start(self: &Rc<Self>) {
        // A retry that already fired is no longer "pending"; a retry that hasn't fired yet is
        // superseded by this direct call (e.g. from `resubscribe()`), so either way there is
        // nothing left for `stop()` to abort.
        self.retry_handle.borrow_mut().take();
        self.status.set(SubscriptionStatus::Connecting);
        let this = self.clone();
        let this_for_error = self.clone();
        let this_for_complete = self.clone();

        let id = self.manager.subscribe(
            self.query.clone(),
            self.operation_name.clone(),
            self.variables.clone(),
            move |data| {
                this.retry_count.set(0);
                this.status.set(SubscriptionStatus::Connected);
                this.data.set(Some(data.clone()));
                if let Some(cb) = &this.options.on_data {
                    cb(&data);
                }
            },
            move |errors| {
                let err = normalize_ws_errors(errors);
                this_for_error.status.set(SubscriptionStatus::Error);
                this_for_error.error.set(Some(Rc::new(err.clone())));
                if let Some(cb) = &this_for_error.options.on_error {
                    cb(&err);
                }
                this_for_error.maybe_retry();
            },
            move || {
                this_for_complete.status.set(SubscriptionStatus::Closed);
            },
        );
        *self.current_id.borrow_mut() = Some(id);
    }

    fn maybe_retry(self: &Rc<Self>) {
        if !self.options.should_resubscribe {
            self.status.set(SubscriptionStatus::Failed);
            return;
        }
        let attempt = self.retry_count.get_untracked();
        if attempt >= self.options.max_retries {
            self.status.set(SubscriptionStatus::Failed);
            return;
        }

        self.status.set(SubscriptionStatus::Reconnecting);
        self.retry_count.set(attempt + 1);

        let delay = calculate_backoff_delay(attempt, self.options.base_delay, self.options.max_delay);
        let this = self.clone();
        let handle = spawn_local_scoped_abortable(async move {
            sleep(delay).await;
            this.start();
        });
        *self.retry_handle.borrow_mut() = Some(handle);
    }

    /// Cancels any pending retry timer and closes the stream. A retry timer that has already
    /// fired (and so already cleared `retry_handle` from `start()`) has nothing to abort; one
    /// still sleeping is cut off before it can call `start()` and resurrect a closed subscription.
    fn stop(&self) {
        if let Some(handle) = self.retry_handle.borrow_mut().take() {
            handle.abort();
        }
        if let Some(id) = self.current_id.borrow_mut().take() {
            self.manager.unsubscribe(&id);
        }
    }
}

fn normalize_ws_errors(errors: Vec<GraphQlErrorEntry>) -> PulseError {
    match errors.into_iter().next() {
        Some(first) => PulseError::GraphQl {
            code: GraphQlErrorCode::Subscription,
            message: first.message,
        },
        None => PulseError::GraphQl {
            code: GraphQlErrorCode::Subscription,
            message: "subscription error".to_string(),
        },
    }
}

/// The reactive handle returned by [`use_subscription`].
pub struct SubscriptionHandle<C> {
    /// The most recently received `next` payload.
    pub data: Signal<Option<Value>>,
    /// The most recently published error, if any.
    pub error: Signal<Option<Rc<PulseError>>>,
    /// The current [`SubscriptionStatus`].
    pub status: Signal<SubscriptionStatus>,
    /// Number of automatic retries performed since the last successful `next`.
    pub retry_count: Signal<u32>,
    state: Rc<SubscriptionState<C>>,
}

impl<C> Clone for SubscriptionHandle<C> {
    fn clone(&self) -> Self {
        SubscriptionHandle {
            data: self.data,
            error: self.error,
            status: self.status,
            retry_count: self.retry_count,
            state: self.state.clone(),
        }
    }
}

impl<C: WsConnection + 'static> SubscriptionHandle<C> {
    /// Cancels any pending retry timer and closes the stream.
    pub fn unsubscribe(&self) {
        self.state.stop();
        self.status.set(SubscriptionStatus::Closed);
    }

    /// Unsubscribes, then subscribes again, resetting the retry count.
    pub fn resubscribe(&self) {
        self.state.stop();
        self.state.retry_count.set(0);
        self.state.start();
    }
}

/// Subscribes to `query` over `manager`, applying the retry/backoff policy in `options`. The
/// returned handle owns the subscription for the lifetime of the current reactive scope: when the
/// scope is disposed, any pending retry timer is aborted (though the underlying socket, shared by
/// every subscription of the client, is not closed).
pub fn use_subscription<C: WsConnection + 'static>(
    manager: &SubscriptionManager<C>,
    query: impl Into<String>,
    operation_name: Option<String>,
    variables: Option<Value>,
    options: SubscriptionOptions,
) -> SubscriptionHandle<C> {
    let data = create_signal(None);
    let error = create_signal(None);
    let status = create_signal(SubscriptionStatus::Connecting);
    let retry_count = create_signal(0);

    let state = Rc::new(SubscriptionState {
        manager: manager.clone(),
        query: query.into(),
        operation_name,
        variables,
        data,
        error,
        status,
        retry_count,
        options,
        current_id: std::cell::RefCell::new(None),
        retry_handle: std::cell::RefCell::new(None),
    });

    state.start();

    {
        let state = state.clone();
        on_cleanup(move || state.stop());
    }

    SubscriptionHandle {
        data: state.data,
        error: state.error,
        status: state.status,
        retry_count: state.retry_count,
        state,
    }
}
