//! `useMutation` (§4.5): a single-shot imperative GraphQL mutation with optimistic-update support.

use std::rc::Rc;

use pulse_reactive::{create_signal, Signal};
use serde_json::Value;

use crate::client::{Client, GraphQlRequest};
use crate::error::PulseError;
use crate::version::VersionController;

/// `status` transitions: `Idle -> Loading -> (Success | Error)`, one per [`MutationHandle::mutate`]
/// call, mirroring [`crate::hooks::QueryStatus`] but kept as a distinct type since the two hooks
/// have independent lifecycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    /// `mutate` has never been called.
    Idle,
    /// A call is in flight.
    Loading,
    /// The most recently published call succeeded.
    Success,
    /// The most recently published call failed.
    Error,
}

/// Options accepted by [`use_mutation`].
#[derive(Clone, Default)]
pub struct MutationOptions {
    /// Called synchronously before dispatch with the mutation's variables. Its return value (an
    /// arbitrary rollback context, e.g. the prior optimistic state) is threaded through to
    /// `on_success`/`on_error` for that same call.
    pub on_mutate: Option<Rc<dyn Fn(Option<&Value>) -> Option<Value>>>,
    /// Called once per successful, still-current call.
    pub on_success: Option<Rc<dyn Fn(&Value, Option<&Value>)>>,
    /// Called once per failed, still-current call.
    pub on_error: Option<Rc<dyn Fn(&PulseError, Option<&Value>)>>,
    /// Cache keys to evict on success.
    pub invalidate_queries: Vec<String>,
}

struct MutationState {
    client: Client,
    mutation: String,
    data: Signal<Option<Rc<Value>>>,
    error: Signal<Option<Rc<PulseError>>>,
    loading: Signal<bool>,
    status: Signal<MutationStatus>,
    version: VersionController,
    on_mutate: Option<Rc<dyn Fn(Option<&Value>) -> Option<Value>>>,
    on_success: Option<Rc<dyn Fn(&Value, Option<&Value>)>>,
    on_error: Option<Rc<dyn Fn(&PulseError, Option<&Value>)>>,
    invalidate_queries: Vec<String>,
}

impl MutationState {
    async fn run(
        self: Rc<Self>,
        variables: Option<Value>,
    ) -> Result<Rc<Value>, Rc<PulseError>> {
        let rollback = self
            .on_mutate
            .as_ref()
            .and_then(|f| f(variables.as_ref()));

        let token = self.version.begin();
        self.loading.set(true);
        self.status.set(MutationStatus::Loading);

        let mut request = GraphQlRequest::new(self.mutation.clone());
        if let Some(variables) = variables {
            request = request.with_variables(variables);
        }

        let result = self.client.execute(request, false).await;

        token.if_current(|| {
            self.loading.set(false);
            match &result {
                Ok(value) => {
                    self.data.set(Some(value.clone()));
                    self.error.set(None);
                    self.status.set(MutationStatus::Success);
                    self.client
                        .invalidate_many(self.invalidate_queries.iter().map(String::as_str));
                    if let Some(cb) = &self.on_success {
                        cb(value, rollback.as_ref());
                    }
                }
                Err(err) => {
                    self.error.set(Some(err.clone()));
                    self.status.set(MutationStatus::Error);
                    if let Some(cb) = &self.on_error {
                        cb(err, rollback.as_ref());
                    }
                }
            }
        });

        result
    }
}

/// The reactive handle returned by [`use_mutation`].
#[derive(Clone)]
pub struct MutationHandle {
    /// The most recently published successful result, if any.
    pub data: Signal<Option<Rc<Value>>>,
    /// The most recently published error, if any.
    pub error: Signal<Option<Rc<PulseError>>>,
    /// `true` while a call is in flight.
    pub loading: Signal<bool>,
    /// The current [`MutationStatus`].
    pub status: Signal<MutationStatus>,
    state: Rc<MutationState>,
}

impl MutationHandle {
    /// Runs the mutation with `variables`, publishing to the handle's signals when the call is
    /// still current, and always resolving/rejecting with the call's own result (re-throwing
    /// errors to the caller, unlike `use_query`'s `refetch`).
    pub async fn mutate(&self, variables: Option<Value>) -> Result<Rc<Value>, Rc<PulseError>> {
        self.state.clone().run(variables).await
    }

    /// Resets every signal to its construction-time value.
    pub fn reset(&self) {
        self.data.set(None);
        self.error.set(None);
        self.loading.set(false);
        self.status.set(MutationStatus::Idle);
    }
}

/// Creates a mutation bound to `client` for the given `mutation` document. Each
/// [`MutationHandle::mutate`] call is independent; a later call's completion always supersedes an
/// earlier one still in flight (version-gated, same discipline as `use_query`).
pub fn use_mutation(
    client: &Client,
    mutation: impl Into<String>,
    options: MutationOptions,
) -> MutationHandle {
    let data = create_signal(None);
    let error = create_signal(None);
    let loading = create_signal(false);
    let status = create_signal(MutationStatus::Idle);

    let state = Rc::new(MutationState {
        client: client.clone(),
        mutation: mutation.into(),
        data,
        error,
        loading,
        status,
        version: VersionController::new(),
        on_mutate: options.on_mutate,
        on_success: options.on_success,
        on_error: options.on_error,
        invalidate_queries: options.invalidate_queries,
    });

    MutationHandle {
        data: state.data,
        error: state.error,
        loading: state.loading,
        status: state.status,
        state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientOptions, GraphQlResponse};
    use futures::FutureExt;
    use pulse_reactive::create_root;
    use serde_json::json;
    use std::cell::{Cell, RefCell};

    fn client_returning(value: Value) -> Client {
        Client::new(ClientOptions::default(), move |_req| {
            let value = value.clone();
            async move {
                Ok(GraphQlResponse {
                    data: Some(value),
                    errors: vec![],
                })
            }
            .boxed_local()
        })
    }

    #[tokio::test(flavor = "current_thread")]
    async fn mutate_resolves_and_publishes_on_success() {
        let client = client_returning(json!({"id": 1}));
        let root = create_root(|| {});
        let handle = root.run_in(|| use_mutation(&client, "mutation M { id }", MutationOptions::default()));

        let result = handle.mutate(None).await.unwrap();
        assert_eq!(*result, json!({"id": 1}));
        assert_eq!(handle.status.get(), MutationStatus::Success);
        assert!(!handle.loading.get());
        root.dispose();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn mutate_reports_rollback_context_to_callbacks() {
        let client = Client::new(ClientOptions::default(), |_req| {
            async { Err(PulseError::Timeout) }.boxed_local()
        });
        let seen_rollback: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
        let options = {
            let seen_rollback = seen_rollback.clone();
            MutationOptions {
                on_mutate: Some(Rc::new(|vars: Option<&Value>| {
                    vars.cloned().map(|v| json!({ "rollback_for": v }))
                })),
                on_error: Some(Rc::new(move |_err, ctx: Option<&Value>| {
                    *seen_rollback.borrow_mut() = ctx.cloned();
                })),
                ..Default::default()
            }
        };

        let root = create_root(|| {});
        let handle = root.run_in(|| use_mutation(&client, "mutation M($x: Int) { x }", options));

        let err = handle.mutate(Some(json!(5))).await.unwrap_err();
        assert!(matches!(&*err, PulseError::Timeout));
        assert_eq!(
            *seen_rollback.borrow(),
            Some(json!({ "rollback_for": 5 }))
        );
        assert_eq!(handle.status.get(), MutationStatus::Error);
        root.dispose();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn mutate_invalidates_listed_cache_keys_on_success() {
        let client = client_returning(json!({"ok": true}));
        let query_key = GraphQlRequest::new("query Q { x }")
            .with_operation_name("Q")
            .cache_key();
        client
            .execute(
                GraphQlRequest::new("query Q { x }").with_operation_name("Q"),
                true,
            )
            .await
            .unwrap();
        assert!(client.cache_peek(&query_key).is_some());

        let options = MutationOptions {
            invalidate_queries: vec![query_key.clone()],
            ..Default::default()
        };
        let root = create_root(|| {});
        let handle = root.run_in(|| use_mutation(&client, "mutation M { x }", options));
        handle.mutate(None).await.unwrap();

        assert!(client.cache_peek(&query_key).is_none());
        root.dispose();
    }
}
