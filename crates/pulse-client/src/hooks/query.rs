//! `useQuery` (§4.5): a reactive, cached, deduplicated, version-gated data fetch.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use pulse_reactive::{create_effect, create_signal, on_cleanup, ReadSignal, Signal};
use serde_json::Value;

use crate::client::{Client, GraphQlRequest};
use crate::error::PulseError;
use crate::hooks::events::EventSource;
use crate::runtime::{sleep, spawn_local_scoped};
use crate::version::{VersionController, VersionToken};

/// `status` transitions: `Idle -> Loading -> (Success | Error)`, matching §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// No execution has started yet.
    Idle,
    /// An execution is in flight and `data` has never been populated.
    Loading,
    /// The most recently published execution succeeded.
    Success,
    /// The most recently published execution failed.
    Error,
}

/// Whether a query runs automatically, and if so under what reactive condition.
#[derive(Clone, Copy)]
pub enum Enabled {
    /// Always (or never) runs, regardless of any signal.
    Static(bool),
    /// Runs only while the given signal reads `true`; toggling it off cancels future automatic
    /// executions (the interval timer and focus/reconnect listeners still check it, but no longer
    /// fire).
    Reactive(ReadSignal<bool>),
}

impl Default for Enabled {
    fn default() -> Self {
        Enabled::Static(true)
    }
}

impl Enabled {
    fn get(&self) -> bool {
        match self {
            Enabled::Static(b) => *b,
            Enabled::Reactive(s) => s.get(),
        }
    }

    fn get_untracked(&self) -> bool {
        match self {
            Enabled::Static(b) => *b,
            Enabled::Reactive(s) => s.get_untracked(),
        }
    }
}

impl From<bool> for Enabled {
    fn from(b: bool) -> Self {
        Enabled::Static(b)
    }
}

impl From<Signal<bool>> for Enabled {
    fn from(s: Signal<bool>) -> Self {
        Enabled::Reactive(*s)
    }
}

impl From<ReadSignal<bool>> for Enabled {
    fn from(s: ReadSignal<bool>) -> Self {
        Enabled::Reactive(s)
    }
}

/// Options accepted by [`use_query`]. Every field is optional; `QueryOptions::default()` gives
/// the spec-mandated defaults.
#[derive(Clone, Default)]
pub struct QueryOptions {
    /// Whether the query executes automatically. Defaults to always enabled.
    pub enabled: Enabled,
    /// Overrides the client's default `dedupe` setting for this query only.
    pub dedupe: Option<bool>,
    /// If set, the query automatically refetches on this interval, skipped entirely while a
    /// fetch is already `loading`/`fetching`.
    pub refetch_interval: Option<Duration>,
    /// Refetch whenever this host-provided event fires (e.g. window regains focus).
    pub refetch_on_focus: Option<Rc<dyn EventSource>>,
    /// Refetch whenever this host-provided event fires (e.g. network reconnects).
    pub refetch_on_reconnect: Option<Rc<dyn EventSource>>,
    /// Transforms the raw response data before it is published to `data`.
    pub select: Option<Rc<dyn Fn(&Value) -> Value>>,
    /// Called once per successful, still-current execution.
    pub on_success: Option<Rc<dyn Fn(&Value)>>,
    /// Called once per failed, still-current execution.
    pub on_error: Option<Rc<dyn Fn(&PulseError)>>,
}

struct QueryState {
    client: Client,
    request: Rc<dyn Fn() -> GraphQlRequest>,
    data: Signal<Option<Rc<Value>>>,
    error: Signal<Option<Rc<PulseError>>>,
    loading: ReadSignal<bool>,
    fetching: Signal<bool>,
    status: Signal<QueryStatus>,
    is_stale: Signal<bool>,
    version: VersionController,
    last_key: RefCell<Option<String>>,
    dedupe: bool,
    select: Option<Rc<dyn Fn(&Value) -> Value>>,
    on_success: Option<Rc<dyn Fn(&Value)>>,
    on_error: Option<Rc<dyn Fn(&PulseError)>>,
}

impl QueryState {
    fn execute(self: &Rc<Self>, request: GraphQlRequest) {
        let key = request.cache_key();
        *self.last_key.borrow_mut() = Some(key.clone());

        if let Some(value) = self.fresh_cached_value(&key) {
            self.fetching.set(false);
            self.data.set(Some(value.clone()));
            self.error.set(None);
            self.status.set(QueryStatus::Success);
            self.is_stale.set(false);
            if let Some(cb) = &self.on_success {
                cb(&value);
            }
            return;
        }

        let token = self.version.begin();
        self.fetching.set(true);
        if self.data.with_untracked(Option::is_none) {
            self.status.set(QueryStatus::Loading);
        }

        let this = self.clone();
        let fut = this.client.execute(request, this.dedupe);
        spawn_local_scoped(async move {
            let result = fut.await;
            this.publish(token, result);
        });
    }

    /// Consults `staleTime` (§4.5, §9's Open Question on `cacheTime`/`staleTime`): a cache hit
    /// younger than `stale_time` is served directly, skipping the network entirely. `stale_time ==
    /// 0` (the default) means "never fresh", i.e. always refetch, matching the spec default.
    fn fresh_cached_value(&self, key: &str) -> Option<Rc<Value>> {
        let stale_time = self.client.options().stale_time;
        if stale_time.is_zero() {
            return None;
        }
        let age = self.client.cache_age(key)?;
        if age >= stale_time {
            return None;
        }
        let value = self.client.cache_peek(key)?;
        Some(match &self.select {
            Some(select) => Rc::new(select(&value)),
            None => value,
        })
    }

    fn current_request(&self) -> GraphQlRequest {
        (self.request)()
    }

    fn publish(
        self: Rc<Self>,
        token: VersionToken,
        result: Result<Rc<Value>, Rc<PulseError>>,
    ) {
        let published = token.if_current(|| {
            self.fetching.set(false);
            match result {
                Ok(value) => {
                    let value = match &self.select {
                        Some(select) => Rc::new(select(&value)),
                        None => value,
                    };
                    self.data.set(Some(value.clone()));
                    self.error.set(None);
                    self.status.set(QueryStatus::Success);
                    self.is_stale.set(false);
                    if let Some(cb) = &self.on_success {
                        cb(&value);
                    }
                }
                Err(err) => {
                    self.error.set(Some(err.clone()));
                    self.status.set(QueryStatus::Error);
                    if let Some(cb) = &self.on_error {
                        cb(&err);
                    }
                }
            }
        });

        #[cfg(feature = "trace")]
        if published.is_none() {
            tracing::debug!(generation = token.generation(), "discarded stale query completion");
        }
        #[cfg(not(feature = "trace"))]
        let _ = published;
    }
}

/// The reactive handle returned by [`use_query`].
#[derive(Clone)]
pub struct QueryHandle {
    /// The most recently published successful result, if any.
    pub data: Signal<Option<Rc<Value>>>,
    /// The most recently published error, if any. Cleared on the next success.
    pub error: Signal<Option<Rc<PulseError>>>,
    /// `true` only while an execution is in flight and `data` has never been populated yet.
    pub loading: ReadSignal<bool>,
    /// `true` while any execution is in flight, including background refetches.
    pub fetching: Signal<bool>,
    /// The current [`QueryStatus`].
    pub status: Signal<QueryStatus>,
    /// Set by [`QueryHandle::invalidate`]; cleared on the next successful publish.
    pub is_stale: Signal<bool>,
    state: Rc<QueryState>,
}

impl QueryHandle {
    /// Re-executes the query immediately, regardless of `enabled`.
    pub fn refetch(&self) {
        let request = self.state.current_request();
        self.state.execute(request);
    }

    /// Marks the query stale and evicts its cache entry for the key it was last executed with. A
    /// no-op if the query has never executed.
    pub fn invalidate(&self) {
        self.is_stale.set(true);
        if let Some(key) = self.state.last_key.borrow().as_ref() {
            self.state.client.invalidate(key);
        }
    }

    /// Resets every signal to its construction-time value.
    pub fn reset(&self) {
        self.data.set(None);
        self.error.set(None);
        self.fetching.set(false);
        self.status.set(QueryStatus::Idle);
        self.is_stale.set(false);
    }
}

/// Creates a query bound to `client`, re-executing automatically whenever any signal read inside
/// `request` changes (the GraphQL analog of a dependent query key), subject to `options.enabled`.
///
/// `request` is called inside a tracked reactive scope, so reading a [`Signal`] (for example, one
/// holding the query's variables) inside it makes the query re-run whenever that signal changes,
/// exactly like a `computed`'s dependency tracking.
pub fn use_query(
    client: &Client,
    request: impl Fn() -> GraphQlRequest + 'static,
    options: QueryOptions,
) -> QueryHandle {
    let data: Signal<Option<Rc<Value>>> = create_signal(None);
    let error: Signal<Option<Rc<PulseError>>> = create_signal(None);
    let fetching = create_signal(false);
    let status = create_signal(QueryStatus::Idle);
    let is_stale = create_signal(false);
    let loading = data.map(move |d: &Option<Rc<Value>>| d.is_none() && fetching.get());

    let dedupe = options.dedupe.unwrap_or(client.options().dedupe);
    let request: Rc<dyn Fn() -> GraphQlRequest> = Rc::new(request);
    let state = Rc::new(QueryState {
        client: client.clone(),
        request: request.clone(),
        data,
        error,
        loading,
        fetching,
        status,
        is_stale,
        version: VersionController::new(),
        last_key: RefCell::new(None),
        dedupe,
        select: options.select.clone(),
        on_success: options.on_success.clone(),
        on_error: options.on_error.clone(),
    });

    let enabled = options.enabled;

    {
        let state = state.clone();
        let request = request.clone();
        create_effect(move || {
            let req = request();
            if enabled.get() {
                state.execute(req);
            }
        });
    }

    if let Some(interval) = options.refetch_interval {
        let state = state.clone();
        let request = request.clone();
        spawn_local_scoped(async move {
            loop {
                sleep(interval).await;
                if enabled.get_untracked()
                    && !state.loading.get_untracked()
                    && !state.fetching.get_untracked()
                {
                    state.execute(request());
                }
            }
        });
    }

    if let Some(source) = options.refetch_on_focus.clone() {
        let state = state.clone();
        let request = request.clone();
        let dispose = source.subscribe(Box::new(move || {
            if enabled.get_untracked() {
                state.execute(request());
            }
        }));
        on_cleanup(move || dispose());
    }

    if let Some(source) = options.refetch_on_reconnect.clone() {
        let state = state.clone();
        let request = request.clone();
        let dispose = source.subscribe(Box::new(move || {
            if enabled.get_untracked() {
                state.execute(request());
            }
        }));
        on_cleanup(move || dispose());
    }

    QueryHandle {
        data: state.data,
        error: state.error,
        loading: state.loading,
        fetching: state.fetching,
        status: state.status,
        is_stale: state.is_stale,
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
    use std::cell::Cell;

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

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn executes_once_when_enabled() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let client = client_returning(json!({"x": 1}));
                let handle_cell: Rc<RefCell<Option<QueryHandle>>> = Rc::new(RefCell::new(None));
                let root = {
                    let client = client.clone();
                    let handle_cell = handle_cell.clone();
                    create_root(move || {
                        let handle = use_query(
                            &client,
                            || GraphQlRequest::new("query Q { x }").with_operation_name("Q"),
                            QueryOptions::default(),
                        );
                        *handle_cell.borrow_mut() = Some(handle);
                    })
                };
                settle().await;
                let handle = handle_cell.borrow().clone().unwrap();
                assert_eq!(handle.status.get(), QueryStatus::Success);
                assert_eq!(*handle.data.get_clone().unwrap(), json!({"x": 1}));
                assert!(!handle.fetching.get());
                root.dispose();
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn disabled_query_never_executes() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let count = Rc::new(Cell::new(0));
                let client = {
                    let count = count.clone();
                    Client::new(ClientOptions::default(), move |_req| {
                        let count = count.clone();
                        async move {
                            count.set(count.get() + 1);
                            Ok(GraphQlResponse {
                                data: Some(json!({})),
                                errors: vec![],
                            })
                        }
                        .boxed_local()
                    })
                };
                let handle_cell: Rc<RefCell<Option<QueryHandle>>> = Rc::new(RefCell::new(None));
                let root = {
                    let client = client.clone();
                    let handle_cell = handle_cell.clone();
                    create_root(move || {
                        let handle = use_query(
                            &client,
                            || GraphQlRequest::new("query Q { x }"),
                            QueryOptions {
                                enabled: false.into(),
                                ..Default::default()
                            },
                        );
                        *handle_cell.borrow_mut() = Some(handle);
                    })
                };
                settle().await;
                assert_eq!(count.get(), 0);
                let handle = handle_cell.borrow().clone().unwrap();
                assert_eq!(handle.status.get(), QueryStatus::Idle);
                root.dispose();
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn invalidate_marks_stale_and_evicts_cache() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let client = client_returning(json!({"y": 2}));
                let handle_cell: Rc<RefCell<Option<QueryHandle>>> = Rc::new(RefCell::new(None));
                let root = {
                    let client = client.clone();
                    let handle_cell = handle_cell.clone();
                    create_root(move || {
                        let handle = use_query(
                            &client,
                            || GraphQlRequest::new("query Q2 { y }").with_operation_name("Q2"),
                            QueryOptions::default(),
                        );
                        *handle_cell.borrow_mut() = Some(handle);
                    })
                };
                settle().await;
                let handle = handle_cell.borrow().clone().unwrap();
                let key = GraphQlRequest::new("query Q2 { y }")
                    .with_operation_name("Q2")
                    .cache_key();
                assert!(client.cache_peek(&key).is_some());

                handle.invalidate();
                assert!(handle.is_stale.get());
                assert!(client.cache_peek(&key).is_none());
                root.dispose();
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn refetch_reruns_with_the_latest_request_closure() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let count = Rc::new(Cell::new(0));
                let client = {
                    let count = count.clone();
                    Client::new(ClientOptions::default(), move |_req| {
                        let count = count.clone();
                        async move {
                            let n = count.get() + 1;
                            count.set(n);
                            Ok(GraphQlResponse {
                                data: Some(json!({ "n": n })),
                                errors: vec![],
                            })
                        }
                        .boxed_local()
                    })
                };
                let handle_cell: Rc<RefCell<Option<QueryHandle>>> = Rc::new(RefCell::new(None));
                let root = {
                    let client = client.clone();
                    let handle_cell = handle_cell.clone();
                    create_root(move || {
                        let handle = use_query(
                            &client,
                            || GraphQlRequest::new("query Q3 { n }").with_operation_name("Q3"),
                            QueryOptions::default(),
                        );
                        *handle_cell.borrow_mut() = Some(handle);
                    })
                };
                settle().await;
                let handle = handle_cell.borrow().clone().unwrap();
                assert_eq!(*handle.data.get_clone().unwrap(), json!({ "n": 1 }));

                handle.refetch();
                settle().await;
                assert_eq!(*handle.data.get_clone().unwrap(), json!({ "n": 2 }));
                root.dispose();
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fresh_cache_entry_within_stale_time_skips_refetch() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let count = Rc::new(Cell::new(0));
                let client = {
                    let count = count.clone();
                    Client::new(
                        ClientOptions::default().with_stale_time(Duration::from_secs(60)),
                        move |_req| {
                            let count = count.clone();
                            async move {
                                let n = count.get() + 1;
                                count.set(n);
                                Ok(GraphQlResponse {
                                    data: Some(json!({ "n": n })),
                                    errors: vec![],
                                })
                            }
                            .boxed_local()
                        },
                    )
                };
                let handle_cell: Rc<RefCell<Option<QueryHandle>>> = Rc::new(RefCell::new(None));
                let root = {
                    let client = client.clone();
                    let handle_cell = handle_cell.clone();
                    create_root(move || {
                        let handle = use_query(
                            &client,
                            || GraphQlRequest::new("query Q4 { n }").with_operation_name("Q4"),
                            QueryOptions::default(),
                        );
                        *handle_cell.borrow_mut() = Some(handle);
                    })
                };
                settle().await;
                let handle = handle_cell.borrow().clone().unwrap();
                assert_eq!(*handle.data.get_clone().unwrap(), json!({ "n": 1 }));
                assert_eq!(count.get(), 1);

                // Within stale_time: refetch() should be served from cache, not dispatch again.
                handle.refetch();
                settle().await;
                assert_eq!(count.get(), 1);
                assert_eq!(*handle.data.get_clone().unwrap(), json!({ "n": 1 }));
                root.dispose();
            })
            .await;
    }
}
