//! [`Client`]: the per-app object owning the cache, the in-flight dedup map, and the request/
//! response interceptor pipelines that `use_query`/`use_mutation`/`use_subscription` dispatch
//! through.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::dedup::DedupMap;
use crate::error::{GraphQlErrorCode, PulseError};
use crate::interceptor::{InterceptorId, InterceptorPipeline};
use crate::key::generate_cache_key;
use crate::lru::LruCache;

/// Configuration accepted by [`Client::new`]. Every field has a spec-mandated default (§6); use
/// the `with_*` builder methods to override individual ones.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// LRU capacity. Default 500.
    pub cache_max_size: usize,
    /// Time-to-live after which a cache entry is evicted outright. Default 300_000ms.
    pub cache_time: Duration,
    /// Window within which a cached entry is still considered fresh enough to skip a refetch.
    /// Default 0 (always considered stale, i.e. always refetch unless `enabled` says otherwise).
    pub stale_time: Duration,
    /// Whether identical in-flight queries share one dispatch. Default `true`.
    pub dedupe: bool,
    /// Whether a GraphQL-level error raises (via `if_current`-gated `error` signal publication
    /// plus `mutate()`/`refetch()` re-throw rules) rather than being ignored in favor of partial
    /// data. Default `true`.
    pub throw_on_error: bool,
    /// Whether a dropped subscription socket is automatically reconnected. Default `true`.
    pub ws_reconnect: bool,
    /// Maximum subscription retry attempts before transitioning to `failed`. Default 5.
    pub ws_max_retries: u32,
    /// Base delay for the subscription backoff formula (§4.5). Default 1000ms.
    pub retry_base_delay: Duration,
    /// Maximum delay for the subscription backoff formula. Default 30_000ms.
    pub retry_max_delay: Duration,
    /// Global on/off switch for the LRU cache layer (see Open Questions in the spec: the
    /// per-client `cache` option is not consulted per query, only as this blanket toggle).
    pub cache_enabled: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            cache_max_size: crate::lru::DEFAULT_MAX_SIZE,
            cache_time: Duration::from_millis(300_000),
            stale_time: Duration::from_millis(0),
            dedupe: true,
            throw_on_error: true,
            ws_reconnect: true,
            ws_max_retries: 5,
            retry_base_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_millis(30_000),
            cache_enabled: true,
        }
    }
}

macro_rules! with_setter {
    ($name:ident, $field:ident, $ty:ty) => {
        /// Builder-style setter; see the field doc on [`ClientOptions`].
        pub fn $name(mut self, value: $ty) -> Self {
            self.$field = value;
            self
        }
    };
}

impl ClientOptions {
    with_setter!(with_cache_max_size, cache_max_size, usize);
    with_setter!(with_cache_time, cache_time, Duration);
    with_setter!(with_stale_time, stale_time, Duration);
    with_setter!(with_dedupe, dedupe, bool);
    with_setter!(with_throw_on_error, throw_on_error, bool);
    with_setter!(with_ws_reconnect, ws_reconnect, bool);
    with_setter!(with_ws_max_retries, ws_max_retries, u32);
    with_setter!(with_retry_base_delay, retry_base_delay, Duration);
    with_setter!(with_retry_max_delay, retry_max_delay, Duration);
    with_setter!(with_cache_enabled, cache_enabled, bool);
}

/// A GraphQL operation ready for dispatch.
#[derive(Clone, Debug)]
pub struct GraphQlRequest {
    /// The raw query/mutation/subscription document.
    pub query: String,
    /// The operation name, used preferentially for cache key derivation.
    pub operation_name: Option<String>,
    /// JSON-encoded variables, if any.
    pub variables: Option<Value>,
}

impl GraphQlRequest {
    /// Creates a request with no operation name and no variables.
    pub fn new(query: impl Into<String>) -> Self {
        GraphQlRequest {
            query: query.into(),
            operation_name: None,
            variables: None,
        }
    }

    /// Sets the operation name.
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Sets the variables.
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    /// The cache key this request resolves to (§4.6).
    pub fn cache_key(&self) -> String {
        generate_cache_key(
            &self.query,
            self.operation_name.as_deref(),
            self.variables.as_ref(),
        )
    }
}

/// A single GraphQL error entry, as carried in a response's `errors` array.
#[derive(Clone, Debug)]
pub struct GraphQlErrorEntry {
    /// The error message.
    pub message: String,
    /// An optional machine-readable extension code (`code` under `extensions`), used to pick a
    /// [`GraphQlErrorCode`] sub-code.
    pub extension_code: Option<String>,
}

/// A raw GraphQL response, prior to error normalization.
#[derive(Clone, Debug, Default)]
pub struct GraphQlResponse {
    /// The `data` payload, if any (may coexist with `errors` for partial-data responses).
    pub data: Option<Value>,
    /// Any errors returned alongside (or instead of) `data`.
    pub errors: Vec<GraphQlErrorEntry>,
}

impl GraphQlResponse {
    fn into_result(self, throw_on_error: bool) -> Result<Value, PulseError> {
        if let Some(first) = self.errors.first() {
            let code = match first.extension_code.as_deref() {
                Some("UNAUTHENTICATED") => GraphQlErrorCode::Authentication,
                Some("FORBIDDEN") => GraphQlErrorCode::Authorization,
                Some("GRAPHQL_VALIDATION_FAILED") => GraphQlErrorCode::Validation,
                Some("GRAPHQL_PARSE_FAILED") => GraphQlErrorCode::Parse,
                _ => GraphQlErrorCode::Validation,
            };
            let err = PulseError::GraphQl {
                code,
                message: first.message.clone(),
            };
            if !throw_on_error {
                if let Some(data) = self.data {
                    return Ok(data);
                }
            }
            return Err(err);
        }
        Ok(self.data.unwrap_or(Value::Null))
    }
}

type Transport = Rc<dyn Fn(GraphQlRequest) -> LocalBoxFuture<'static, Result<GraphQlResponse, PulseError>>>;

/// The per-application async-coordination object: owns the LRU cache, the in-flight dedup map,
/// and the request/response interceptor pipelines. One `Client` is normally shared (via `Rc`
/// clone or reactive context) across every `use_query`/`use_mutation`/`use_subscription` call in
/// an app.
///
/// `Client` does not know how to actually perform a GraphQL request over the wire — that's
/// injected as a `transport` closure, keeping transport concerns (URL building, headers, retry at
/// the HTTP layer) out of this crate per the spec's Non-goals.
#[derive(Clone)]
pub struct Client {
    options: ClientOptions,
    cache: Rc<RefCell<LruCache<String, Rc<Value>>>>,
    dedup: DedupMap<Value>,
    request_interceptors: Rc<RefCell<InterceptorPipeline<GraphQlRequest, PulseError>>>,
    response_interceptors: Rc<RefCell<InterceptorPipeline<GraphQlResponse, PulseError>>>,
    transport: Transport,
}

impl Client {
    /// Creates a new client dispatching through `transport`.
    pub fn new(
        options: ClientOptions,
        transport: impl Fn(GraphQlRequest) -> LocalBoxFuture<'static, Result<GraphQlResponse, PulseError>>
            + 'static,
    ) -> Self {
        let cache_time = options.cache_time;
        Client {
            cache: Rc::new(RefCell::new(LruCache::new(
                options.cache_max_size,
                Some(cache_time),
            ))),
            dedup: DedupMap::new(),
            request_interceptors: Rc::new(RefCell::new(InterceptorPipeline::new())),
            response_interceptors: Rc::new(RefCell::new(InterceptorPipeline::new())),
            transport: Rc::new(transport),
            options,
        }
    }

    /// The options this client was configured with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Registers a request interceptor pair, run before dispatch. See [`InterceptorPipeline`].
    pub fn use_request_interceptor(
        &self,
        primary: impl Fn(GraphQlRequest) -> Result<GraphQlRequest, PulseError> + 'static,
        secondary: Option<
            impl Fn(PulseError) -> Result<GraphQlRequest, PulseError> + 'static,
        >,
    ) -> InterceptorId {
        self.request_interceptors
            .borrow_mut()
            .use_interceptor(primary, secondary)
    }

    /// Registers a response interceptor pair, run after dispatch but before cache insertion.
    pub fn use_response_interceptor(
        &self,
        primary: impl Fn(GraphQlResponse) -> Result<GraphQlResponse, PulseError> + 'static,
        secondary: Option<
            impl Fn(PulseError) -> Result<GraphQlResponse, PulseError> + 'static,
        >,
    ) -> InterceptorId {
        self.response_interceptors
            .borrow_mut()
            .use_interceptor(primary, secondary)
    }

    /// Removes a previously-registered request interceptor.
    pub fn eject_request_interceptor(&self, id: InterceptorId) {
        self.request_interceptors.borrow_mut().eject(id);
    }

    /// Removes a previously-registered response interceptor.
    pub fn eject_response_interceptor(&self, id: InterceptorId) {
        self.response_interceptors.borrow_mut().eject(id);
    }

    /// Looks up `key` in the cache without affecting in-flight dedup. Returns `None` if the cache
    /// layer is globally disabled, the key was never cached, or the entry expired.
    pub fn cache_peek(&self, key: &str) -> Option<Rc<Value>> {
        if !self.options.cache_enabled {
            return None;
        }
        self.cache.borrow_mut().peek(&key.to_string()).cloned()
    }

    /// The age of `key`'s cache entry, used by `use_query` to implement the `staleTime` policy.
    pub fn cache_age(&self, key: &str) -> Option<Duration> {
        self.cache.borrow().age(&key.to_string())
    }

    /// Evicts `key` from the cache. A no-op if the key was never cached (§8 idempotence).
    pub fn invalidate(&self, key: &str) {
        self.cache.borrow_mut().delete(&key.to_string());
    }

    /// Evicts every key in `keys`. Used by `use_mutation`'s `invalidate_queries` option.
    pub fn invalidate_many<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        for key in keys {
            self.invalidate(key);
        }
    }

    /// Clears the entire cache.
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    /// Dispatches `request`: runs it through the request interceptors, through dedup (if
    /// `dedupe`), through the transport, through the response interceptors, normalizes GraphQL
    /// errors, and populates the cache on success. Returns a value shared with any other caller
    /// that deduped onto the same in-flight operation.
    #[cfg_attr(
        feature = "trace",
        tracing::instrument(skip(self, request), fields(key = request.cache_key()))
    )]
    pub fn execute(
        &self,
        request: GraphQlRequest,
        dedupe: bool,
    ) -> LocalBoxFuture<'static, Result<Rc<Value>, Rc<PulseError>>> {
        let key = request.cache_key();
        let request_interceptors = self.request_interceptors.clone();
        let response_interceptors = self.response_interceptors.clone();
        let transport = self.transport.clone();
        let cache = self.cache.clone();
        let cache_enabled = self.options.cache_enabled;
        let throw_on_error = self.options.throw_on_error;
        let key_for_cache = key.clone();
        #[cfg(feature = "trace")]
        let key_for_log = key.clone();

        let dispatch = async move {
            let request = request_interceptors.borrow().run(request).map_err(Rc::new)?;
            let response = transport(request).await.map_err(Rc::new)?;
            let response = response_interceptors
                .borrow()
                .run(response)
                .map_err(Rc::new)?;
            let data = response.into_result(throw_on_error).map_err(Rc::new)?;
            let data = Rc::new(data);
            if cache_enabled {
                cache.borrow_mut().set(key_for_cache, data.clone());
            }
            #[cfg(feature = "trace")]
            tracing::trace!(key = %key_for_log, "dispatch settled");
            Ok(data)
        };

        if dedupe && self.options.dedupe {
            if let Some(existing) = self.dedup.get(&key) {
                #[cfg(feature = "trace")]
                tracing::debug!(%key, "joined in-flight dispatch");
                return existing.boxed_local();
            }
            self.dedup.register(key, dispatch).boxed_local()
        } else {
            dispatch.boxed_local()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc as StdRc;
    use serde_json::json;

    fn counting_client(count: StdRc<Cell<u32>>) -> Client {
        Client::new(ClientOptions::default(), move |_req: GraphQlRequest| {
            let count = count.clone();
            async move {
                count.set(count.get() + 1);
                Ok(GraphQlResponse {
                    data: Some(json!({"ok": true})),
                    errors: vec![],
                })
            }
            .boxed_local()
        })
    }

    #[tokio::test(flavor = "current_thread")]
    async fn execute_populates_cache() {
        let count = StdRc::new(Cell::new(0));
        let client = counting_client(count);
        let request = GraphQlRequest::new("query Q { x }").with_operation_name("Q");
        let key = request.cache_key();

        assert!(client.cache_peek(&key).is_none());
        client.execute(request, true).await.unwrap();
        assert!(client.cache_peek(&key).is_some());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_identical_queries_dedupe_to_one_dispatch() {
        let count = StdRc::new(Cell::new(0));
        let client = counting_client(count.clone());
        let request = || GraphQlRequest::new("query Q { x }").with_operation_name("Q");

        let (a, b) = futures::join!(
            client.execute(request(), true),
            client.execute(request(), true)
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(count.get(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn invalidate_is_idempotent_on_missing_key() {
        let count = StdRc::new(Cell::new(0));
        let client = counting_client(count);
        client.invalidate("gql:nonexistent");
        client.invalidate("gql:nonexistent");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn graphql_error_without_throw_on_error_returns_partial_data() {
        let client = Client::new(
            ClientOptions::default().with_throw_on_error(false),
            |_req: GraphQlRequest| {
                async move {
                    Ok(GraphQlResponse {
                        data: Some(json!({"partial": 1})),
                        errors: vec![GraphQlErrorEntry {
                            message: "field failed".into(),
                            extension_code: None,
                        }],
                    })
                }
                .boxed_local()
            },
        );
        let data = client
            .execute(GraphQlRequest::new("query Q { x }"), true)
            .await
            .unwrap();
        assert_eq!(*data, json!({"partial": 1}));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn graphql_error_with_throw_on_error_propagates() {
        let client = Client::new(ClientOptions::default(), |_req: GraphQlRequest| {
            async move {
                Ok(GraphQlResponse {
                    data: None,
                    errors: vec![GraphQlErrorEntry {
                        message: "nope".into(),
                        extension_code: Some("FORBIDDEN".into()),
                    }],
                })
            }
            .boxed_local()
        });
        let err = client
            .execute(GraphQlRequest::new("query Q { x }"), true)
            .await
            .unwrap_err();
        match &*err {
            PulseError::GraphQl { code, .. } => assert_eq!(*code, GraphQlErrorCode::Authorization),
            other => panic!("expected GraphQl error, got {other:?}"),
        }
    }
}
