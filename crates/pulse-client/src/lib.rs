//! The async data-fetching coordinator for Pulse.
//!
//! This crate builds the query/mutation/subscription hook layer on top of
//! [`pulse_reactive`]'s signal graph: an LRU cache with TTL, a deterministic cache-key scheme, an
//! in-flight request dedup map, a generic request/response interceptor pipeline, version-gated
//! async publication, and a graphql-ws client for subscriptions. See [`Client`] for the entry
//! point and [`hooks`] for the three public hooks.

#![warn(missing_docs)]

mod client;
mod dedup;
mod error;
pub mod hooks;
mod interceptor;
mod key;
mod lru;
mod runtime;
mod version;
pub mod ws;

pub use client::{Client, ClientOptions, GraphQlErrorEntry, GraphQlRequest, GraphQlResponse};
pub use error::{GraphQlErrorCode, PulseError};
pub use hooks::{
    use_mutation, use_query, use_subscription, Enabled, EventSource, MutationHandle,
    MutationOptions, MutationStatus, NeverFires, QueryHandle, QueryOptions, QueryStatus,
    SubscriptionHandle, SubscriptionOptions, SubscriptionStatus,
};
pub use interceptor::{InterceptorId, InterceptorPipeline};
pub use key::generate_cache_key;
pub use lru::LruCache;
pub use runtime::{provide_executor_scope, sleep, spawn_local_scoped};
pub use version::{VersionController, VersionToken};
pub use ws::{SubscriptionId, SubscriptionManager, WsConnection};
