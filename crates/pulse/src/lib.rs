//! Pulse: a fine-grained reactive runtime and async data-fetching coordinator.
//!
//! This crate is a facade over two independent building blocks:
//!
//! * [`reactive`] — signals, computeds, effects and scopes (from `pulse-reactive`).
//! * [`client`] — the query/mutation/subscription hook layer, its cache and its graphql-ws
//!   client (from `pulse-client`).
//!
//! Most code only needs [`prelude`]:
//!
//! ```
//! use pulse::prelude::*;
//! ```

#![warn(missing_docs)]

/// Signals, computeds, effects and reactive scopes.
pub mod reactive {
    pub use pulse_reactive::*;
}

/// The async data-fetching coordinator: client, cache, interceptors and hooks.
pub mod client {
    pub use pulse_client::*;
}

/// Glob-importable surface for application code: the reactive primitives plus the three hooks.
pub mod prelude {
    pub use crate::client::{
        use_mutation, use_query, use_subscription, Client, ClientOptions, Enabled, EventSource,
        MutationHandle, MutationOptions, MutationStatus, PulseError, QueryHandle, QueryOptions,
        QueryStatus, SubscriptionHandle, SubscriptionOptions, SubscriptionStatus,
    };
    pub use crate::reactive::*;
}
