//! The hook coordinator (§4.5): `use_query`, `use_mutation`, `use_subscription`. Each shares the
//! same reactive `{data, error, loading, status}` skeleton built directly on
//! [`pulse_reactive::Signal`]/[`pulse_reactive::create_effect`]/[`pulse_reactive::on_cleanup`], and
//! the same version-token discipline from [`crate::version`] gating every async completion.

mod events;
mod mutation;
mod query;
mod subscription;

pub use events::{EventSource, NeverFires};
pub use mutation::{use_mutation, MutationHandle, MutationOptions, MutationStatus};
pub use query::{use_query, Enabled, QueryHandle, QueryOptions, QueryStatus};
pub use subscription::{
    calculate_backoff_delay, use_subscription, SubscriptionHandle, SubscriptionOptions,
    SubscriptionStatus,
};
