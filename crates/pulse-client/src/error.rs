//! The error taxonomy shared by every async surface in this crate.

use std::fmt;

/// Sub-codes carried by [`PulseError::GraphQl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphQlErrorCode {
    /// The server rejected the request for lack of (valid) credentials.
    Authentication,
    /// The caller is authenticated but not allowed to perform the operation.
    Authorization,
    /// The request failed schema/argument validation.
    Validation,
    /// The response body could not be parsed as GraphQL.
    Parse,
    /// A subscription-specific failure (see the graphql-ws state machine).
    Subscription,
}

impl fmt::Display for GraphQlErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GraphQlErrorCode::Authentication => "AUTHENTICATION_ERROR",
            GraphQlErrorCode::Authorization => "AUTHORIZATION_ERROR",
            GraphQlErrorCode::Validation => "VALIDATION_ERROR",
            GraphQlErrorCode::Parse => "PARSE_ERROR",
            GraphQlErrorCode::Subscription => "SUBSCRIPTION_ERROR",
        };
        f.write_str(s)
    }
}

/// The normalized error type every hook (`use_query`, `use_mutation`, `use_subscription`) and
/// every interceptor secondary publishes to its `error` signal.
///
/// Any error surfaced by a fetcher, a GraphQL response, or the wire transport is normalized into
/// one of these variants before it reaches reactive state, so downstream code never has to match
/// on transport-specific error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PulseError {
    /// An operation was attempted on an effect or computed after it was disposed. Normally this
    /// is caught and logged rather than propagated (see `DISPOSED_ACCESS` in the spec).
    #[error("operation attempted on a disposed reactive node")]
    DisposedAccess,

    /// Non-2xx response, connection refused, or any other transport-layer failure that is not
    /// more specifically a timeout or an abort.
    #[error("http error ({status:?}): {message}")]
    Http {
        /// HTTP status code, if one was received.
        status: Option<u16>,
        /// Human-readable detail.
        message: String,
    },

    /// The underlying transport could not be reached at all (DNS failure, connection reset,
    /// socket closed unexpectedly).
    #[error("network error: {0}")]
    Network(String),

    /// The operation did not complete within its configured deadline.
    #[error("operation timed out")]
    Timeout,

    /// The operation was cancelled, either explicitly or because a newer version superseded it.
    #[error("operation aborted")]
    Abort,

    /// A GraphQL-level error, i.e. the transport succeeded but the response body carried one or
    /// more `errors` entries.
    #[error("graphql error [{code}]: {message}")]
    GraphQl {
        /// Which GraphQL sub-code this falls under.
        code: GraphQlErrorCode,
        /// Human-readable detail, usually the first error message in the response.
        message: String,
    },

    /// A required client option was missing or invalid (e.g. no URL configured).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PulseError {
    /// Wraps an arbitrary error message as a generic [`PulseError::GraphQl`] with code
    /// `GRAPHQL_ERROR`'s nearest sub-code, `Validation`, used as the catch-all when a GraphQL
    /// response doesn't specify anything more precise.
    pub fn graphql(message: impl Into<String>) -> Self {
        PulseError::GraphQl {
            code: GraphQlErrorCode::Validation,
            message: message.into(),
        }
    }

    /// Wraps an arbitrary non-domain error (anything implementing [`std::error::Error`]) as an
    /// `HTTP_ERROR`. Used at the boundary where a fetcher/transport returns its own error type.
    pub fn wrap_http(err: impl fmt::Display) -> Self {
        PulseError::Http {
            status: None,
            message: err.to_string(),
        }
    }
}
