use thiserror::Error;

use crate::registry::Provider;

/// Resolution failures local to the intent pipeline. Everything here is safe
/// to show to the user verbatim; internal detail goes to tracing instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("operation `{operation}` is not supported on {provider}")]
    UnknownOperation { provider: Provider, operation: String },
    #[error("parameter `{field}` is invalid: {reason}")]
    ValidationFailure { field: String, reason: String },
    #[error("the request is ambiguous; please provide: {}", candidates.join(", "))]
    AmbiguousIntent { candidates: Vec<String> },
    #[error("the request could not be resolved: {reason}")]
    UnresolvedIntent { reason: String },
}

/// Failures surfaced by a cloud provider call, already normalized away from
/// the provider-native error shapes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider authentication failed: {0}")]
    Auth(String),
    #[error("provider rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("transient provider failure: {0}")]
    Transient(String),
    #[error("provider call timed out: {0}")]
    Timeout(String),
}

impl ProviderError {
    /// Rate limits and transient faults are worth another attempt; auth
    /// failures and timeouts are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transient(_))
    }
}
