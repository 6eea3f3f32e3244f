//! Cloud execution layer: the dispatcher that routes validated intents, and
//! one client per supported cloud.
//!
//! The dispatcher owns the execution policy (per-call timeout, bounded retry
//! with exponential backoff); the clients own translation between the
//! provider-neutral request shapes and each cloud's native API, including
//! normalizing native failures into the shared error taxonomy. Nothing above
//! this crate ever sees a provider-native payload.

pub mod aws;
pub mod azure;
pub mod dispatch;
pub mod ops;

pub use aws::AwsOps;
pub use azure::AzureOps;
pub use dispatch::Dispatcher;
pub use ops::{
    CostRequest, ListRequest, ListTarget, MetricsRequest, PowerAction, PowerRequest, ProviderOps,
};
