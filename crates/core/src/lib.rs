//! Core domain for the natural-language cloud operations assistant: the
//! capability catalog, the validated-intent and canonical-result types, the
//! error taxonomy, retry policy, and application configuration.

pub mod config;
pub mod errors;
pub mod intent;
pub mod registry;
pub mod result;
pub mod retry;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use errors::{ProviderError, ResolveError};
pub use intent::ResolvedIntent;
pub use registry::{
    CapabilityDescriptor, CapabilityRegistry, ParamKind, ParamSpec, Provider, ResultKind,
    Timeframe,
};
pub use result::{
    CanonicalResult, CostBreakdown, ErrorCode, ErrorInfo, MetricPoint, MetricSeries, ResourceKind,
    ResourceList, ResourceRecord, ServiceCost,
};
pub use retry::RetryPolicy;
