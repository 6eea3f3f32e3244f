//! Provider-agnostic result shapes. Downstream rendering consumes only these
//! variants and never sees provider-native payloads.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ProviderError, ResolveError};
use crate::registry::Provider;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CanonicalResult {
    CostBreakdown(CostBreakdown),
    ResourceList(ResourceList),
    MetricSeries(MetricSeries),
    Error(ErrorInfo),
}

impl CanonicalResult {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub provider: Provider,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub currency: String,
    pub services: Vec<ServiceCost>,
    pub total: f64,
}

impl CostBreakdown {
    pub fn new(
        provider: Provider,
        period_start: NaiveDate,
        period_end: NaiveDate,
        currency: impl Into<String>,
        services: Vec<ServiceCost>,
    ) -> Self {
        let total = services.iter().map(|entry| entry.amount).sum();
        Self { provider, period_start, period_end, currency: currency.into(), services, total }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceCost {
    pub service: String,
    pub amount: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceList {
    pub provider: Provider,
    pub resources: Vec<ResourceRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    pub name: String,
    pub kind: ResourceKind,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Instance,
    Bucket,
    VirtualMachine,
    StorageAccount,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub provider: Provider,
    pub resource_id: String,
    pub metric: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub points: Vec<MetricPoint>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Stable machine-readable error codes, mirrored one-to-one from the
/// resolve/provider error taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UnknownOperation,
    ValidationFailure,
    AmbiguousIntent,
    UnresolvedIntent,
    ProviderAuth,
    ProviderRateLimited,
    ProviderNotFound,
    ProviderTransient,
    Timeout,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    /// Candidate completions for ambiguous requests (parameter names the
    /// caller should supply). Empty for every other code.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), candidates: Vec::new() }
    }
}

impl From<ResolveError> for ErrorInfo {
    fn from(error: ResolveError) -> Self {
        let message = error.to_string();
        match error {
            ResolveError::UnknownOperation { .. } => Self::new(ErrorCode::UnknownOperation, message),
            ResolveError::ValidationFailure { .. } => {
                Self::new(ErrorCode::ValidationFailure, message)
            }
            ResolveError::AmbiguousIntent { candidates } => {
                Self { code: ErrorCode::AmbiguousIntent, message, candidates }
            }
            ResolveError::UnresolvedIntent { .. } => Self::new(ErrorCode::UnresolvedIntent, message),
        }
    }
}

impl From<ProviderError> for ErrorInfo {
    fn from(error: ProviderError) -> Self {
        // Fixed user-safe text; the provider detail is logged, never shown.
        match error {
            ProviderError::Auth(_) => Self::new(
                ErrorCode::ProviderAuth,
                "Cloud provider authentication failed. Check the configured credentials.",
            ),
            ProviderError::RateLimited(_) => Self::new(
                ErrorCode::ProviderRateLimited,
                "The cloud provider is rate limiting requests. Try again shortly.",
            ),
            ProviderError::NotFound(_) => {
                Self::new(ErrorCode::ProviderNotFound, "The requested resource was not found.")
            }
            ProviderError::Transient(_) => Self::new(
                ErrorCode::ProviderTransient,
                "The cloud provider reported a temporary failure. Try again shortly.",
            ),
            ProviderError::Timeout(_) => {
                Self::new(ErrorCode::Timeout, "The cloud provider did not respond in time.")
            }
        }
    }
}

impl From<ResolveError> for CanonicalResult {
    fn from(error: ResolveError) -> Self {
        Self::Error(error.into())
    }
}

impl From<ProviderError> for CanonicalResult {
    fn from(error: ProviderError) -> Self {
        Self::Error(error.into())
    }
}
