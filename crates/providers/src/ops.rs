//! Provider-neutral request shapes and the execution seam each cloud client
//! implements. The dispatch layer translates validated intents into these
//! requests; clients never see raw intents or model output.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use cloudpilot_core::{CostBreakdown, MetricSeries, ProviderError, ResourceList, ResourceRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListTarget {
    Instances,
    Buckets,
    VirtualMachines,
    StorageAccounts,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListRequest {
    pub target: ListTarget,
    pub region: Option<String>,
    pub state: Option<String>,
    pub instance_type: Option<String>,
    pub tag: Option<String>,
    pub resource_group: Option<String>,
}

impl Default for ListTarget {
    fn default() -> Self {
        Self::Instances
    }
}

/// Closed date window for a cost query; end date exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CostRequest {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetricsRequest {
    pub resource_id: String,
    pub resource_group: Option<String>,
    pub metric: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerAction {
    Start,
    Stop,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PowerRequest {
    pub resource_id: String,
    pub resource_group: Option<String>,
    pub action: PowerAction,
}

/// One implementation per cloud. Implementations return provider-native
/// failures already normalized to [`ProviderError`]; retries and per-call
/// timeouts belong to the dispatcher, not here.
#[async_trait]
pub trait ProviderOps: Send + Sync {
    async fn list_resources(&self, request: &ListRequest) -> Result<ResourceList, ProviderError>;

    async fn cost_breakdown(&self, request: &CostRequest) -> Result<CostBreakdown, ProviderError>;

    async fn metric_series(&self, request: &MetricsRequest) -> Result<MetricSeries, ProviderError>;

    /// Starts or stops a single compute resource and reports its new state.
    async fn set_power_state(
        &self,
        request: &PowerRequest,
    ) -> Result<ResourceRecord, ProviderError>;
}
