//! Routes validated intents to the enabled cloud clients and owns the
//! execution policy: per-call timeout, bounded retries with exponential
//! backoff, and normalization of every outcome into a canonical result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use cloudpilot_agent::Dispatch;
use cloudpilot_core::config::DispatchConfig;
use cloudpilot_core::{
    CanonicalResult, ErrorCode, ErrorInfo, Provider, ProviderError, ResolveError, ResolvedIntent,
    ResourceList, RetryPolicy, Timeframe,
};

use crate::ops::{
    CostRequest, ListRequest, ListTarget, MetricsRequest, PowerAction, PowerRequest, ProviderOps,
};

const DEFAULT_AWS_METRIC: &str = "CPUUtilization";
const DEFAULT_AZURE_METRIC: &str = "Percentage CPU";

pub struct Dispatcher {
    clients: HashMap<Provider, Arc<dyn ProviderOps>>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            clients: HashMap::new(),
            retry: RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.backoff_base_ms),
            ),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    pub fn with_client(mut self, provider: Provider, client: Arc<dyn ProviderOps>) -> Self {
        self.clients.insert(provider, client);
        self
    }

    pub fn enabled_providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.clients.keys().copied().collect();
        providers.sort();
        providers
    }

    async fn with_retry<T, F, Fut>(
        &self,
        intent: &ResolvedIntent,
        call: F,
    ) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
    {
        let mut attempt = 1u32;
        loop {
            let delay = self.retry.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(self.call_timeout, call()).await {
                // A hung call already consumed the full budget of patience;
                // retrying it would double the caller's wait for nothing.
                Err(_) => {
                    return Err(ProviderError::Timeout(format!(
                        "{} did not complete within {}s",
                        intent.operation,
                        self.call_timeout.as_secs()
                    )));
                }
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error))
                    if error.is_retryable() && !self.retry.is_final_attempt(attempt) =>
                {
                    warn!(
                        event_name = "dispatch.retry",
                        provider = %intent.provider,
                        operation = %intent.operation,
                        attempt,
                        error = %error,
                        "provider call failed, retrying"
                    );
                    attempt += 1;
                }
                Ok(Err(error)) => return Err(error),
            }
        }
    }
}

#[async_trait]
impl Dispatch for Dispatcher {
    async fn dispatch(&self, intent: &ResolvedIntent) -> CanonicalResult {
        let Some(client) = self.clients.get(&intent.provider) else {
            return CanonicalResult::Error(ErrorInfo::new(
                ErrorCode::ValidationFailure,
                format!("provider {} is not enabled in this deployment", intent.provider),
            ));
        };

        let request = match build_request_at(intent, Utc::now()) {
            Ok(request) => request,
            Err(error) => return error.into(),
        };

        let outcome = match request {
            ProviderRequest::List(request) => self
                .with_retry(intent, || client.list_resources(&request))
                .await
                .map(CanonicalResult::ResourceList),
            ProviderRequest::Cost(request) => self
                .with_retry(intent, || client.cost_breakdown(&request))
                .await
                .map(CanonicalResult::CostBreakdown),
            ProviderRequest::Metrics(request) => self
                .with_retry(intent, || client.metric_series(&request))
                .await
                .map(CanonicalResult::MetricSeries),
            ProviderRequest::Power(request) => self
                .with_retry(intent, || client.set_power_state(&request))
                .await
                .map(|record| {
                    CanonicalResult::ResourceList(ResourceList {
                        provider: intent.provider,
                        resources: vec![record],
                    })
                }),
        };

        outcome.unwrap_or_else(CanonicalResult::from)
    }
}

enum ProviderRequest {
    List(ListRequest),
    Cost(CostRequest),
    Metrics(MetricsRequest),
    Power(PowerRequest),
}

/// Lowers a validated intent into a provider request, applying the default
/// windows: costs cover the last 30 days, metrics the last 24 hours.
fn build_request_at(
    intent: &ResolvedIntent,
    now: DateTime<Utc>,
) -> Result<ProviderRequest, ResolveError> {
    let request = match (intent.provider, intent.operation.as_str()) {
        (Provider::Aws, "list-instances") => ProviderRequest::List(ListRequest {
            target: ListTarget::Instances,
            region: owned(intent.param("region")),
            state: owned(intent.param("state")),
            instance_type: owned(intent.param("instance_type")),
            tag: owned(intent.param("tag")),
            resource_group: None,
        }),
        (Provider::Aws, "list-buckets") => ProviderRequest::List(ListRequest {
            target: ListTarget::Buckets,
            region: owned(intent.param("region")),
            ..ListRequest::default()
        }),
        (Provider::Azure, "list-vms") => ProviderRequest::List(ListRequest {
            target: ListTarget::VirtualMachines,
            resource_group: owned(intent.param("resource_group")),
            ..ListRequest::default()
        }),
        (Provider::Azure, "list-storage-accounts") => ProviderRequest::List(ListRequest {
            target: ListTarget::StorageAccounts,
            resource_group: owned(intent.param("resource_group")),
            ..ListRequest::default()
        }),
        (_, "get-cost-breakdown") => {
            let today = now.date_naive();
            let days_back = intent.timeframe().unwrap_or(Timeframe::LastMonth).days_back();
            let period_end = parse_date(intent, "end_date")?.unwrap_or(today);
            let period_start = parse_date(intent, "start_date")?
                .unwrap_or_else(|| period_end - chrono::Duration::days(days_back));
            if period_start >= period_end {
                return Err(ResolveError::ValidationFailure {
                    field: "start_date".to_string(),
                    reason: "must be earlier than end_date".to_string(),
                });
            }
            ProviderRequest::Cost(CostRequest { period_start, period_end })
        }
        (provider, "get-instance-metrics" | "get-vm-metrics") => {
            let window = intent.timeframe().unwrap_or(Timeframe::LastDay);
            ProviderRequest::Metrics(MetricsRequest {
                resource_id: required(intent, "resource_id")?,
                resource_group: owned(intent.param("resource_group")),
                metric: intent
                    .param("metric")
                    .unwrap_or(match provider {
                        Provider::Aws => DEFAULT_AWS_METRIC,
                        Provider::Azure => DEFAULT_AZURE_METRIC,
                    })
                    .to_string(),
                start: now - chrono::Duration::days(window.days_back()),
                end: now,
            })
        }
        (_, "start-instance" | "start-vm") => ProviderRequest::Power(PowerRequest {
            resource_id: required(intent, "resource_id")?,
            resource_group: owned(intent.param("resource_group")),
            action: PowerAction::Start,
        }),
        (_, "stop-instance" | "stop-vm") => ProviderRequest::Power(PowerRequest {
            resource_id: required(intent, "resource_id")?,
            resource_group: owned(intent.param("resource_group")),
            action: PowerAction::Stop,
        }),
        (provider, operation) => {
            return Err(ResolveError::UnknownOperation {
                provider,
                operation: operation.to_string(),
            });
        }
    };

    Ok(request)
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

fn required(intent: &ResolvedIntent, name: &str) -> Result<String, ResolveError> {
    intent.param(name).map(str::to_string).ok_or_else(|| ResolveError::ValidationFailure {
        field: name.to_string(),
        reason: "required parameter is missing".to_string(),
    })
}

fn parse_date(
    intent: &ResolvedIntent,
    name: &str,
) -> Result<Option<chrono::NaiveDate>, ResolveError> {
    match intent.param(name) {
        None => Ok(None),
        Some(value) => chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ResolveError::ValidationFailure {
                field: name.to_string(),
                reason: "expected a date formatted as YYYY-MM-DD".to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};

    use cloudpilot_agent::Dispatch;
    use cloudpilot_core::config::DispatchConfig;
    use cloudpilot_core::{
        CanonicalResult, CostBreakdown, ErrorCode, MetricSeries, Provider, ProviderError,
        ResolvedIntent, ResourceKind, ResourceList, ResourceRecord,
    };

    use super::{build_request_at, Dispatcher, ProviderRequest};
    use crate::ops::{
        CostRequest, ListRequest, MetricsRequest, PowerAction, PowerRequest, ProviderOps,
    };

    struct ScriptedOps {
        list_replies: Mutex<VecDeque<Result<ResourceList, ProviderError>>>,
        power_replies: Mutex<VecDeque<Result<ResourceRecord, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedOps {
        fn new() -> Self {
            Self {
                list_replies: Mutex::new(VecDeque::new()),
                power_replies: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn with_list_replies(
            self,
            replies: Vec<Result<ResourceList, ProviderError>>,
        ) -> Arc<Self> {
            *self.list_replies.lock().expect("list lock") = replies.into();
            Arc::new(self)
        }

        fn with_power_replies(
            self,
            replies: Vec<Result<ResourceRecord, ProviderError>>,
        ) -> Arc<Self> {
            *self.power_replies.lock().expect("power lock") = replies.into();
            Arc::new(self)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderOps for ScriptedOps {
        async fn list_resources(
            &self,
            _request: &ListRequest,
        ) -> Result<ResourceList, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.list_replies
                .lock()
                .expect("list lock")
                .pop_front()
                .unwrap_or(Err(ProviderError::Transient("unscripted list call".to_string())))
        }

        async fn cost_breakdown(
            &self,
            _request: &CostRequest,
        ) -> Result<CostBreakdown, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Transient("unscripted cost call".to_string()))
        }

        async fn metric_series(
            &self,
            _request: &MetricsRequest,
        ) -> Result<MetricSeries, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Transient("unscripted metrics call".to_string()))
        }

        async fn set_power_state(
            &self,
            _request: &PowerRequest,
        ) -> Result<ResourceRecord, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.power_replies
                .lock()
                .expect("power lock")
                .pop_front()
                .unwrap_or(Err(ProviderError::Transient("unscripted power call".to_string())))
        }
    }

    /// Never completes; stands in for a hung provider endpoint.
    struct HangingOps {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderOps for HangingOps {
        async fn list_resources(
            &self,
            _request: &ListRequest,
        ) -> Result<ResourceList, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn cost_breakdown(
            &self,
            _request: &CostRequest,
        ) -> Result<CostBreakdown, ProviderError> {
            std::future::pending().await
        }

        async fn metric_series(
            &self,
            _request: &MetricsRequest,
        ) -> Result<MetricSeries, ProviderError> {
            std::future::pending().await
        }

        async fn set_power_state(
            &self,
            _request: &PowerRequest,
        ) -> Result<ResourceRecord, ProviderError> {
            std::future::pending().await
        }
    }

    fn config() -> DispatchConfig {
        DispatchConfig { max_attempts: 2, backoff_base_ms: 250, call_timeout_secs: 5 }
    }

    fn intent(provider: Provider, operation: &str, params: &[(&str, &str)]) -> ResolvedIntent {
        let parameters: BTreeMap<String, String> =
            params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ResolvedIntent {
            provider,
            operation: operation.to_string(),
            parameters,
            confidence: 0.9,
            raw_utterance: operation.to_string(),
        }
    }

    fn listing(resources: Vec<ResourceRecord>) -> ResourceList {
        ResourceList { provider: Provider::Aws, resources }
    }

    fn record(id: &str) -> ResourceRecord {
        ResourceRecord {
            id: id.to_string(),
            name: id.to_string(),
            kind: ResourceKind::Instance,
            region: "us-east-1".to_string(),
            state: Some("running".to_string()),
            tags: BTreeMap::new(),
        }
    }

    fn error_code(result: &CanonicalResult) -> Option<ErrorCode> {
        match result {
            CanonicalResult::Error(info) => Some(info.code),
            _ => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_twice_exhausts_the_attempt_budget() {
        let ops = ScriptedOps::new().with_list_replies(vec![
            Err(ProviderError::RateLimited("throttled".to_string())),
            Err(ProviderError::RateLimited("throttled again".to_string())),
        ]);
        let dispatcher = Dispatcher::new(&config()).with_client(Provider::Aws, ops.clone());

        let result = dispatcher.dispatch(&intent(Provider::Aws, "list-instances", &[])).await;

        assert_eq!(error_code(&result), Some(ErrorCode::ProviderRateLimited));
        assert_eq!(ops.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers_on_the_second_attempt() {
        let ops = ScriptedOps::new().with_list_replies(vec![
            Err(ProviderError::Transient("503".to_string())),
            Ok(listing(vec![record("i-123")])),
        ]);
        let dispatcher = Dispatcher::new(&config()).with_client(Provider::Aws, ops.clone());

        let result = dispatcher.dispatch(&intent(Provider::Aws, "list-instances", &[])).await;

        match result {
            CanonicalResult::ResourceList(list) => assert_eq!(list.resources[0].id, "i-123"),
            other => panic!("expected a listing, got {other:?}"),
        }
        assert_eq!(ops.calls(), 2);
    }

    #[tokio::test]
    async fn auth_failures_are_terminal_on_first_sight() {
        let ops = ScriptedOps::new()
            .with_list_replies(vec![Err(ProviderError::Auth("key rejected".to_string()))]);
        let dispatcher = Dispatcher::new(&config()).with_client(Provider::Aws, ops.clone());

        let result = dispatcher.dispatch(&intent(Provider::Aws, "list-instances", &[])).await;

        assert_eq!(error_code(&result), Some(ErrorCode::ProviderAuth));
        assert_eq!(ops.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_calls_are_cut_off_without_a_retry() {
        let ops = Arc::new(HangingOps { calls: AtomicUsize::new(0) });
        let dispatcher = Dispatcher::new(&config()).with_client(Provider::Aws, ops.clone());

        let result = dispatcher.dispatch(&intent(Provider::Aws, "list-instances", &[])).await;

        assert_eq!(error_code(&result), Some(ErrorCode::Timeout));
        assert_eq!(ops.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn power_operations_come_back_as_a_single_record_listing() {
        let mut stopped = record("i-123");
        stopped.state = Some("stopping".to_string());
        let ops = ScriptedOps::new().with_power_replies(vec![Ok(stopped)]);
        let dispatcher = Dispatcher::new(&config()).with_client(Provider::Aws, ops);

        let result = dispatcher
            .dispatch(&intent(Provider::Aws, "stop-instance", &[("resource_id", "i-123")]))
            .await;

        match result {
            CanonicalResult::ResourceList(list) => {
                assert_eq!(list.resources.len(), 1);
                assert_eq!(list.resources[0].state.as_deref(), Some("stopping"));
            }
            other => panic!("expected a listing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_providers_are_reported_not_called() {
        let dispatcher = Dispatcher::new(&config());

        let result = dispatcher.dispatch(&intent(Provider::Azure, "list-vms", &[])).await;

        assert_eq!(error_code(&result), Some(ErrorCode::ValidationFailure));
    }

    #[test]
    fn cost_requests_default_to_the_last_thirty_days() {
        let now = Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).single().expect("valid");
        let request =
            build_request_at(&intent(Provider::Aws, "get-cost-breakdown", &[]), now)
                .expect("buildable");

        match request {
            ProviderRequest::Cost(cost) => {
                assert_eq!(cost.period_end, now.date_naive());
                assert_eq!(cost.period_start, now.date_naive() - Duration::days(30));
            }
            _ => panic!("expected a cost request"),
        }
    }

    #[test]
    fn explicit_cost_dates_override_the_timeframe() {
        let now = Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).single().expect("valid");
        let request = build_request_at(
            &intent(Provider::Aws, "get-cost-breakdown", &[
                ("start_date", "2025-01-01"),
                ("end_date", "2025-02-01"),
                ("timeframe", "last-week"),
            ]),
            now,
        )
        .expect("buildable");

        match request {
            ProviderRequest::Cost(CostRequest { period_start, period_end }) => {
                assert_eq!(period_start.to_string(), "2025-01-01");
                assert_eq!(period_end.to_string(), "2025-02-01");
            }
            _ => panic!("expected a cost request"),
        }
    }

    #[test]
    fn inverted_cost_windows_are_rejected() {
        let now = Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).single().expect("valid");
        let error = build_request_at(
            &intent(Provider::Aws, "get-cost-breakdown", &[
                ("start_date", "2025-03-01"),
                ("end_date", "2025-02-01"),
            ]),
            now,
        )
        .expect_err("start after end");
        assert!(error.to_string().contains("earlier than"));
    }

    #[test]
    fn metric_requests_default_to_cpu_over_the_last_day() {
        let now = Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).single().expect("valid");
        let request = build_request_at(
            &intent(Provider::Aws, "get-instance-metrics", &[("resource_id", "i-123")]),
            now,
        )
        .expect("buildable");

        match request {
            ProviderRequest::Metrics(metrics) => {
                assert_eq!(metrics.metric, "CPUUtilization");
                assert_eq!(metrics.end - metrics.start, Duration::days(1));
            }
            _ => panic!("expected a metrics request"),
        }
    }

    #[test]
    fn azure_metric_requests_default_to_percentage_cpu() {
        let now = Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).single().expect("valid");
        let request = build_request_at(
            &intent(Provider::Azure, "get-vm-metrics", &[
                ("resource_group", "prod"),
                ("resource_id", "web-01"),
            ]),
            now,
        )
        .expect("buildable");

        match request {
            ProviderRequest::Metrics(metrics) => {
                assert_eq!(metrics.metric, "Percentage CPU");
                assert_eq!(metrics.resource_group.as_deref(), Some("prod"));
            }
            _ => panic!("expected a metrics request"),
        }
    }

    #[test]
    fn start_operations_map_to_the_start_action() {
        let now = Utc::now();
        let request = build_request_at(
            &intent(Provider::Azure, "start-vm", &[
                ("resource_group", "prod"),
                ("resource_id", "web-01"),
            ]),
            now,
        )
        .expect("buildable");

        match request {
            ProviderRequest::Power(power) => assert_eq!(power.action, PowerAction::Start),
            _ => panic!("expected a power request"),
        }
    }
}
