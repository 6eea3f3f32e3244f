//! Azure execution over the ARM REST surface with client-credential auth.
//! Every management-plane payload here is JSON, so a plain HTTP client plus
//! serde covers compute, storage, cost management, and monitor metrics.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use cloudpilot_core::config::AzureConfig;
use cloudpilot_core::{
    CostBreakdown, MetricPoint, MetricSeries, Provider, ProviderError, ResourceKind, ResourceList,
    ResourceRecord, ServiceCost,
};

use crate::ops::{
    CostRequest, ListRequest, ListTarget, MetricsRequest, PowerAction, PowerRequest, ProviderOps,
};

const MANAGEMENT_BASE: &str = "https://management.azure.com";
const COMPUTE_API_VERSION: &str = "2023-09-01";
const STORAGE_API_VERSION: &str = "2023-01-01";
const COST_API_VERSION: &str = "2023-03-01";
const METRICS_API_VERSION: &str = "2018-01-01";

/// Tokens are refreshed this long before their reported expiry.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

pub struct AzureOps {
    http: reqwest::Client,
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
    subscription_id: String,
    token: tokio::sync::Mutex<Option<CachedToken>>,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AzureOps {
    pub fn new(config: &AzureConfig) -> Result<Self, ProviderError> {
        let missing = |field: &str| {
            ProviderError::Auth(format!("azure.{field} is not configured"))
        };

        Ok(Self {
            http: reqwest::Client::new(),
            tenant_id: config.tenant_id.clone().ok_or_else(|| missing("tenant_id"))?,
            client_id: config.client_id.clone().ok_or_else(|| missing("client_id"))?,
            client_secret: config.client_secret.clone().ok_or_else(|| missing("client_secret"))?,
            subscription_id: config
                .subscription_id
                .clone()
                .ok_or_else(|| missing("subscription_id"))?,
            token: tokio::sync::Mutex::new(None),
        })
    }

    async fn bearer(&self) -> Result<String, ProviderError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at - Utc::now() > Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) {
                return Ok(cached.token.clone());
            }
        }

        let response = self
            .http
            .post(format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                self.tenant_id
            ))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("scope", "https://management.azure.com/.default"),
            ])
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(ProviderError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|source| ProviderError::Transient(format!("malformed token reply: {source}")))?;
        let expires_at = Utc::now() + Duration::seconds(token.expires_in);
        debug!(event_name = "azure.token.refreshed", "acquired management token");
        *guard = Some(CachedToken { token: token.access_token.clone(), expires_at });
        Ok(token.access_token)
    }

    async fn get<T: DeserializeOwned>(&self, url: String) -> Result<T, ProviderError> {
        let token = self.bearer().await?;
        let response =
            self.http.get(url).bearer_auth(token).send().await.map_err(transport)?;
        read_json(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: String,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let token = self.bearer().await?;
        let response =
            self.http.post(url).bearer_auth(token).json(body).send().await.map_err(transport)?;
        read_json(response).await
    }

    /// Fire-and-forget management command; ARM answers 200 or 202 with no
    /// useful body.
    async fn post_command(&self, url: String) -> Result<(), ProviderError> {
        let token = self.bearer().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &body))
    }

    fn subscription_path(&self) -> String {
        format!("{MANAGEMENT_BASE}/subscriptions/{}", self.subscription_id)
    }

    fn vm_path(&self, resource_group: &str, name: &str) -> String {
        format!(
            "{}/resourceGroups/{resource_group}/providers/Microsoft.Compute/virtualMachines/{name}",
            self.subscription_path()
        )
    }

    async fn list_arm_resources(
        &self,
        provider_path: &str,
        api_version: &str,
        kind: ResourceKind,
        resource_group: Option<&str>,
    ) -> Result<ResourceList, ProviderError> {
        let scope = match resource_group {
            Some(group) => format!("{}/resourceGroups/{group}", self.subscription_path()),
            None => self.subscription_path(),
        };
        let url = format!("{scope}/providers/{provider_path}?api-version={api_version}");

        let listing: ArmList<ArmResource> = self.get(url).await?;
        let resources =
            listing.value.into_iter().map(|resource| resource.into_record(kind)).collect();
        Ok(ResourceList { provider: Provider::Azure, resources })
    }

    fn required_group<'a>(
        &self,
        request_group: Option<&'a str>,
        resource_id: &str,
    ) -> Result<&'a str, ProviderError> {
        request_group.ok_or_else(|| {
            ProviderError::NotFound(format!("no resource group specified for {resource_id}"))
        })
    }
}

#[async_trait]
impl ProviderOps for AzureOps {
    async fn list_resources(&self, request: &ListRequest) -> Result<ResourceList, ProviderError> {
        match request.target {
            ListTarget::VirtualMachines => {
                self.list_arm_resources(
                    "Microsoft.Compute/virtualMachines",
                    COMPUTE_API_VERSION,
                    ResourceKind::VirtualMachine,
                    request.resource_group.as_deref(),
                )
                .await
            }
            ListTarget::StorageAccounts => {
                self.list_arm_resources(
                    "Microsoft.Storage/storageAccounts",
                    STORAGE_API_VERSION,
                    ResourceKind::StorageAccount,
                    request.resource_group.as_deref(),
                )
                .await
            }
            ListTarget::Instances | ListTarget::Buckets => Err(ProviderError::NotFound(
                "aws resource kinds are not served by azure".to_string(),
            )),
        }
    }

    async fn cost_breakdown(&self, request: &CostRequest) -> Result<CostBreakdown, ProviderError> {
        let url = format!(
            "{}/providers/Microsoft.CostManagement/query?api-version={COST_API_VERSION}",
            self.subscription_path()
        );
        let body = serde_json::json!({
            "type": "ActualCost",
            "timeframe": "Custom",
            "timePeriod": {
                "from": format!("{}T00:00:00+00:00", request.period_start),
                "to": format!("{}T00:00:00+00:00", request.period_end),
            },
            "dataset": {
                "granularity": "None",
                "aggregation": { "totalCost": { "name": "Cost", "function": "Sum" } },
                "grouping": [ { "type": "Dimension", "name": "ServiceName" } ],
            },
        });

        let response: CostQueryResponse = self.post(url, &body).await?;
        let (services, currency) = parse_cost_rows(&response.properties)?;
        Ok(CostBreakdown::new(
            Provider::Azure,
            request.period_start,
            request.period_end,
            currency,
            services,
        ))
    }

    async fn metric_series(&self, request: &MetricsRequest) -> Result<MetricSeries, ProviderError> {
        let group = self.required_group(request.resource_group.as_deref(), &request.resource_id)?;
        let url = format!(
            "{}/providers/microsoft.insights/metrics?api-version={METRICS_API_VERSION}\
             &metricnames={}&timespan={}/{}&interval=PT5M&aggregation=Average",
            self.vm_path(group, &request.resource_id),
            request.metric.replace(' ', "%20"),
            request.start.to_rfc3339(),
            request.end.to_rfc3339(),
        );

        let response: MetricsResponse = self.get(url).await?;
        Ok(metric_series_from(response, request))
    }

    async fn set_power_state(
        &self,
        request: &PowerRequest,
    ) -> Result<ResourceRecord, ProviderError> {
        let group = self.required_group(request.resource_group.as_deref(), &request.resource_id)?;
        let (command, state) = match request.action {
            PowerAction::Start => ("start", "starting"),
            // ARM's "stop" keeps the VM billed; deallocate releases compute.
            PowerAction::Stop => ("deallocate", "deallocating"),
        };
        let url = format!(
            "{}/{command}?api-version={COMPUTE_API_VERSION}",
            self.vm_path(group, &request.resource_id)
        );

        self.post_command(url).await?;

        let mut tags = BTreeMap::new();
        tags.insert("resource_group".to_string(), group.to_string());
        Ok(ResourceRecord {
            id: request.resource_id.clone(),
            name: request.resource_id.clone(),
            kind: ResourceKind::VirtualMachine,
            region: "unknown".to_string(),
            state: Some(state.to_string()),
            tags,
        })
    }
}

fn transport(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(error.to_string())
    } else {
        ProviderError::Transient(error.to_string())
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status.as_u16(), &body));
    }
    response
        .json::<T>()
        .await
        .map_err(|source| ProviderError::Transient(format!("malformed response: {source}")))
}

fn classify_status(status: u16, body: &str) -> ProviderError {
    let detail = format!("status {status}: {}", body.chars().take(200).collect::<String>());
    match status {
        401 | 403 => ProviderError::Auth(detail),
        404 => ProviderError::NotFound(detail),
        429 => ProviderError::RateLimited(detail),
        _ => ProviderError::Transient(detail),
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct ArmList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArmResource {
    id: String,
    name: String,
    location: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

impl ArmResource {
    fn into_record(self, kind: ResourceKind) -> ResourceRecord {
        let mut tags = self.tags;
        // The resource group only appears inside the ARM id path; surface it
        // so follow-up operations can reuse it.
        if let Some(group) = resource_group_of(&self.id) {
            tags.entry("resource_group".to_string()).or_insert_with(|| group.to_string());
        }
        ResourceRecord {
            id: self.name.clone(),
            name: self.name,
            kind,
            region: self.location,
            state: None,
            tags,
        }
    }
}

fn resource_group_of(arm_id: &str) -> Option<&str> {
    let mut segments = arm_id.split('/');
    while let Some(segment) = segments.next() {
        if segment.eq_ignore_ascii_case("resourceGroups") {
            return segments.next();
        }
    }
    None
}

#[derive(Deserialize)]
struct CostQueryResponse {
    properties: CostProperties,
}

#[derive(Deserialize)]
struct CostProperties {
    #[serde(default = "Vec::new")]
    columns: Vec<CostColumn>,
    #[serde(default = "Vec::new")]
    rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
struct CostColumn {
    name: String,
}

fn parse_cost_rows(
    properties: &CostProperties,
) -> Result<(Vec<ServiceCost>, String), ProviderError> {
    let column = |name: &str| {
        properties.columns.iter().position(|column| column.name.eq_ignore_ascii_case(name))
    };
    let cost_index = column("Cost").ok_or_else(|| {
        ProviderError::Transient("cost query reply had no Cost column".to_string())
    })?;
    let service_index = column("ServiceName").ok_or_else(|| {
        ProviderError::Transient("cost query reply had no ServiceName column".to_string())
    })?;
    let currency_index = column("Currency");

    let mut currency = String::from("USD");
    let mut services = Vec::new();
    for row in &properties.rows {
        let Some(service) = row.get(service_index).and_then(|value| value.as_str()) else {
            continue;
        };
        let amount = row.get(cost_index).and_then(|value| value.as_f64()).unwrap_or(0.0);
        if let Some(unit) =
            currency_index.and_then(|index| row.get(index)).and_then(|value| value.as_str())
        {
            currency = unit.to_string();
        }
        services.push(ServiceCost { service: service.to_string(), amount });
    }

    Ok((services, currency))
}

#[derive(Deserialize)]
struct MetricsResponse {
    #[serde(default = "Vec::new")]
    value: Vec<MetricEntry>,
}

#[derive(Deserialize)]
struct MetricEntry {
    unit: Option<String>,
    #[serde(default = "Vec::new")]
    timeseries: Vec<MetricTimeseries>,
}

#[derive(Deserialize)]
struct MetricTimeseries {
    #[serde(default = "Vec::new")]
    data: Vec<MetricDatum>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricDatum {
    time_stamp: DateTime<Utc>,
    average: Option<f64>,
}

fn metric_series_from(response: MetricsResponse, request: &MetricsRequest) -> MetricSeries {
    let entry = response.value.into_iter().next();
    let unit = entry.as_ref().and_then(|entry| entry.unit.clone());
    let points = entry
        .map(|entry| {
            entry
                .timeseries
                .into_iter()
                .flat_map(|series| series.data)
                .filter_map(|datum| {
                    Some(MetricPoint { timestamp: datum.time_stamp, value: datum.average? })
                })
                .collect()
        })
        .unwrap_or_default();

    MetricSeries {
        provider: Provider::Azure,
        resource_id: request.resource_id.clone(),
        metric: request.metric.clone(),
        unit,
        points,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use cloudpilot_core::ProviderError;

    use super::{
        classify_status, metric_series_from, parse_cost_rows, resource_group_of, ArmResource,
        CostProperties, MetricsResponse,
    };
    use crate::ops::MetricsRequest;
    use cloudpilot_core::ResourceKind;

    #[test]
    fn http_statuses_map_onto_the_error_taxonomy() {
        assert!(matches!(classify_status(401, ""), ProviderError::Auth(_)));
        assert!(matches!(classify_status(403, ""), ProviderError::Auth(_)));
        assert!(matches!(classify_status(404, ""), ProviderError::NotFound(_)));
        assert!(matches!(classify_status(429, ""), ProviderError::RateLimited(_)));
        assert!(matches!(classify_status(503, ""), ProviderError::Transient(_)));
    }

    #[test]
    fn cost_rows_parse_by_column_name_not_position() {
        let properties: CostProperties = serde_json::from_value(serde_json::json!({
            "columns": [
                { "name": "ServiceName", "type": "String" },
                { "name": "Cost", "type": "Number" },
                { "name": "Currency", "type": "String" },
            ],
            "rows": [
                ["Virtual Machines", 412.77, "EUR"],
                ["Storage", 88.2, "EUR"],
            ],
        }))
        .expect("deserializable");

        let (services, currency) = parse_cost_rows(&properties).expect("parsable");
        assert_eq!(currency, "EUR");
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].service, "Virtual Machines");
        assert!((services[0].amount - 412.77).abs() < f64::EPSILON);
    }

    #[test]
    fn cost_reply_without_a_cost_column_is_a_transient_failure() {
        let properties: CostProperties = serde_json::from_value(serde_json::json!({
            "columns": [{ "name": "ServiceName" }],
            "rows": [],
        }))
        .expect("deserializable");
        assert!(matches!(parse_cost_rows(&properties), Err(ProviderError::Transient(_))));
    }

    #[test]
    fn monitor_payloads_flatten_into_metric_points() {
        let response: MetricsResponse = serde_json::from_value(serde_json::json!({
            "value": [{
                "unit": "Percent",
                "timeseries": [{
                    "data": [
                        { "timeStamp": "2025-06-30T10:00:00Z", "average": 41.5 },
                        { "timeStamp": "2025-06-30T10:05:00Z" },
                        { "timeStamp": "2025-06-30T10:10:00Z", "average": 39.1 },
                    ],
                }],
            }],
        }))
        .expect("deserializable");

        let request = MetricsRequest {
            resource_id: "web-01".to_string(),
            resource_group: Some("prod".to_string()),
            metric: "Percentage CPU".to_string(),
            start: Utc.with_ymd_and_hms(2025, 6, 30, 10, 0, 0).single().expect("valid"),
            end: Utc.with_ymd_and_hms(2025, 6, 30, 11, 0, 0).single().expect("valid"),
        };
        let series = metric_series_from(response, &request);

        assert_eq!(series.unit.as_deref(), Some("Percent"));
        // The gap datapoint without an average is dropped, not zeroed.
        assert_eq!(series.points.len(), 2);
        assert!((series.points[1].value - 39.1).abs() < f64::EPSILON);
    }

    #[test]
    fn arm_records_surface_their_resource_group_as_a_tag() {
        let resource: ArmResource = serde_json::from_value(serde_json::json!({
            "id": "/subscriptions/sub-1/resourceGroups/prod/providers/Microsoft.Compute/virtualMachines/web-01",
            "name": "web-01",
            "location": "westeurope",
            "tags": { "team": "platform" },
        }))
        .expect("deserializable");

        let record = resource.into_record(ResourceKind::VirtualMachine);
        assert_eq!(record.id, "web-01");
        assert_eq!(record.region, "westeurope");
        assert_eq!(record.tags.get("resource_group").map(String::as_str), Some("prod"));
        assert_eq!(record.tags.get("team").map(String::as_str), Some("platform"));
    }

    #[test]
    fn resource_group_extraction_tolerates_casing() {
        assert_eq!(
            resource_group_of("/subscriptions/s/resourcegroups/Prod/providers/x"),
            Some("Prod")
        );
        assert_eq!(resource_group_of("/subscriptions/s/providers/x"), None);
    }
}
