//! AWS execution backed by the official SDK clients: EC2 for compute, S3 for
//! storage, Cost Explorer for spend, CloudWatch for metrics. All SDK failures
//! are folded into the shared provider error taxonomy here.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_cloudwatch::types::{Dimension, Statistic};
use aws_sdk_costexplorer::types::{
    DateInterval, Granularity, GroupDefinition, GroupDefinitionType,
};
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::error::SdkError;
use aws_sdk_ec2::types::Filter;
use tracing::debug;

use cloudpilot_core::config::AwsConfig;
use cloudpilot_core::{
    CostBreakdown, MetricPoint, MetricSeries, Provider, ProviderError, ResourceKind, ResourceList,
    ResourceRecord, ServiceCost,
};

use crate::ops::{
    CostRequest, ListRequest, ListTarget, MetricsRequest, PowerAction, PowerRequest, ProviderOps,
};

pub struct AwsOps {
    sdk_config: SdkConfig,
    ec2: aws_sdk_ec2::Client,
    s3: aws_sdk_s3::Client,
    cost: aws_sdk_costexplorer::Client,
    cloudwatch: aws_sdk_cloudwatch::Client,
    region: String,
}

impl AwsOps {
    /// Builds the SDK clients from the ambient credential chain (env,
    /// profile, instance role) pinned to the configured region.
    pub async fn new(config: &AwsConfig) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        Self {
            ec2: aws_sdk_ec2::Client::new(&sdk_config),
            s3: aws_sdk_s3::Client::new(&sdk_config),
            cost: aws_sdk_costexplorer::Client::new(&sdk_config),
            cloudwatch: aws_sdk_cloudwatch::Client::new(&sdk_config),
            region: config.region.clone(),
            sdk_config,
        }
    }

    /// EC2 client for the request's region; reuses the default client when
    /// the region matches the configured one.
    fn ec2_for(&self, region: Option<&str>) -> aws_sdk_ec2::Client {
        match region {
            Some(region) if region != self.region => {
                let conf = aws_sdk_ec2::config::Builder::from(&self.sdk_config)
                    .region(Region::new(region.to_string()))
                    .build();
                aws_sdk_ec2::Client::from_conf(conf)
            }
            _ => self.ec2.clone(),
        }
    }

    async fn list_instances(&self, request: &ListRequest) -> Result<ResourceList, ProviderError> {
        let region = request.region.clone().unwrap_or_else(|| self.region.clone());
        let mut call = self.ec2_for(request.region.as_deref()).describe_instances();

        if let Some(state) = &request.state {
            call = call.filters(filter("instance-state-name", state));
        }
        if let Some(instance_type) = &request.instance_type {
            call = call.filters(filter("instance-type", instance_type));
        }
        if let Some(tag) = &request.tag {
            // "env=prod" filters on the pair, a bare "env" on key presence.
            call = call.filters(match tag.split_once('=') {
                Some((key, value)) => filter(&format!("tag:{}", key.trim()), value.trim()),
                None => filter("tag-key", tag.trim()),
            });
        }

        let response = call.send().await.map_err(classify)?;

        let mut resources = Vec::new();
        for reservation in response.reservations() {
            for instance in reservation.instances() {
                let id = instance.instance_id().unwrap_or_default().to_string();
                let tags: BTreeMap<String, String> = instance
                    .tags()
                    .iter()
                    .filter_map(|tag| Some((tag.key()?.to_string(), tag.value()?.to_string())))
                    .collect();
                let name = tags.get("Name").cloned().unwrap_or_else(|| id.clone());
                resources.push(ResourceRecord {
                    id,
                    name,
                    kind: ResourceKind::Instance,
                    region: region.clone(),
                    state: instance
                        .state()
                        .and_then(|state| state.name())
                        .map(|name| name.as_str().to_string()),
                    tags,
                });
            }
        }

        debug!(
            event_name = "aws.list_instances",
            count = resources.len(),
            region = %region,
            "listed ec2 instances"
        );
        Ok(ResourceList { provider: Provider::Aws, resources })
    }

    async fn list_buckets(&self) -> Result<ResourceList, ProviderError> {
        let response = self.s3.list_buckets().send().await.map_err(classify)?;

        let resources = response
            .buckets()
            .iter()
            .filter_map(|bucket| {
                let name = bucket.name()?.to_string();
                Some(ResourceRecord {
                    id: name.clone(),
                    name,
                    kind: ResourceKind::Bucket,
                    // Bucket names are account-global; per-bucket location
                    // would cost one extra call each.
                    region: "global".to_string(),
                    state: None,
                    tags: BTreeMap::new(),
                })
            })
            .collect();

        Ok(ResourceList { provider: Provider::Aws, resources })
    }
}

#[async_trait]
impl ProviderOps for AwsOps {
    async fn list_resources(&self, request: &ListRequest) -> Result<ResourceList, ProviderError> {
        match request.target {
            ListTarget::Instances => self.list_instances(request).await,
            ListTarget::Buckets => self.list_buckets().await,
            ListTarget::VirtualMachines | ListTarget::StorageAccounts => Err(
                ProviderError::NotFound("azure resource kinds are not served by aws".to_string()),
            ),
        }
    }

    async fn cost_breakdown(&self, request: &CostRequest) -> Result<CostBreakdown, ProviderError> {
        let interval = DateInterval::builder()
            .start(request.period_start.format("%Y-%m-%d").to_string())
            .end(request.period_end.format("%Y-%m-%d").to_string())
            .build()
            .map_err(|source| ProviderError::Transient(source.to_string()))?;
        let group_by = GroupDefinition::builder()
            .r#type(GroupDefinitionType::Dimension)
            .key("SERVICE")
            .build();

        let response = self
            .cost
            .get_cost_and_usage()
            .time_period(interval)
            .granularity(Granularity::Monthly)
            .metrics("UnblendedCost")
            .group_by(group_by)
            .send()
            .await
            .map_err(classify)?;

        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        let mut currency = String::from("USD");
        for period in response.results_by_time() {
            for group in period.groups() {
                let Some(service) = group.keys().first() else { continue };
                let Some(value) = group.metrics().and_then(|metrics| metrics.get("UnblendedCost"))
                else {
                    continue;
                };
                if let Some(unit) = value.unit() {
                    currency = unit.to_string();
                }
                let amount: f64 =
                    value.amount().and_then(|amount| amount.parse().ok()).unwrap_or(0.0);
                *totals.entry(service.clone()).or_default() += amount;
            }
        }

        let services =
            totals.into_iter().map(|(service, amount)| ServiceCost { service, amount }).collect();
        Ok(CostBreakdown::new(
            Provider::Aws,
            request.period_start,
            request.period_end,
            currency,
            services,
        ))
    }

    async fn metric_series(&self, request: &MetricsRequest) -> Result<MetricSeries, ProviderError> {
        let dimension = Dimension::builder()
            .name("InstanceId")
            .value(&request.resource_id)
            .build()
            .map_err(|source| ProviderError::Transient(source.to_string()))?;

        let response = self
            .cloudwatch
            .get_metric_statistics()
            .namespace("AWS/EC2")
            .metric_name(&request.metric)
            .dimensions(dimension)
            .start_time(aws_sdk_cloudwatch::primitives::DateTime::from_secs(
                request.start.timestamp(),
            ))
            .end_time(aws_sdk_cloudwatch::primitives::DateTime::from_secs(request.end.timestamp()))
            .period(300)
            .statistics(Statistic::Average)
            .send()
            .await
            .map_err(classify)?;

        let unit = response
            .datapoints()
            .first()
            .and_then(|point| point.unit())
            .map(|unit| unit.as_str().to_string());
        let mut points: Vec<MetricPoint> = response
            .datapoints()
            .iter()
            .filter_map(|point| {
                let timestamp =
                    chrono::DateTime::from_timestamp(point.timestamp()?.secs(), 0)?;
                Some(MetricPoint { timestamp, value: point.average()? })
            })
            .collect();
        // CloudWatch returns datapoints unordered.
        points.sort_by_key(|point| point.timestamp);

        Ok(MetricSeries {
            provider: Provider::Aws,
            resource_id: request.resource_id.clone(),
            metric: request.metric.clone(),
            unit,
            points,
        })
    }

    async fn set_power_state(
        &self,
        request: &PowerRequest,
    ) -> Result<ResourceRecord, ProviderError> {
        let state = match request.action {
            PowerAction::Start => {
                let response = self
                    .ec2
                    .start_instances()
                    .instance_ids(&request.resource_id)
                    .send()
                    .await
                    .map_err(classify)?;
                response
                    .starting_instances()
                    .first()
                    .and_then(|change| change.current_state())
                    .and_then(|state| state.name())
                    .map(|name| name.as_str().to_string())
            }
            PowerAction::Stop => {
                let response = self
                    .ec2
                    .stop_instances()
                    .instance_ids(&request.resource_id)
                    .send()
                    .await
                    .map_err(classify)?;
                response
                    .stopping_instances()
                    .first()
                    .and_then(|change| change.current_state())
                    .and_then(|state| state.name())
                    .map(|name| name.as_str().to_string())
            }
        };

        Ok(ResourceRecord {
            id: request.resource_id.clone(),
            name: request.resource_id.clone(),
            kind: ResourceKind::Instance,
            region: self.region.clone(),
            state,
            tags: BTreeMap::new(),
        })
    }
}

fn filter(name: &str, value: &str) -> Filter {
    Filter::builder().name(name).values(value).build()
}

/// Maps an SDK failure onto the shared taxonomy, keyed off the service error
/// code when one is present.
fn classify<E, R>(error: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    if matches!(error, SdkError::TimeoutError(_)) {
        return ProviderError::Timeout("request dispatch timed out".to_string());
    }
    if matches!(error, SdkError::DispatchFailure(_)) {
        return ProviderError::Transient("request could not be dispatched".to_string());
    }

    let detail = error
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());

    match error.code() {
        Some(
            "Throttling" | "ThrottlingException" | "RequestLimitExceeded"
            | "TooManyRequestsException" | "LimitExceededException",
        ) => ProviderError::RateLimited(detail),
        Some(
            "UnauthorizedOperation" | "AuthFailure" | "AccessDenied" | "AccessDeniedException"
            | "UnrecognizedClientException" | "InvalidClientTokenId" | "ExpiredToken",
        ) => ProviderError::Auth(detail),
        Some(code)
            if code.contains("NotFound")
                || code.starts_with("InvalidInstanceID")
                || code == "NoSuchBucket" =>
        {
            ProviderError::NotFound(detail)
        }
        _ => ProviderError::Transient(detail),
    }
}
