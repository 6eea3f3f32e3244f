//! Static catalog of the cloud operations the resolver is allowed to emit.
//!
//! The registry is the single source of truth the intent resolver validates
//! against: an operation the model invents that is absent here can never reach
//! the dispatch layer. It is built once at process start and read-only after.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::ResolveError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Azure,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Aws, Provider::Azure];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
        }
    }

    /// Lenient parse for model output ("AWS", "amazon", "microsoft azure").
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "aws" | "amazon" | "amazon web services" => Some(Self::Aws),
            "azure" | "microsoft" | "microsoft azure" => Some(Self::Azure),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| format!("unsupported provider `{value}`"))
    }
}

/// Relative time window vocabulary shared by cost and metric operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Timeframe {
    LastDay,
    LastWeek,
    LastMonth,
}

impl Timeframe {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "last-day" | "last_day" | "lastday" | "yesterday" | "24h" => Some(Self::LastDay),
            "last-week" | "last_week" | "lastweek" | "7d" => Some(Self::LastWeek),
            "last-month" | "last_month" | "lastmonth" | "30d" => Some(Self::LastMonth),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastDay => "last-day",
            Self::LastWeek => "last-week",
            Self::LastMonth => "last-month",
        }
    }

    pub fn days_back(&self) -> i64 {
        match self {
            Self::LastDay => 1,
            Self::LastWeek => 7,
            Self::LastMonth => 30,
        }
    }
}

const INSTANCE_STATES: [&str; 4] = ["running", "stopped", "pending", "terminated"];

/// Parameter value classes with their validation rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Text,
    Date,
    Timeframe,
    MetricName,
    ResourceId,
    InstanceState,
    Region,
}

impl ParamKind {
    pub fn validate(&self, field: &str, value: &str) -> Result<(), ResolveError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(invalid(field, "value must not be empty"));
        }

        match self {
            Self::Text | Self::MetricName => Ok(()),
            Self::Date => match NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                Ok(_) => Ok(()),
                Err(_) => Err(invalid(field, "expected a date formatted as YYYY-MM-DD")),
            },
            Self::Timeframe => match Timeframe::parse(trimmed) {
                Some(_) => Ok(()),
                None => Err(invalid(field, "expected one of last-day, last-week, last-month")),
            },
            Self::ResourceId => {
                if trimmed.contains(char::is_whitespace) {
                    Err(invalid(field, "resource identifiers must not contain whitespace"))
                } else {
                    Ok(())
                }
            }
            Self::InstanceState => {
                if INSTANCE_STATES.contains(&trimmed.to_ascii_lowercase().as_str()) {
                    Ok(())
                } else {
                    Err(invalid(field, "expected one of running, stopped, pending, terminated"))
                }
            }
            Self::Region => {
                if trimmed.contains(char::is_whitespace) {
                    Err(invalid(field, "region names must not contain whitespace"))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Short schema hint embedded in the resolution prompt.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Text => "free text",
            Self::Date => "date formatted YYYY-MM-DD",
            Self::Timeframe => "one of last-day|last-week|last-month",
            Self::MetricName => "metric name, e.g. CPUUtilization",
            Self::ResourceId => "resource identifier, e.g. i-0abc123",
            Self::InstanceState => "one of running|stopped|pending|terminated",
            Self::Region => "region name, e.g. eu-west-2",
        }
    }
}

fn invalid(field: &str, reason: &str) -> ResolveError {
    ResolveError::ValidationFailure { field: field.to_string(), reason: reason.to_string() }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
}

impl ParamSpec {
    const fn new(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind }
    }
}

/// The canonical shape a successful dispatch of this operation produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    CostBreakdown,
    ResourceList,
    MetricSeries,
}

#[derive(Clone, Debug)]
pub struct CapabilityDescriptor {
    pub provider: Provider,
    pub operation: &'static str,
    pub summary: &'static str,
    pub required: Vec<ParamSpec>,
    pub optional: Vec<ParamSpec>,
    pub result_kind: ResultKind,
}

impl CapabilityDescriptor {
    pub fn required_param_names(&self) -> Vec<&'static str> {
        self.required.iter().map(|spec| spec.name).collect()
    }

    pub fn param_spec(&self, name: &str) -> Option<&ParamSpec> {
        self.required.iter().chain(self.optional.iter()).find(|spec| spec.name == name)
    }
}

pub struct CapabilityRegistry {
    descriptors: Vec<CapabilityDescriptor>,
}

impl CapabilityRegistry {
    /// The full built-in catalog. Loaded once at process start.
    pub fn builtin() -> Self {
        use ParamKind::*;
        use Provider::*;
        use ResultKind::*;

        let descriptors = vec![
            descriptor(Aws, "list-instances", "List EC2 instances", ResourceList, vec![], vec![
                ParamSpec::new("state", InstanceState),
                ParamSpec::new("instance_type", Text),
                ParamSpec::new("region", Region),
                ParamSpec::new("tag", Text),
            ]),
            descriptor(Aws, "list-buckets", "List S3 buckets", ResourceList, vec![], vec![
                ParamSpec::new("region", Region),
            ]),
            descriptor(
                Aws,
                "get-cost-breakdown",
                "Cost and usage grouped by service",
                CostBreakdown,
                vec![],
                vec![
                    ParamSpec::new("start_date", Date),
                    ParamSpec::new("end_date", Date),
                    ParamSpec::new("timeframe", Timeframe),
                ],
            ),
            descriptor(
                Aws,
                "get-instance-metrics",
                "CloudWatch metrics for one instance",
                MetricSeries,
                vec![ParamSpec::new("resource_id", ResourceId)],
                vec![
                    ParamSpec::new("metric", MetricName),
                    ParamSpec::new("timeframe", Timeframe),
                ],
            ),
            descriptor(Aws, "start-instance", "Start a stopped EC2 instance", ResourceList, vec![
                ParamSpec::new("resource_id", ResourceId),
            ], vec![]),
            descriptor(Aws, "stop-instance", "Stop a running EC2 instance", ResourceList, vec![
                ParamSpec::new("resource_id", ResourceId),
            ], vec![]),
            descriptor(Azure, "list-vms", "List virtual machines", ResourceList, vec![], vec![
                ParamSpec::new("resource_group", Text),
            ]),
            descriptor(
                Azure,
                "list-storage-accounts",
                "List storage accounts",
                ResourceList,
                vec![],
                vec![ParamSpec::new("resource_group", Text)],
            ),
            descriptor(
                Azure,
                "get-cost-breakdown",
                "Cost analysis grouped by service",
                CostBreakdown,
                vec![],
                vec![ParamSpec::new("timeframe", Timeframe)],
            ),
            descriptor(
                Azure,
                "get-vm-metrics",
                "Azure Monitor metrics for one VM",
                MetricSeries,
                vec![
                    ParamSpec::new("resource_group", Text),
                    ParamSpec::new("resource_id", ResourceId),
                ],
                vec![
                    ParamSpec::new("metric", MetricName),
                    ParamSpec::new("timeframe", Timeframe),
                ],
            ),
            descriptor(Azure, "start-vm", "Start a deallocated VM", ResourceList, vec![
                ParamSpec::new("resource_group", Text),
                ParamSpec::new("resource_id", ResourceId),
            ], vec![]),
            descriptor(Azure, "stop-vm", "Deallocate a running VM", ResourceList, vec![
                ParamSpec::new("resource_group", Text),
                ParamSpec::new("resource_id", ResourceId),
            ], vec![]),
        ];

        Self { descriptors }
    }

    pub fn lookup(
        &self,
        provider: Provider,
        operation: &str,
    ) -> Result<&CapabilityDescriptor, ResolveError> {
        self.descriptors
            .iter()
            .find(|descriptor| {
                descriptor.provider == provider && descriptor.operation == operation
            })
            .ok_or_else(|| ResolveError::UnknownOperation {
                provider,
                operation: operation.to_string(),
            })
    }

    pub fn operations(&self, provider: Provider) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.descriptors.iter().filter(move |descriptor| descriptor.provider == provider)
    }
}

fn descriptor(
    provider: Provider,
    operation: &'static str,
    summary: &'static str,
    result_kind: ResultKind,
    required: Vec<ParamSpec>,
    optional: Vec<ParamSpec>,
) -> CapabilityDescriptor {
    CapabilityDescriptor { provider, operation, summary, required, optional, result_kind }
}

#[cfg(test)]
mod tests {
    use super::{CapabilityRegistry, ParamKind, Provider, Timeframe};
    use crate::errors::ResolveError;

    #[test]
    fn lookup_finds_catalogued_operations() {
        let registry = CapabilityRegistry::builtin();
        let descriptor = registry.lookup(Provider::Aws, "stop-instance").expect("catalogued");
        assert_eq!(descriptor.required_param_names(), vec!["resource_id"]);
    }

    #[test]
    fn lookup_rejects_operations_absent_from_catalog() {
        let registry = CapabilityRegistry::builtin();
        let err = registry.lookup(Provider::Azure, "stop-instance").unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnknownOperation {
                provider: Provider::Azure,
                operation: "stop-instance".to_string(),
            }
        );
    }

    #[test]
    fn operations_are_scoped_per_provider() {
        let registry = CapabilityRegistry::builtin();
        let aws: Vec<_> = registry.operations(Provider::Aws).map(|d| d.operation).collect();
        let azure: Vec<_> = registry.operations(Provider::Azure).map(|d| d.operation).collect();

        assert!(aws.contains(&"list-instances"));
        assert!(aws.contains(&"get-cost-breakdown"));
        assert!(!aws.contains(&"list-vms"));
        assert!(azure.contains(&"list-vms"));
        assert!(!azure.contains(&"list-buckets"));
    }

    #[test]
    fn date_params_must_be_iso_formatted() {
        assert!(ParamKind::Date.validate("start_date", "2025-01-31").is_ok());
        let err = ParamKind::Date.validate("start_date", "31/01/2025").unwrap_err();
        assert!(matches!(err, ResolveError::ValidationFailure { ref field, .. } if field == "start_date"));
    }

    #[test]
    fn instance_state_params_are_closed_vocabulary() {
        assert!(ParamKind::InstanceState.validate("state", "running").is_ok());
        assert!(ParamKind::InstanceState.validate("state", "Running").is_ok());
        assert!(ParamKind::InstanceState.validate("state", "hibernating").is_err());
    }

    #[test]
    fn timeframe_parse_accepts_loose_spellings() {
        assert_eq!(Timeframe::parse("last-month"), Some(Timeframe::LastMonth));
        assert_eq!(Timeframe::parse("LAST_WEEK"), Some(Timeframe::LastWeek));
        assert_eq!(Timeframe::parse("fortnight"), None);
        assert_eq!(Timeframe::LastWeek.days_back(), 7);
    }

    #[test]
    fn provider_parse_accepts_vendor_aliases() {
        assert_eq!(Provider::parse("AWS"), Some(Provider::Aws));
        assert_eq!(Provider::parse("Microsoft Azure"), Some(Provider::Azure));
        assert_eq!(Provider::parse("gcp"), None);
    }
}
