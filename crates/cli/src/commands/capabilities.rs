use serde::Serialize;

use cloudpilot_core::{CapabilityRegistry, ParamKind, Provider, ResultKind};

#[derive(Debug, Serialize)]
struct CapabilityView {
    provider: Provider,
    operation: &'static str,
    summary: &'static str,
    required: Vec<ParamView>,
    optional: Vec<ParamView>,
    result_kind: ResultKind,
}

#[derive(Debug, Serialize)]
struct ParamView {
    name: &'static str,
    kind: ParamKind,
}

pub fn run(json: bool) -> String {
    let registry = CapabilityRegistry::builtin();

    if json {
        let views: Vec<CapabilityView> = Provider::ALL
            .into_iter()
            .flat_map(|provider| registry.operations(provider))
            .map(|descriptor| CapabilityView {
                provider: descriptor.provider,
                operation: descriptor.operation,
                summary: descriptor.summary,
                required: descriptor
                    .required
                    .iter()
                    .map(|spec| ParamView { name: spec.name, kind: spec.kind })
                    .collect(),
                optional: descriptor
                    .optional
                    .iter()
                    .map(|spec| ParamView { name: spec.name, kind: spec.kind })
                    .collect(),
                result_kind: descriptor.result_kind,
            })
            .collect();
        return serde_json::to_string_pretty(&views)
            .unwrap_or_else(|error| format!("{{\"error\": \"serialization failed: {error}\"}}"));
    }

    let mut lines = Vec::new();
    for provider in Provider::ALL {
        lines.push(format!("{provider}:"));
        for descriptor in registry.operations(provider) {
            let mut line = format!("  {} - {}", descriptor.operation, descriptor.summary);
            if !descriptor.required.is_empty() {
                let required: Vec<&str> =
                    descriptor.required.iter().map(|spec| spec.name).collect();
                line.push_str(&format!(" (requires {})", required.join(", ")));
            }
            lines.push(line);
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::run;

    #[test]
    fn json_output_covers_the_full_catalog() {
        let parsed: serde_json::Value =
            serde_json::from_str(&run(true)).expect("valid json");
        let entries = parsed.as_array().expect("array");
        assert_eq!(entries.len(), 12);
        assert!(entries.iter().any(|entry| entry["operation"] == "get-cost-breakdown"
            && entry["provider"] == "azure"));
    }

    #[test]
    fn text_output_groups_operations_by_provider() {
        let text = run(false);
        assert!(text.contains("aws:"));
        assert!(text.contains("azure:"));
        assert!(text.contains("stop-instance - Stop a running EC2 instance (requires resource_id)"));
    }
}
