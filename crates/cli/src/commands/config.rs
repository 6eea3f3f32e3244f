use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use cloudpilot_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: Option<&str>| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let client_secret = if config.azure.client_secret.is_some() { "<redacted>" } else { "<unset>" };

    let lines = vec![
        "effective config (source precedence: overrides > env > file > default):".to_string(),
        render_line("llm.model", &config.llm.model, source("llm.model", Some("CLOUDPILOT_LLM_MODEL"))),
        render_line(
            "llm.base_url",
            &config.llm.base_url,
            source("llm.base_url", Some("CLOUDPILOT_LLM_BASE_URL")),
        ),
        render_line("llm.api_key", api_key, source("llm.api_key", Some("CLOUDPILOT_LLM_API_KEY"))),
        render_line(
            "llm.confidence_threshold",
            &config.llm.confidence_threshold.to_string(),
            source("llm.confidence_threshold", Some("CLOUDPILOT_LLM_CONFIDENCE_THRESHOLD")),
        ),
        render_line(
            "aws.enabled",
            &config.aws.enabled.to_string(),
            source("aws.enabled", Some("CLOUDPILOT_AWS_ENABLED")),
        ),
        render_line(
            "aws.region",
            &config.aws.region,
            source("aws.region", Some("CLOUDPILOT_AWS_REGION")),
        ),
        render_line(
            "azure.enabled",
            &config.azure.enabled.to_string(),
            source("azure.enabled", Some("CLOUDPILOT_AZURE_ENABLED")),
        ),
        render_line(
            "azure.tenant_id",
            config.azure.tenant_id.as_deref().unwrap_or("<unset>"),
            source("azure.tenant_id", Some("CLOUDPILOT_AZURE_TENANT_ID")),
        ),
        render_line(
            "azure.client_secret",
            client_secret,
            source("azure.client_secret", Some("CLOUDPILOT_AZURE_CLIENT_SECRET")),
        ),
        render_line(
            "server.bind_address",
            &config.server.bind_address,
            source("server.bind_address", Some("CLOUDPILOT_SERVER_BIND_ADDRESS")),
        ),
        render_line(
            "server.port",
            &config.server.port.to_string(),
            source("server.port", Some("CLOUDPILOT_SERVER_PORT")),
        ),
        render_line(
            "session.idle_timeout_secs",
            &config.session.idle_timeout_secs.to_string(),
            source("session.idle_timeout_secs", Some("CLOUDPILOT_SESSION_IDLE_TIMEOUT_SECS")),
        ),
        render_line(
            "session.history_limit",
            &config.session.history_limit.to_string(),
            source("session.history_limit", Some("CLOUDPILOT_SESSION_HISTORY_LIMIT")),
        ),
        render_line(
            "dispatch.max_attempts",
            &config.dispatch.max_attempts.to_string(),
            source("dispatch.max_attempts", Some("CLOUDPILOT_DISPATCH_MAX_ATTEMPTS")),
        ),
        render_line(
            "dispatch.call_timeout_secs",
            &config.dispatch.call_timeout_secs.to_string(),
            source("dispatch.call_timeout_secs", Some("CLOUDPILOT_DISPATCH_CALL_TIMEOUT_SECS")),
        ),
        render_line(
            "logging.level",
            &config.logging.level,
            source("logging.level", Some("CLOUDPILOT_LOGGING_LEVEL")),
        ),
        render_line(
            "logging.format",
            &format!("{:?}", config.logging.format),
            source("logging.format", Some("CLOUDPILOT_LOGGING_FORMAT")),
        ),
    ];

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("cloudpilot.toml"), PathBuf::from("config/cloudpilot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::contains_path;

    #[test]
    fn contains_path_walks_nested_tables() {
        let doc: toml::Value = "[llm]\nmodel = \"gpt-4o\"\n".parse().expect("valid toml");
        assert!(contains_path(&doc, "llm.model"));
        assert!(!contains_path(&doc, "llm.api_key"));
        assert!(!contains_path(&doc, "aws.region"));
    }
}
