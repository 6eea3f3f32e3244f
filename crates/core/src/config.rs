use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub aws: AwsConfig,
    pub azure: AzureConfig,
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub dispatch: DispatchConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub confidence_threshold: f64,
}

#[derive(Clone, Debug)]
pub struct AwsConfig {
    pub enabled: bool,
    pub region: String,
}

#[derive(Clone, Debug)]
pub struct AzureConfig {
    pub enabled: bool,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub subscription_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub history_limit: usize,
}

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub call_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub confidence_threshold: Option<f64>,
    pub aws_enabled: Option<bool>,
    pub azure_enabled: Option<bool>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4-turbo-preview".to_string(),
                timeout_secs: 30,
                confidence_threshold: 0.5,
            },
            aws: AwsConfig { enabled: true, region: "us-east-1".to_string() },
            azure: AzureConfig {
                enabled: false,
                tenant_id: None,
                client_id: None,
                client_secret: None,
                subscription_id: None,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            session: SessionConfig { idle_timeout_secs: 1800, history_limit: 10 },
            dispatch: DispatchConfig { max_attempts: 2, backoff_base_ms: 250, call_timeout_secs: 30 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cloudpilot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(confidence_threshold) = llm.confidence_threshold {
                self.llm.confidence_threshold = confidence_threshold;
            }
        }

        if let Some(aws) = patch.aws {
            if let Some(enabled) = aws.enabled {
                self.aws.enabled = enabled;
            }
            if let Some(region) = aws.region {
                self.aws.region = region;
            }
        }

        if let Some(azure) = patch.azure {
            if let Some(enabled) = azure.enabled {
                self.azure.enabled = enabled;
            }
            if let Some(tenant_id) = azure.tenant_id {
                self.azure.tenant_id = Some(tenant_id);
            }
            if let Some(client_id) = azure.client_id {
                self.azure.client_id = Some(client_id);
            }
            if let Some(azure_client_secret_value) = azure.client_secret {
                self.azure.client_secret = Some(secret_value(azure_client_secret_value));
            }
            if let Some(subscription_id) = azure.subscription_id {
                self.azure.subscription_id = Some(subscription_id);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(session) = patch.session {
            if let Some(idle_timeout_secs) = session.idle_timeout_secs {
                self.session.idle_timeout_secs = idle_timeout_secs;
            }
            if let Some(history_limit) = session.history_limit {
                self.session.history_limit = history_limit;
            }
        }

        if let Some(dispatch) = patch.dispatch {
            if let Some(max_attempts) = dispatch.max_attempts {
                self.dispatch.max_attempts = max_attempts;
            }
            if let Some(backoff_base_ms) = dispatch.backoff_base_ms {
                self.dispatch.backoff_base_ms = backoff_base_ms;
            }
            if let Some(call_timeout_secs) = dispatch.call_timeout_secs {
                self.dispatch.call_timeout_secs = call_timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let api_key = read_env("CLOUDPILOT_LLM_API_KEY").or_else(|| read_env("OPENAI_API_KEY"));
        if let Some(value) = api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CLOUDPILOT_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("CLOUDPILOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CLOUDPILOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CLOUDPILOT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CLOUDPILOT_LLM_CONFIDENCE_THRESHOLD") {
            self.llm.confidence_threshold =
                parse_f64("CLOUDPILOT_LLM_CONFIDENCE_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("CLOUDPILOT_AWS_ENABLED") {
            self.aws.enabled = parse_bool("CLOUDPILOT_AWS_ENABLED", &value)?;
        }
        let aws_region = read_env("CLOUDPILOT_AWS_REGION").or_else(|| read_env("AWS_REGION"));
        if let Some(value) = aws_region {
            self.aws.region = value;
        }

        if let Some(value) = read_env("CLOUDPILOT_AZURE_ENABLED") {
            self.azure.enabled = parse_bool("CLOUDPILOT_AZURE_ENABLED", &value)?;
        }
        let tenant_id =
            read_env("CLOUDPILOT_AZURE_TENANT_ID").or_else(|| read_env("AZURE_TENANT_ID"));
        if let Some(value) = tenant_id {
            self.azure.tenant_id = Some(value);
        }
        let client_id =
            read_env("CLOUDPILOT_AZURE_CLIENT_ID").or_else(|| read_env("AZURE_CLIENT_ID"));
        if let Some(value) = client_id {
            self.azure.client_id = Some(value);
        }
        let client_secret =
            read_env("CLOUDPILOT_AZURE_CLIENT_SECRET").or_else(|| read_env("AZURE_CLIENT_SECRET"));
        if let Some(value) = client_secret {
            self.azure.client_secret = Some(secret_value(value));
        }
        let subscription_id = read_env("CLOUDPILOT_AZURE_SUBSCRIPTION_ID")
            .or_else(|| read_env("AZURE_SUBSCRIPTION_ID"));
        if let Some(value) = subscription_id {
            self.azure.subscription_id = Some(value);
        }

        if let Some(value) = read_env("CLOUDPILOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CLOUDPILOT_SERVER_PORT") {
            self.server.port = parse_u16("CLOUDPILOT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CLOUDPILOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CLOUDPILOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CLOUDPILOT_SESSION_IDLE_TIMEOUT_SECS") {
            self.session.idle_timeout_secs =
                parse_u64("CLOUDPILOT_SESSION_IDLE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CLOUDPILOT_SESSION_HISTORY_LIMIT") {
            self.session.history_limit =
                parse_u64("CLOUDPILOT_SESSION_HISTORY_LIMIT", &value)? as usize;
        }

        if let Some(value) = read_env("CLOUDPILOT_DISPATCH_MAX_ATTEMPTS") {
            self.dispatch.max_attempts = parse_u32("CLOUDPILOT_DISPATCH_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("CLOUDPILOT_DISPATCH_BACKOFF_BASE_MS") {
            self.dispatch.backoff_base_ms =
                parse_u64("CLOUDPILOT_DISPATCH_BACKOFF_BASE_MS", &value)?;
        }
        if let Some(value) = read_env("CLOUDPILOT_DISPATCH_CALL_TIMEOUT_SECS") {
            self.dispatch.call_timeout_secs =
                parse_u64("CLOUDPILOT_DISPATCH_CALL_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("CLOUDPILOT_LOGGING_LEVEL").or_else(|| read_env("CLOUDPILOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CLOUDPILOT_LOGGING_FORMAT").or_else(|| read_env("CLOUDPILOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = llm_base_url;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(confidence_threshold) = overrides.confidence_threshold {
            self.llm.confidence_threshold = confidence_threshold;
        }
        if let Some(aws_enabled) = overrides.aws_enabled {
            self.aws.enabled = aws_enabled;
        }
        if let Some(azure_enabled) = overrides.azure_enabled {
            self.azure.enabled = azure_enabled;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_providers(&self.aws, &self.azure)?;
        validate_server(&self.server)?;
        validate_session(&self.session)?;
        validate_dispatch(&self.dispatch)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("cloudpilot.toml"), PathBuf::from("config/cloudpilot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&llm.confidence_threshold) {
        return Err(ConfigError::Validation(
            "llm.confidence_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }

    let missing = llm
        .api_key
        .as_ref()
        .map(|value| value.expose_secret().trim().is_empty())
        .unwrap_or(true);
    if missing {
        return Err(ConfigError::Validation(
            "llm.api_key is required (set llm.api_key or CLOUDPILOT_LLM_API_KEY/OPENAI_API_KEY)"
                .to_string(),
        ));
    }

    if !llm.base_url.starts_with("http://") && !llm.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_providers(aws: &AwsConfig, azure: &AzureConfig) -> Result<(), ConfigError> {
    if !aws.enabled && !azure.enabled {
        return Err(ConfigError::Validation(
            "at least one cloud provider must be enabled (aws.enabled or azure.enabled)"
                .to_string(),
        ));
    }

    if aws.enabled && aws.region.trim().is_empty() {
        return Err(ConfigError::Validation("aws.region must not be empty".to_string()));
    }

    if azure.enabled {
        let secret_missing = azure
            .client_secret
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        let missing = azure.tenant_id.is_none()
            || azure.client_id.is_none()
            || azure.subscription_id.is_none()
            || secret_missing;
        if missing {
            return Err(ConfigError::Validation(
                "azure.enabled requires tenant_id, client_id, client_secret, and subscription_id"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "session.idle_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if session.history_limit == 0 || session.history_limit > 100 {
        return Err(ConfigError::Validation(
            "session.history_limit must be in range 1..=100".to_string(),
        ));
    }

    Ok(())
}

fn validate_dispatch(dispatch: &DispatchConfig) -> Result<(), ConfigError> {
    if dispatch.max_attempts == 0 || dispatch.max_attempts > 5 {
        return Err(ConfigError::Validation(
            "dispatch.max_attempts must be in range 1..=5".to_string(),
        ));
    }

    if dispatch.call_timeout_secs == 0 || dispatch.call_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "dispatch.call_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    aws: Option<AwsPatch>,
    azure: Option<AzurePatch>,
    server: Option<ServerPatch>,
    session: Option<SessionPatch>,
    dispatch: Option<DispatchPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    confidence_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct AwsPatch {
    enabled: Option<bool>,
    region: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AzurePatch {
    enabled: Option<bool>,
    tenant_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    subscription_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    idle_timeout_secs: Option<u64>,
    history_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct DispatchPatch {
    max_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    call_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
