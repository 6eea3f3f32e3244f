use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use cloudpilot_agent::{AgentRuntime, IntentResolver, LlmError, OpenAiClient, SessionStore};
use cloudpilot_core::config::{AppConfig, ConfigError, LoadOptions};
use cloudpilot_core::{CapabilityRegistry, Provider};
use cloudpilot_providers::{AwsOps, AzureOps, Dispatcher};

pub struct Application {
    pub config: AppConfig,
    pub runtime: Arc<AgentRuntime>,
    /// Providers that came up with a working client, in catalog order.
    pub providers: Vec<Provider>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("language model client init failed: {0}")]
    Llm(#[source] LlmError),
    #[error("azure client init failed: {0}")]
    Azure(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let llm = OpenAiClient::new(&config.llm).map_err(BootstrapError::Llm)?;
    let registry = Arc::new(CapabilityRegistry::builtin());
    let resolver =
        IntentResolver::new(Arc::new(llm), registry, config.llm.confidence_threshold);

    let mut dispatcher = Dispatcher::new(&config.dispatch);
    if config.aws.enabled {
        let aws = AwsOps::new(&config.aws).await;
        dispatcher = dispatcher.with_client(Provider::Aws, Arc::new(aws));
        info!(
            event_name = "system.bootstrap.provider_enabled",
            provider = "aws",
            region = %config.aws.region,
            "aws client initialized"
        );
    }
    if config.azure.enabled {
        let azure =
            AzureOps::new(&config.azure).map_err(|error| BootstrapError::Azure(error.to_string()))?;
        dispatcher = dispatcher.with_client(Provider::Azure, Arc::new(azure));
        info!(
            event_name = "system.bootstrap.provider_enabled",
            provider = "azure",
            "azure client initialized"
        );
    }
    let providers = dispatcher.enabled_providers();

    let sessions = Arc::new(SessionStore::new(
        config.session.idle_timeout_secs,
        config.session.history_limit,
    ));
    let runtime = Arc::new(AgentRuntime::new(resolver, Arc::new(dispatcher), sessions));

    info!(
        event_name = "system.bootstrap.complete",
        providers = ?providers,
        "application bootstrap complete"
    );
    Ok(Application { config, runtime, providers })
}

/// Periodically drops sessions that sat idle past the configured timeout.
/// Runs for the life of the process.
pub fn spawn_session_eviction(runtime: &Arc<AgentRuntime>, idle_timeout_secs: u64) {
    let sessions = runtime.sessions();
    let period = std::time::Duration::from_secs((idle_timeout_secs / 2).max(60));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = sessions.evict_idle(chrono::Utc::now()).await;
            if evicted > 0 {
                info!(
                    event_name = "system.sessions.evicted",
                    count = evicted,
                    "idle sessions evicted"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use cloudpilot_core::config::{ConfigOverrides, LoadOptions};
    use cloudpilot_core::Provider;

    use crate::bootstrap::bootstrap;

    fn options_with_key() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                llm_api_key: Some("sk-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_enables_aws_by_default() {
        let app = bootstrap(options_with_key()).await.expect("bootstrap should succeed");
        assert_eq!(app.providers, vec![Provider::Aws]);
        assert_eq!(app.runtime.sessions().active_sessions().await, 0);
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_when_azure_lacks_credentials() {
        let mut options = options_with_key();
        options.overrides.azure_enabled = Some(true);

        let error = bootstrap(options).await.err().expect("partial azure config must fail");
        assert!(error.to_string().contains("azure"));
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_an_api_key() {
        // Scoped to an explicit empty key so an ambient OPENAI_API_KEY in the
        // environment cannot mask the failure.
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                llm_api_key: Some(String::new()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("blank api key must fail").to_string();
        assert!(message.contains("llm.api_key"));
    }
}
