use std::sync::Arc;

use uuid::Uuid;

use cloudpilot_agent::{AgentRuntime, IntentResolver, OpenAiClient, SessionStore};
use cloudpilot_core::config::{AppConfig, LoadOptions};
use cloudpilot_core::{CapabilityRegistry, Provider};
use cloudpilot_providers::{AwsOps, AzureOps, Dispatcher};

use super::CommandResult;

pub fn run(text: &str, session: Option<&str>) -> CommandResult {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::failure("query", "runtime", error.to_string()),
    };
    runtime.block_on(execute(text, session))
}

async fn execute(text: &str, session: Option<&str>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::failure("query", "config", error.to_string()),
    };

    let agent = match build_agent(&config).await {
        Ok(agent) => agent,
        Err(error) => return CommandResult::failure("query", "bootstrap", error),
    };

    let session_id =
        session.map(str::to_string).unwrap_or_else(|| format!("cli-{}", Uuid::new_v4()));
    let result = agent.handle_utterance(&session_id, text).await;

    let exit_code = u8::from(result.is_error());
    let output = serde_json::to_string_pretty(&result)
        .unwrap_or_else(|error| format!("{{\"error\": \"serialization failed: {error}\"}}"));
    CommandResult { exit_code, output }
}

/// Same wiring the server performs at bootstrap, scoped to one command.
async fn build_agent(config: &AppConfig) -> Result<AgentRuntime, String> {
    let llm = OpenAiClient::new(&config.llm).map_err(|error| error.to_string())?;
    let resolver = IntentResolver::new(
        Arc::new(llm),
        Arc::new(CapabilityRegistry::builtin()),
        config.llm.confidence_threshold,
    );

    let mut dispatcher = Dispatcher::new(&config.dispatch);
    if config.aws.enabled {
        dispatcher =
            dispatcher.with_client(Provider::Aws, Arc::new(AwsOps::new(&config.aws).await));
    }
    if config.azure.enabled {
        let azure = AzureOps::new(&config.azure).map_err(|error| error.to_string())?;
        dispatcher = dispatcher.with_client(Provider::Azure, Arc::new(azure));
    }

    let sessions = Arc::new(SessionStore::new(
        config.session.idle_timeout_secs,
        config.session.history_limit,
    ));
    Ok(AgentRuntime::new(resolver, Arc::new(dispatcher), sessions))
}
