//! Free text plus conversation context in, validated intent out. The model
//! only proposes; everything it says is checked against the capability
//! registry before an intent can exist, and anything the context can answer
//! deterministically is never left to the model's imagination.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use cloudpilot_core::{
    CapabilityDescriptor, CapabilityRegistry, Provider, ResolveError, ResolvedIntent,
};

use crate::llm::LlmClient;
use crate::prompt::{self, Prompt};
use crate::session::SessionContext;

pub struct IntentResolver {
    llm: Arc<dyn LlmClient>,
    registry: Arc<CapabilityRegistry>,
    confidence_threshold: f64,
}

/// Raw shape of the model's JSON answer, before any validation.
#[derive(Debug, Deserialize)]
struct ModelReply {
    provider: Option<String>,
    operation: Option<String>,
    #[serde(default)]
    parameters: serde_json::Map<String, serde_json::Value>,
    confidence: Option<f64>,
}

impl IntentResolver {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<CapabilityRegistry>,
        confidence_threshold: f64,
    ) -> Self {
        Self { llm, registry, confidence_threshold }
    }

    pub async fn resolve(
        &self,
        utterance: &str,
        context: &SessionContext,
    ) -> Result<ResolvedIntent, ResolveError> {
        let prompt = prompt::resolution_prompt(utterance, context, &self.registry);
        let reply_text = self.complete(&prompt).await?;

        let first_error = match self.interpret(&reply_text, utterance, context) {
            Ok(intent) => return self.gate(intent),
            Err(error) => error,
        };

        match first_error {
            // The model cannot answer these any better than the context can:
            // re-asking would just invite a guess.
            error @ (ResolveError::AmbiguousIntent { .. }
            | ResolveError::UnresolvedIntent { .. }) => Err(error),
            retryable => {
                debug!(
                    event_name = "agent.resolve.retry",
                    reason = %retryable,
                    "first resolution attempt rejected, retrying with feedback"
                );
                let retry_prompt = prompt::feedback_prompt(
                    utterance,
                    context,
                    &self.registry,
                    &reply_text,
                    &retryable,
                );
                let retry_text = self.complete(&retry_prompt).await?;
                match self.interpret(&retry_text, utterance, context) {
                    Ok(intent) => self.gate(intent),
                    Err(error @ ResolveError::AmbiguousIntent { .. }) => Err(error),
                    Err(second) => {
                        Err(ResolveError::UnresolvedIntent { reason: second.to_string() })
                    }
                }
            }
        }
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, ResolveError> {
        self.llm
            .complete(prompt)
            .await
            .map_err(|error| ResolveError::UnresolvedIntent { reason: error.to_string() })
    }

    fn interpret(
        &self,
        reply_text: &str,
        utterance: &str,
        context: &SessionContext,
    ) -> Result<ResolvedIntent, ResolveError> {
        let reply: ModelReply = serde_json::from_str(reply_text).map_err(|_| {
            ResolveError::ValidationFailure {
                field: "response".to_string(),
                reason: "reply was not a valid JSON object".to_string(),
            }
        })?;

        let provider = reply
            .provider
            .as_deref()
            .and_then(Provider::parse)
            .or(context.last_provider)
            .unwrap_or(Provider::Aws);

        let operation = reply
            .operation
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ResolveError::ValidationFailure {
                field: "operation".to_string(),
                reason: "missing from reply".to_string(),
            })?;

        let descriptor = self.registry.lookup(provider, &operation)?;

        let mut parameters = declared_parameters(descriptor, reply.parameters);
        backfill_from_context(descriptor, &mut parameters, utterance, context);

        let missing: Vec<String> = descriptor
            .required
            .iter()
            .filter(|spec| !parameters.contains_key(spec.name))
            .map(|spec| spec.name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ResolveError::AmbiguousIntent { candidates: missing });
        }

        for (name, value) in &parameters {
            if let Some(spec) = descriptor.param_spec(name) {
                spec.kind.validate(name, value)?;
            }
        }

        let confidence = reply
            .confidence
            .ok_or_else(|| ResolveError::ValidationFailure {
                field: "confidence".to_string(),
                reason: "missing from reply".to_string(),
            })?
            .clamp(0.0, 1.0);

        Ok(ResolvedIntent {
            provider,
            operation,
            parameters,
            confidence,
            raw_utterance: utterance.to_string(),
        })
    }

    /// A syntactically valid intent below the confidence threshold is refused
    /// rather than executed: "stop" and "start" are one token apart.
    fn gate(&self, intent: ResolvedIntent) -> Result<ResolvedIntent, ResolveError> {
        if intent.confidence < self.confidence_threshold {
            return Err(ResolveError::UnresolvedIntent {
                reason: format!(
                    "confidence {:.2} is below the configured threshold {:.2}",
                    intent.confidence, self.confidence_threshold
                ),
            });
        }
        Ok(intent)
    }
}

/// Keeps only parameters the descriptor declares, stringifying scalar JSON
/// values. Everything else the model volunteered is dropped.
fn declared_parameters(
    descriptor: &CapabilityDescriptor,
    raw: serde_json::Map<String, serde_json::Value>,
) -> BTreeMap<String, String> {
    let mut parameters = BTreeMap::new();

    for (name, value) in raw {
        if descriptor.param_spec(&name).is_none() {
            debug!(
                event_name = "agent.resolve.dropped_parameter",
                parameter = %name,
                operation = descriptor.operation,
                "model emitted an undeclared parameter"
            );
            continue;
        }

        let rendered = match value {
            serde_json::Value::String(text) => Some(text),
            serde_json::Value::Number(number) => Some(number.to_string()),
            serde_json::Value::Bool(flag) => Some(flag.to_string()),
            // Models sometimes wrap a single value in a list.
            serde_json::Value::Array(items) => match items.as_slice() {
                [serde_json::Value::String(text)] => Some(text.clone()),
                _ => None,
            },
            _ => None,
        };

        if let Some(rendered) = rendered {
            parameters.insert(name, rendered);
        }
    }

    parameters
}

/// Deterministic fallback: required fields the model omitted are filled from
/// the session context before anyone considers the request ambiguous.
fn backfill_from_context(
    descriptor: &CapabilityDescriptor,
    parameters: &mut BTreeMap<String, String>,
    utterance: &str,
    context: &SessionContext,
) {
    for spec in &descriptor.required {
        if parameters.contains_key(spec.name) {
            continue;
        }
        let supplied = match spec.name {
            "resource_id" => context.last_resource_id.clone(),
            "timeframe" => context.last_timeframe.map(|timeframe| timeframe.as_str().to_string()),
            _ => None,
        };
        if let Some(value) = supplied {
            parameters.insert(spec.name.to_string(), value);
        }
    }

    // An explicit back-reference pins the prior resource even when the
    // parameter is only optional for this operation.
    if !parameters.contains_key("resource_id")
        && descriptor.param_spec("resource_id").is_some()
        && mentions_prior_resource(utterance)
    {
        if let Some(resource_id) = &context.last_resource_id {
            parameters.insert("resource_id".to_string(), resource_id.clone());
        }
    }
}

fn mentions_prior_resource(utterance: &str) -> bool {
    let lowered = utterance.to_ascii_lowercase();
    if lowered.contains("that one") || lowered.contains("this one") {
        return true;
    }
    lowered
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .any(|token| matches!(token, "it" | "that" | "same"))
}
