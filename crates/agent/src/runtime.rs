//! Top-level turn handling: one utterance in, one canonical result out.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use cloudpilot_core::{CanonicalResult, ResolveError, ResolvedIntent};

use crate::resolver::IntentResolver;
use crate::session::SessionStore;

/// Seam between intent resolution and provider execution. The dispatcher
/// owns retries, timeouts, and normalization; by the time a result comes
/// back here it is already canonical.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, intent: &ResolvedIntent) -> CanonicalResult;
}

pub struct AgentRuntime {
    resolver: IntentResolver,
    dispatcher: Arc<dyn Dispatch>,
    sessions: Arc<SessionStore>,
}

impl AgentRuntime {
    pub fn new(
        resolver: IntentResolver,
        dispatcher: Arc<dyn Dispatch>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self { resolver, dispatcher, sessions }
    }

    pub fn sessions(&self) -> Arc<SessionStore> {
        self.sessions.clone()
    }

    /// Handles one conversational turn. Never returns an `Err`: every failure
    /// mode is folded into [`CanonicalResult::Error`] so callers render one
    /// shape.
    pub async fn handle_utterance(&self, session_id: &str, utterance: &str) -> CanonicalResult {
        let correlation_id = Uuid::new_v4();
        info!(
            event_name = "agent.utterance.received",
            %correlation_id,
            session_id,
            "handling utterance"
        );

        let utterance = utterance.trim();
        if utterance.is_empty() {
            return ResolveError::ValidationFailure {
                field: "query".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into();
        }

        let context = self.sessions.snapshot(session_id).await;
        let intent = match self.resolver.resolve(utterance, &context).await {
            Ok(intent) => intent,
            Err(error) => {
                warn!(
                    event_name = "agent.intent.rejected",
                    %correlation_id,
                    session_id,
                    error = %error,
                    "utterance did not resolve to an intent"
                );
                return error.into();
            }
        };

        info!(
            event_name = "agent.intent.resolved",
            %correlation_id,
            session_id,
            provider = %intent.provider,
            operation = %intent.operation,
            confidence = intent.confidence,
            "intent resolved"
        );

        // Context tracks what the user asked for, so it is updated on every
        // successful resolution even if the provider call then fails.
        self.sessions.record(session_id, &intent).await;

        let result = self.dispatcher.dispatch(&intent).await;
        if result.is_error() {
            warn!(
                event_name = "agent.dispatch.failed",
                %correlation_id,
                session_id,
                operation = %intent.operation,
                "dispatch returned an error result"
            );
        } else {
            info!(
                event_name = "agent.dispatch.completed",
                %correlation_id,
                session_id,
                operation = %intent.operation,
                "dispatch completed"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;

    use cloudpilot_core::{
        CanonicalResult, CapabilityRegistry, ErrorCode, Provider, ResolvedIntent, ResourceList,
    };

    use super::{AgentRuntime, Dispatch};
    use crate::llm::{LlmClient, LlmError};
    use crate::prompt::Prompt;
    use crate::resolver::IntentResolver;
    use crate::session::SessionStore;

    struct ScriptedLlm {
        replies: Mutex<VecDeque<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<String>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _prompt: &Prompt) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .ok_or_else(|| LlmError::InvalidResponse("script exhausted".to_string()))
        }
    }

    /// Records every dispatched intent and returns an empty listing.
    struct RecordingDispatch {
        seen: Mutex<Vec<ResolvedIntent>>,
    }

    impl RecordingDispatch {
        fn new() -> Arc<Self> {
            Arc::new(Self { seen: Mutex::new(Vec::new()) })
        }

        fn seen(&self) -> Vec<ResolvedIntent> {
            self.seen.lock().expect("seen lock").clone()
        }
    }

    #[async_trait]
    impl Dispatch for RecordingDispatch {
        async fn dispatch(&self, intent: &ResolvedIntent) -> CanonicalResult {
            self.seen.lock().expect("seen lock").push(intent.clone());
            CanonicalResult::ResourceList(ResourceList {
                provider: intent.provider,
                resources: Vec::new(),
            })
        }
    }

    fn runtime(llm: Arc<ScriptedLlm>, dispatcher: Arc<RecordingDispatch>) -> AgentRuntime {
        let resolver =
            IntentResolver::new(llm, Arc::new(CapabilityRegistry::builtin()), 0.5);
        AgentRuntime::new(resolver, dispatcher, Arc::new(SessionStore::new(1800, 10)))
    }

    fn reply(provider: &str, operation: &str, parameters: serde_json::Value) -> String {
        json!({
            "provider": provider,
            "operation": operation,
            "parameters": parameters,
            "confidence": 0.9,
        })
        .to_string()
    }

    #[tokio::test]
    async fn resolved_intents_reach_the_dispatcher_fully_parameterized() {
        let llm = ScriptedLlm::new(vec![reply(
            "aws",
            "get-instance-metrics",
            json!({"resource_id": "i-123", "metric": "CPUUtilization"}),
        )]);
        let dispatcher = RecordingDispatch::new();
        let runtime = runtime(llm, dispatcher.clone());

        let result = runtime.handle_utterance("s1", "cpu for i-123").await;
        assert!(!result.is_error());

        let seen = dispatcher.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].operation, "get-instance-metrics");
        assert_eq!(seen[0].param("resource_id"), Some("i-123"));
    }

    #[tokio::test]
    async fn resolution_failures_never_reach_the_dispatcher() {
        let llm = ScriptedLlm::new(vec![reply("aws", "stop-instance", json!({}))]);
        let dispatcher = RecordingDispatch::new();
        let runtime = runtime(llm, dispatcher.clone());

        let result = runtime.handle_utterance("s1", "stop it").await;
        match result {
            CanonicalResult::Error(info) => {
                assert_eq!(info.code, ErrorCode::AmbiguousIntent);
                assert_eq!(info.candidates, vec!["resource_id".to_string()]);
            }
            other => panic!("expected an error result, got {other:?}"),
        }
        assert!(dispatcher.seen().is_empty());
    }

    #[tokio::test]
    async fn successful_turns_update_the_session_context() {
        let llm = ScriptedLlm::new(vec![
            reply("aws", "stop-instance", json!({"resource_id": "i-123"})),
            reply("aws", "start-instance", json!({})),
        ]);
        let dispatcher = RecordingDispatch::new();
        let runtime = runtime(llm, dispatcher.clone());

        runtime.handle_utterance("s1", "stop i-123").await;
        // The follow-up omits the resource id; the recorded context fills it.
        let result = runtime.handle_utterance("s1", "now start it again").await;
        assert!(!result.is_error());

        let seen = dispatcher.seen();
        assert_eq!(seen[1].operation, "start-instance");
        assert_eq!(seen[1].param("resource_id"), Some("i-123"));
    }

    #[tokio::test]
    async fn context_never_leaks_across_sessions() {
        let llm = ScriptedLlm::new(vec![
            reply("aws", "stop-instance", json!({"resource_id": "i-aaa"})),
            reply("aws", "stop-instance", json!({})),
        ]);
        let dispatcher = RecordingDispatch::new();
        let runtime = runtime(llm, dispatcher.clone());

        runtime.handle_utterance("alice", "stop i-aaa").await;
        let result = runtime.handle_utterance("bob", "stop it").await;

        match result {
            CanonicalResult::Error(info) => assert_eq!(info.code, ErrorCode::AmbiguousIntent),
            other => panic!("bob's session has no resource to borrow, got {other:?}"),
        }
        assert_eq!(dispatcher.seen().len(), 1);
    }

    #[tokio::test]
    async fn blank_utterances_are_rejected_without_a_model_call() {
        let llm = ScriptedLlm::new(vec![]);
        let dispatcher = RecordingDispatch::new();
        let runtime = runtime(llm.clone(), dispatcher.clone());

        let result = runtime.handle_utterance("s1", "   ").await;
        match result {
            CanonicalResult::Error(info) => assert_eq!(info.code, ErrorCode::ValidationFailure),
            other => panic!("expected validation failure, got {other:?}"),
        }
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
        assert!(dispatcher.seen().is_empty());
    }
}
