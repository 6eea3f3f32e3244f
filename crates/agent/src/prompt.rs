//! Prompt construction for intent resolution. The capability registry is
//! embedded verbatim as the allowed-output constraint, so the model can only
//! pick from catalogued operations and declared parameters.

use std::fmt::Write;

use cloudpilot_core::{CapabilityRegistry, Provider, ResolveError};

use crate::session::SessionContext;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

const SYSTEM_PROMPT: &str = "You are a cloud operations assistant that translates natural language \
requests into structured commands for AWS and Azure resource management. You only translate: you \
never decide to run an operation the user did not ask for, and you never invent operations or \
parameters outside the provided catalog. Always answer with a single valid JSON object and no \
other text.";

/// How many of the most recent turns are summarized into the prompt.
const CONTEXT_TURNS: usize = 5;

pub fn resolution_prompt(
    utterance: &str,
    context: &SessionContext,
    registry: &CapabilityRegistry,
) -> Prompt {
    let mut user = String::new();

    let _ = writeln!(user, "User request: {utterance}");
    let _ = writeln!(user);
    let _ = writeln!(user, "{}", context_section(context));
    let _ = writeln!(user, "Supported operations (the only permitted values):");
    let _ = write!(user, "{}", catalog_section(registry));
    let _ = writeln!(user);
    let _ = writeln!(
        user,
        "Answer with exactly this JSON shape and nothing else:\n\
         {{\n\
         \x20 \"provider\": \"aws\" or \"azure\",\n\
         \x20 \"operation\": \"one operation name from the catalog\",\n\
         \x20 \"parameters\": {{\"name\": \"value\", ...}},\n\
         \x20 \"confidence\": 0.0 to 1.0\n\
         }}\n\
         Only include parameters the request actually specifies. If the request refers to a \
         previous resource (\"it\", \"that one\") and the context above names one, use that \
         resource. Confidence reflects how certain you are the chosen operation matches the \
         request."
    );

    Prompt { system: SYSTEM_PROMPT.to_string(), user }
}

/// Retry prompt appended with what was wrong about the previous answer.
pub fn feedback_prompt(
    utterance: &str,
    context: &SessionContext,
    registry: &CapabilityRegistry,
    previous_reply: &str,
    error: &ResolveError,
) -> Prompt {
    let base = resolution_prompt(utterance, context, registry);
    let user = format!(
        "{}\n\nYour previous answer was rejected.\nPrevious answer: {}\nProblem: {}\n\
         Correct the answer. Use only catalogued operations and parameters, and keep the same \
         JSON shape.",
        base.user, previous_reply, error
    );
    Prompt { system: base.system, user }
}

fn context_section(context: &SessionContext) -> String {
    let mut section = String::from("Conversation context:\n");

    if context.is_empty() {
        section.push_str("  (no prior turns)\n");
        return section;
    }

    if let Some(provider) = context.last_provider {
        let _ = writeln!(section, "  last provider: {provider}");
    }
    if let Some(timeframe) = context.last_timeframe {
        let _ = writeln!(section, "  last timeframe: {}", timeframe.as_str());
    }
    if let Some(resource_id) = &context.last_resource_id {
        let _ = writeln!(section, "  last resource referenced: {resource_id}");
    }

    for intent in context.history.iter().rev().take(CONTEXT_TURNS).rev() {
        let _ = writeln!(
            section,
            "  earlier turn: {} on {} ({})",
            intent.operation, intent.provider, intent.raw_utterance
        );
    }

    section
}

fn catalog_section(registry: &CapabilityRegistry) -> String {
    let mut section = String::new();

    for provider in Provider::ALL {
        for descriptor in registry.operations(provider) {
            let _ = write!(
                section,
                "  {}/{} - {}",
                descriptor.provider, descriptor.operation, descriptor.summary
            );
            if !descriptor.required.is_empty() {
                let required: Vec<String> = descriptor
                    .required
                    .iter()
                    .map(|spec| format!("{} ({})", spec.name, spec.kind.describe()))
                    .collect();
                let _ = write!(section, "; required: {}", required.join(", "));
            }
            if !descriptor.optional.is_empty() {
                let optional: Vec<String> = descriptor
                    .optional
                    .iter()
                    .map(|spec| format!("{} ({})", spec.name, spec.kind.describe()))
                    .collect();
                let _ = write!(section, "; optional: {}", optional.join(", "));
            }
            section.push('\n');
        }
    }

    section
}

#[cfg(test)]
mod tests {
    use cloudpilot_core::{CapabilityRegistry, Provider, ResolveError};

    use super::{feedback_prompt, resolution_prompt};
    use crate::session::SessionContext;

    #[test]
    fn prompt_embeds_utterance_and_full_catalog() {
        let registry = CapabilityRegistry::builtin();
        let prompt =
            resolution_prompt("show running instances", &SessionContext::default(), &registry);

        assert!(prompt.user.contains("show running instances"));
        assert!(prompt.user.contains("aws/list-instances"));
        assert!(prompt.user.contains("azure/list-vms"));
        assert!(prompt.user.contains("(no prior turns)"));
    }

    #[test]
    fn prompt_surfaces_session_context() {
        let registry = CapabilityRegistry::builtin();
        let mut context = SessionContext::default();
        context.last_provider = Some(Provider::Aws);
        context.last_resource_id = Some("i-0abc".to_string());

        let prompt = resolution_prompt("stop it", &context, &registry);
        assert!(prompt.user.contains("last resource referenced: i-0abc"));
        assert!(prompt.user.contains("last provider: aws"));
    }

    #[test]
    fn feedback_prompt_carries_rejection_reason() {
        let registry = CapabilityRegistry::builtin();
        let error = ResolveError::UnknownOperation {
            provider: Provider::Aws,
            operation: "destroy-region".to_string(),
        };

        let prompt = feedback_prompt(
            "destroy the region",
            &SessionContext::default(),
            &registry,
            "{\"operation\": \"destroy-region\"}",
            &error,
        );
        assert!(prompt.user.contains("previous answer was rejected"));
        assert!(prompt.user.contains("destroy-region"));
        assert!(prompt.user.contains("not supported"));
    }
}
