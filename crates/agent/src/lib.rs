//! Agent runtime - natural-language-to-cloud-operation resolution
//!
//! This crate is the "brain" of the assistant:
//! - Resolves free-text utterances into structured, validated cloud intents
//! - Keeps short-term conversational context so follow-ups like "stop it"
//!   land on the right resource
//! - Hands validated intents to the dispatch layer and returns canonical,
//!   provider-agnostic results
//!
//! # Pipeline
//!
//! 1. **Session snapshot** (`session`) - immutable view of recent turns
//! 2. **Resolution** (`resolver`) - LLM translation constrained by the
//!    capability registry, with deterministic context backfill
//! 3. **Dispatch** (`runtime::Dispatch`) - one provider call per turn
//! 4. **Context update** (`session`) - recorded only after a successful
//!    resolution
//!
//! # Safety principle
//!
//! The LLM is strictly a translator. It never invents operations - anything
//! it emits that is absent from the capability registry is rejected before it
//! can reach a cloud provider - and low-confidence translations are refused
//! rather than executed.

pub mod llm;
pub mod prompt;
pub mod resolver;
pub mod runtime;
pub mod session;

pub use llm::{LlmClient, LlmError, OpenAiClient};
pub use resolver::IntentResolver;
pub use runtime::{AgentRuntime, Dispatch};
pub use session::{SessionContext, SessionStore};
