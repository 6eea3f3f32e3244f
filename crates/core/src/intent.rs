use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::registry::{Provider, Timeframe};

/// A fully validated intent: the operation exists in the capability registry
/// for the provider, and every required parameter is present and valid.
/// Constructed only by the resolver; consumed once by the dispatch layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedIntent {
    pub provider: Provider,
    pub operation: String,
    pub parameters: BTreeMap<String, String>,
    pub confidence: f64,
    pub raw_utterance: String,
}

impl ResolvedIntent {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn timeframe(&self) -> Option<Timeframe> {
        self.param("timeframe").and_then(Timeframe::parse)
    }
}
