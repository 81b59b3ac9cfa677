use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key of the per-service breakdown inside an analysis result.
pub const DETAILED_ANALYSIS_KEY: &str = "detailed_analysis";

/// Top-level keys that make a result worth rendering.
pub const DISPLAY_KEYS: &[&str] = &["trust_score", DETAILED_ANALYSIS_KEY, "article_summary"];

/// Opaque analysis document produced by the backend.
///
/// Only the handful of keys used for routing are ever inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisResult(Value);

impl AnalysisResult {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn trust_score(&self) -> Option<f64> {
        self.0.get("trust_score").and_then(Value::as_f64)
    }

    pub fn detailed_analysis(&self) -> Option<&Map<String, Value>> {
        self.0.get(DETAILED_ANALYSIS_KEY).and_then(Value::as_object)
    }

    /// Section of the detailed analysis produced by one service, e.g. `bias_detector`.
    pub fn service(&self, name: &str) -> Option<&Value> {
        self.detailed_analysis().and_then(|services| services.get(name))
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.detailed_analysis()
            .map(|services| services.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_displayable(&self) -> bool {
        DISPLAY_KEYS.iter().any(|key| self.0.get(*key).is_some())
    }
}

impl From<Value> for AnalysisResult {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
