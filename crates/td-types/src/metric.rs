use serde::{Deserialize, Serialize};

/// A named observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    /// `None` when the polarity is unknown.
    #[serde(default)]
    pub lower_is_better: Option<bool>,
    /// Opaque settings for whatever evaluates the metric.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Metric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lower_is_better: None,
            properties: serde_json::Map::new(),
        }
    }

    pub fn with_lower_is_better(mut self, lower_is_better: bool) -> Self {
        self.lower_is_better = Some(lower_is_better);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_builder_and_serde() {
        let metric = Metric::new("latency")
            .with_lower_is_better(true)
            .with_property("unit", serde_json::json!("ms"));
        let json = serde_json::to_string(&metric).unwrap();
        let back: Metric = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metric);

        let bare: Metric = serde_json::from_str(r#"{"name":"acc"}"#).unwrap();
        assert_eq!(bare.lower_is_better, None);
        assert!(bare.properties.is_empty());
    }
}
