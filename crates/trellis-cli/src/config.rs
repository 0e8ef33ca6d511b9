//! JSON delivery configuration.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use trellis_ordering::{Binding, ConsumePredicate, DeliveryPlan, DeliveryPlanBuilder, Phase};
use trellis_types::{Result, TrellisError};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub visitors: Vec<VisitorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisitorConfig {
    pub name: String,
    pub selector: String,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub produces: Vec<String>,
    #[serde(default)]
    pub consumes: Option<ConsumesConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumesConfig {
    Names(Vec<String>),
    Prefix(String),
    Pattern(String),
    Any,
}

impl ConsumesConfig {
    fn to_predicate(&self) -> Result<ConsumePredicate> {
        Ok(match self {
            ConsumesConfig::Names(names) => ConsumePredicate::names(names.iter().cloned()),
            ConsumesConfig::Prefix(prefix) => ConsumePredicate::prefix(prefix.clone()),
            ConsumesConfig::Pattern(pattern) => ConsumePredicate::pattern(pattern)?,
            ConsumesConfig::Any => ConsumePredicate::Any,
        })
    }
}

impl VisitorConfig {
    /// The visitor as a binding whose handler is its name.
    pub fn to_binding(&self) -> Result<Binding<String>> {
        if self.name.trim().is_empty() {
            return Err(TrellisError::InvalidConfig("visitor name must not be empty".into()));
        }
        if self.selector.trim().is_empty() {
            return Err(TrellisError::InvalidConfig(format!(
                "visitor '{}' has an empty selector",
                self.name
            )));
        }

        let mut binding = Binding::new(self.name.clone(), self.name.clone())
            .produces(self.produces.iter().cloned());
        if let Some(consumes) = &self.consumes {
            binding = binding.consumes(consumes.to_predicate()?);
        }
        Ok(binding)
    }
}

impl DeliveryConfig {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TrellisError::InvalidConfig(e.to_string()))
    }

    /// Sort every selector's visitors into a shareable plan.
    pub fn build_plan(&self) -> Result<Arc<DeliveryPlan<String>>> {
        let mut builder = DeliveryPlanBuilder::new();
        for visitor in &self.visitors {
            builder.add(visitor.phase, visitor.selector.clone(), visitor.to_binding()?);
        }
        builder.build()
    }
}

/// Read and parse a configuration file.
pub fn load_config(path: &Path) -> Result<DeliveryConfig> {
    let json = std::fs::read_to_string(path)?;
    let config = DeliveryConfig::parse(&json).map_err(|e| match e {
        TrellisError::InvalidConfig(msg) => {
            TrellisError::InvalidConfig(format!("{}: {msg}", path.display()))
        }
        other => other,
    })?;
    tracing::debug!(
        path = %path.display(),
        visitors = config.visitors.len(),
        "Loaded delivery configuration"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ORDER_CONFIG: &str = r#"{
        "visitors": [
            { "name": "itemReader", "selector": "item", "phase": "children",
              "consumes": { "names": ["order"] } },
            { "name": "orderCreator", "selector": "order",
              "produces": ["order"], "consumes": { "names": ["header"] } },
            { "name": "headerReader", "selector": "order",
              "produces": ["header"] },
            { "name": "auditor", "selector": "order", "phase": "after",
              "consumes": "any" }
        ]
    }"#;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_config_reads_visitors() {
        let file = write_config(ORDER_CONFIG);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.visitors.len(), 4);
        assert_eq!(config.visitors[0].phase, Phase::Children);
        assert_eq!(config.visitors[1].phase, Phase::Before);
        assert!(matches!(config.visitors[3].consumes, Some(ConsumesConfig::Any)));
    }

    #[test]
    fn build_plan_sorts_producers_first() {
        let config = DeliveryConfig::parse(ORDER_CONFIG).unwrap();
        let plan = config.build_plan().unwrap();
        let before: Vec<&str> = plan.before(&["order"]).iter().map(|b| b.label()).collect();
        assert_eq!(before, ["headerReader", "orderCreator"]);
        assert_eq!(plan.children(&["item"]).len(), 1);
        assert_eq!(plan.selectors(), ["order", "item"]);
    }

    #[test]
    fn handler_is_visitor_name() {
        let config = DeliveryConfig::parse(ORDER_CONFIG).unwrap();
        let binding = config.visitors[1].to_binding().unwrap();
        assert_eq!(binding.handler(), "orderCreator");
        assert!(binding.is_producer() && binding.is_consumer());
    }

    #[test]
    fn unknown_phase_is_invalid_config() {
        let err = DeliveryConfig::parse(
            r#"{"visitors":[{"name":"x","selector":"s","phase":"during"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, TrellisError::InvalidConfig(_)));
    }

    #[test]
    fn bad_pattern_is_invalid_config() {
        let config = DeliveryConfig::parse(
            r#"{"visitors":[{"name":"x","selector":"s","consumes":{"pattern":"("}}]}"#,
        )
        .unwrap();
        let err = config.build_plan().unwrap_err();
        assert!(matches!(err, TrellisError::InvalidConfig(_)));
    }

    #[test]
    fn empty_selector_is_rejected() {
        let config =
            DeliveryConfig::parse(r#"{"visitors":[{"name":"x","selector":" "}]}"#).unwrap();
        let err = config.build_plan().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: visitor 'x' has an empty selector"
        );
    }

    #[test]
    fn prefix_and_pattern_predicates() {
        let config = DeliveryConfig::parse(
            r#"{"visitors":[
                {"name":"p","selector":"s","produces":["order.header"]},
                {"name":"c1","selector":"s","consumes":{"prefix":"order."}},
                {"name":"c2","selector":"s","consumes":{"pattern":"order\\.h.*"}}
            ]}"#,
        )
        .unwrap();
        let producer = config.visitors[0].to_binding().unwrap();
        for consumer in &config.visitors[1..] {
            assert!(producer.feeds(&consumer.to_binding().unwrap()));
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, TrellisError::Io(_)));
    }

    #[test]
    fn parse_error_names_the_file() {
        let file = write_config("{ not json");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn cyclic_config_fails_to_build() {
        let config = DeliveryConfig::parse(
            r#"{"visitors":[
                {"name":"A","selector":"s","produces":["a"],"consumes":{"names":["b"]}},
                {"name":"B","selector":"s","produces":["b"],"consumes":{"names":["a"]}}
            ]}"#,
        )
        .unwrap();
        let err = config.build_plan().unwrap_err();
        assert_eq!(err.dependency_chain().unwrap(), ["A", "B", "A"]);
    }
}
