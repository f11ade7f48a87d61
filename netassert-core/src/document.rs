//! Configuration document: target enumeration, expected counts, and
//! per-target payload extraction.
//!
//! The document is JSON, or YAML transcoded to JSON. Two sections matter:
//! `host` (host identifier → assertions, possibly nested under other keys)
//! and `k8s.deployment` (`namespace:selector` → assertions).

use serde_json::{Map, Value};
use thiserror::Error;

use netassert_types::{Target, TargetClass, TargetError};

use crate::payload::TestPayload;

const HOST_SECTION: &str = "host";
const K8S_SECTION: &str = "k8s";
const DEPLOYMENT_SECTION: &str = "deployment";

/// Errors loading a configuration document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Neither a JSON nor a YAML document.
    #[error("document is neither JSON ({json}) nor YAML ({yaml})")]
    Parse {
        /// JSON parser error.
        json: String,
        /// YAML parser error.
        yaml: String,
    },

    /// The top level is not a mapping.
    #[error("document root must be a mapping, found {found}")]
    NotAMapping {
        /// JSON type that was found.
        found: &'static str,
    },
}

/// An immutable, parsed configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    root: Value,
}

impl ConfigDocument {
    /// Parse a document, trying JSON first and falling back to YAML.
    ///
    /// An empty document is an empty mapping.
    pub fn parse(input: &str) -> Result<Self, DocumentError> {
        let root = match serde_json::from_str::<Value>(input) {
            Ok(value) => value,
            Err(json_err) => match serde_yaml::from_str::<serde_yaml::Value>(input) {
                Ok(yaml) => yaml_to_json(yaml),
                Err(yaml_err) => {
                    return Err(DocumentError::Parse {
                        json: json_err.to_string(),
                        yaml: yaml_err.to_string(),
                    })
                }
            },
        };

        Self::from_value(root)
    }

    /// Wrap an already-built JSON value.
    pub fn from_value(root: Value) -> Result<Self, DocumentError> {
        match root {
            Value::Null => Ok(Self {
                root: Value::Object(Map::new()),
            }),
            Value::Object(_) => Ok(Self { root }),
            other => Err(DocumentError::NotAMapping {
                found: json_type(&other),
            }),
        }
    }

    /// The underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Host identifiers in document order, de-duplicated.
    pub fn host_targets(&self) -> Vec<Target> {
        let mut ids: Vec<&str> = Vec::new();
        for section in self.host_sections() {
            for key in section.keys() {
                if !ids.contains(&key.as_str()) {
                    ids.push(key);
                }
            }
        }
        ids.into_iter().map(Target::host).collect()
    }

    /// Cluster identifiers in document order.
    pub fn pod_targets(&self) -> Vec<Target> {
        self.deployment_section()
            .map(|section| section.keys().map(Target::pod).collect())
            .unwrap_or_default()
    }

    /// Targets of one class.
    pub fn targets(&self, class: TargetClass) -> Vec<Target> {
        match class {
            TargetClass::Host => self.host_targets(),
            TargetClass::Pod => self.pod_targets(),
        }
    }

    /// Number of results a complete run produces: one per entry across the
    /// `host` and `k8s.deployment` mappings.
    pub fn expected_test_count(&self) -> usize {
        self.host_targets().len() + self.pod_targets().len()
    }

    /// Number of individual assertions across all targets.
    pub fn assertion_count(&self) -> usize {
        TargetClass::ALL
            .iter()
            .flat_map(|class| self.targets(*class))
            .filter_map(|target| self.assertions(&target))
            .map(|value| match value {
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                Value::Null => 0,
                _ => 1,
            })
            .sum()
    }

    /// Extract a target's assertions, wrapped for the test container.
    pub fn resolve(&self, target: &Target) -> Result<TestPayload, TargetError> {
        let assertions = self.assertions(target).ok_or_else(|| {
            let reason = match target.class() {
                TargetClass::Host => "no matching entry in any host section",
                TargetClass::Pod => "no matching entry in k8s.deployment",
            };
            TargetError::ConfigExtraction {
                target: target.id().to_string(),
                reason: reason.into(),
            }
        })?;

        Ok(TestPayload::wrap(target.id(), assertions.clone()))
    }

    fn assertions(&self, target: &Target) -> Option<&Value> {
        match target.class() {
            TargetClass::Host => self
                .host_sections()
                .into_iter()
                .find_map(|section| section.get(target.id())),
            TargetClass::Pod => self.deployment_section()?.get(target.id()),
        }
    }

    fn deployment_section(&self) -> Option<&Map<String, Value>> {
        self.root
            .get(K8S_SECTION)?
            .get(DEPLOYMENT_SECTION)?
            .as_object()
    }

    /// Every `host` mapping, pre-order, outside the `k8s` section.
    fn host_sections(&self) -> Vec<&Map<String, Value>> {
        let mut sections = Vec::new();
        collect_host_sections(&self.root, &mut sections);
        sections
    }
}

fn collect_host_sections<'a>(value: &'a Value, out: &mut Vec<&'a Map<String, Value>>) {
    let Value::Object(map) = value else {
        return;
    };

    for (key, child) in map {
        if key == K8S_SECTION {
            continue;
        }
        match (key.as_str(), child) {
            (HOST_SECTION, Value::Object(section)) => out.push(section),
            _ => collect_host_sections(child, out),
        }
    }
}

fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(mapping) => Value::Object(
            mapping
                .into_iter()
                .map(|(k, v)| (yaml_key(k), yaml_to_json(v)))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

// Port numbers and addresses are common keys; everything becomes a string.
fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> ConfigDocument {
        ConfigDocument::from_value(value).unwrap()
    }

    #[test]
    fn single_local_host() {
        let d = doc(json!({"host": {"localhost": ["80/tcp open"]}}));
        assert_eq!(d.host_targets(), vec![Target::host("localhost")]);
        assert!(d.pod_targets().is_empty());
        assert_eq!(d.expected_test_count(), 1);
    }

    #[test]
    fn expected_count_spans_both_sections() {
        let d = doc(json!({
            "host": {"localhost": ["a"], "10.0.0.1": ["b", "c"]},
            "k8s": {"deployment": {"web:frontend": ["d"], "db:postgres": ["e"], "cache": []}}
        }));
        assert_eq!(d.expected_test_count(), 5);
        assert_eq!(d.assertion_count(), 5);
    }

    #[test]
    fn enumeration_follows_document_order() {
        let d = doc(json!({
            "k8s": {"deployment": {"z:last": [], "a:first": []}},
            "host": {"zeta": [], "alpha": []}
        }));
        assert_eq!(
            d.host_targets(),
            vec![Target::host("zeta"), Target::host("alpha")]
        );
        assert_eq!(
            d.pod_targets(),
            vec![Target::pod("z:last"), Target::pod("a:first")]
        );
    }

    #[test]
    fn nested_host_sections_are_found() {
        let d = doc(json!({
            "staging": {"host": {"bastion": ["22/tcp open"]}},
            "host": {"localhost": ["80/tcp open"]}
        }));
        assert_eq!(
            d.host_targets(),
            vec![Target::host("bastion"), Target::host("localhost")]
        );
        let payload = d.resolve(&Target::host("bastion")).unwrap();
        assert_eq!(
            payload.document(),
            &json!({"host": {"_bastion": ["22/tcp open"]}})
        );
    }

    #[test]
    fn duplicate_hosts_count_once_and_first_wins() {
        let d = doc(json!({
            "a": {"host": {"web": ["first"]}},
            "b": {"host": {"web": ["second"]}}
        }));
        assert_eq!(d.expected_test_count(), 1);
        let payload = d.resolve(&Target::host("web")).unwrap();
        assert_eq!(payload.document(), &json!({"host": {"_web": ["first"]}}));
    }

    #[test]
    fn host_sections_inside_k8s_are_ignored() {
        let d = doc(json!({
            "k8s": {"deployment": {"web:frontend": {"host": {"x": []}}}}
        }));
        assert!(d.host_targets().is_empty());
        assert_eq!(d.expected_test_count(), 1);
    }

    #[test]
    fn pod_lookup_is_exact() {
        let d = doc(json!({"k8s": {"deployment": {"web:frontend": ["tcp:80"]}}}));
        assert!(d.resolve(&Target::pod("web:frontend")).is_ok());

        let err = d.resolve(&Target::pod("frontend")).unwrap_err();
        assert!(matches!(err, TargetError::ConfigExtraction { .. }));
    }

    #[test]
    fn missing_host_is_extraction_error() {
        let d = doc(json!({"host": {"localhost": []}}));
        let err = d.resolve(&Target::host("db")).unwrap_err();
        assert!(err.to_string().contains("db"));
    }

    #[test]
    fn zero_cluster_targets_is_not_an_error() {
        let d = doc(json!({"host": {"localhost": []}, "k8s": {}}));
        assert!(d.pod_targets().is_empty());
    }

    #[test]
    fn parses_yaml() {
        let d = ConfigDocument::parse(
            "host:\n  localhost:\n    8.8.8.8: [53]\n    80: open\nk8s:\n  deployment:\n    web:frontend:\n      - tcp:80\n",
        )
        .unwrap();
        assert_eq!(d.expected_test_count(), 2);
        assert_eq!(d.assertion_count(), 3);
        let payload = d.resolve(&Target::host("localhost")).unwrap();
        assert_eq!(
            payload.document(),
            &json!({"host": {"_localhost": {"8.8.8.8": [53], "80": "open"}}})
        );
    }

    #[test]
    fn parses_json() {
        let d = ConfigDocument::parse(r#"{"host": {"localhost": ["80/tcp open"]}}"#).unwrap();
        assert_eq!(d.expected_test_count(), 1);
    }

    #[test]
    fn empty_document_has_no_targets() {
        let d = ConfigDocument::parse("").unwrap();
        assert_eq!(d.expected_test_count(), 0);
    }

    #[test]
    fn rejects_non_mapping_root() {
        let err = ConfigDocument::parse("[1, 2]").unwrap_err();
        assert!(matches!(err, DocumentError::NotAMapping { found: "array" }));
    }

    #[test]
    fn rejects_garbage() {
        let err = ConfigDocument::parse("host: [unclosed").unwrap_err();
        assert!(matches!(err, DocumentError::Parse { .. }));
    }
}
