//! Normalized vocabulary nodes
//!
//! A [`VocabularyNode`] is one class or property of a vocabulary document,
//! with every compact IRI in its values expanded against the defining
//! document's own prefix table.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::entity::{as_list, reference_id};
use crate::error::{Result, ValidateError};
use crate::vocab::{RDFS_CLASS, RDF_PROPERTY};

/// Prefix -> namespace IRI
pub type PrefixTable = HashMap<String, String>;

static COMPACT_IRI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_.\-]*):([^/].*|)$").expect("valid regex pattern"));

/// Split a `prefix:suffix` string into its parts
///
/// Absolute IRIs (`https://...`) and keywords do not match.
pub fn split_compact_iri(value: &str) -> Option<(&str, &str)> {
    let caps = COMPACT_IRI.captures(value)?;
    let prefix = caps.get(1)?.as_str();
    let suffix = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    Some((prefix, suffix))
}

/// Expand a compact IRI against a prefix table, if its prefix is known
pub fn expand_compact_iri(value: &str, prefixes: &PrefixTable) -> Option<String> {
    let (prefix, suffix) = split_compact_iri(value)?;
    prefixes.get(prefix).map(|ns| format!("{}{}", ns, suffix))
}

/// Classification of a node by its `@type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Class,
    Property,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VocabularyNode {
    id: String,
    types: Vec<String>,
    data: Map<String, Value>,
}

impl VocabularyNode {
    /// Normalize a raw JSON-LD node against its source document's prefixes
    ///
    /// String values matching `prefix:suffix` are expanded recursively.
    /// Keys are never rewritten, and `$`-prefixed sidecar entries are copied
    /// as-is.
    pub fn from_raw(raw: &Value, prefixes: &PrefixTable) -> Result<Self> {
        let obj = raw.as_object().ok_or_else(|| ValidateError::InvalidSchema {
            source_id: String::new(),
            reason: "graph node is not an object".to_string(),
        })?;

        let data: Map<String, Value> = obj
            .iter()
            .map(|(key, v)| expand_entry(key, v, prefixes))
            .collect();

        let id = data
            .get("@id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ValidateError::InvalidSchema {
                source_id: String::new(),
                reason: "graph node is missing @id".to_string(),
            })?;

        let types = match data.get("@type") {
            Some(Value::String(t)) => vec![t.clone()],
            Some(Value::Array(arr)) => arr
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => vec![],
        };

        Ok(Self { id, types, data })
    }

    /// Rebuild a node from its [`to_json`](Self::to_json) form
    pub fn from_expanded(value: &Value) -> Result<Self> {
        Self::from_raw(value, &PrefixTable::new())
    }

    /// The expanded node as JSON
    pub fn to_json(&self) -> Value {
        Value::Object(self.data.clone())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn types(&self) -> &[String] {
        &self.types
    }

    pub fn kind(&self) -> NodeKind {
        if self.is_class() {
            NodeKind::Class
        } else if self.is_property() {
            NodeKind::Property
        } else {
            NodeKind::Other
        }
    }

    pub fn is_class(&self) -> bool {
        self.types.iter().any(|t| t == RDFS_CLASS)
    }

    pub fn is_property(&self) -> bool {
        self.types.iter().any(|t| t == RDF_PROPERTY)
    }

    /// Raw (expanded) value stored under a key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Human-readable description from `rdfs:comment` or `skos:definition`
    pub fn comment(&self) -> Option<&str> {
        ["comment", "definition"].iter().find_map(|local| {
            self.values_for(local)
                .into_iter()
                .find_map(|v| match v {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(obj) => obj.get("@value").and_then(|v| v.as_str()),
                    _ => None,
                })
        })
    }

    pub fn parent_classes(&self) -> Vec<&str> {
        self.references_for(&["subClassOf"])
    }

    pub fn parent_properties(&self) -> Vec<&str> {
        self.references_for(&["subPropertyOf"])
    }

    /// Classes this property may be declared on
    pub fn domain(&self) -> Vec<&str> {
        self.references_for(&["domainIncludes", "domain"])
    }

    /// Classes or datatypes this property may hold
    pub fn range(&self) -> Vec<&str> {
        self.references_for(&["rangeIncludes", "range"])
    }

    /// All values stored under keys whose local name is `local`
    fn values_for(&self, local: &str) -> Vec<&Value> {
        self.data
            .iter()
            .filter(|(key, _)| key_has_local_name(key, local))
            .flat_map(|(_, value)| as_list(value))
            .collect()
    }

    fn references_for(&self, locals: &[&str]) -> Vec<&str> {
        locals
            .iter()
            .flat_map(|local| self.values_for(local))
            .filter_map(|v| reference_id(v).or_else(|| v.as_str()))
            .collect()
    }
}

/// Match a provider-prefixed or fully expanded key by its local name
fn key_has_local_name(key: &str, local: &str) -> bool {
    key == local
        || [':', '#', '/']
            .iter()
            .any(|sep| key.strip_suffix(local).is_some_and(|rest| rest.ends_with(*sep)))
}

fn expand_values(value: &Value, prefixes: &PrefixTable) -> Value {
    match value {
        Value::String(s) => match expand_compact_iri(s, prefixes) {
            Some(expanded) => Value::String(expanded),
            None => value.clone(),
        },
        Value::Array(arr) => Value::Array(arr.iter().map(|v| expand_values(v, prefixes)).collect()),
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(key, v)| expand_entry(key, v, prefixes))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn expand_entry(key: &str, value: &Value, prefixes: &PrefixTable) -> (String, Value) {
    if key.starts_with('$') {
        (key.to_string(), value.clone())
    } else {
        (key.to_string(), expand_values(value, prefixes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prefixes() -> PrefixTable {
        let mut table = PrefixTable::new();
        table.insert("schema".into(), "https://schema.org/".into());
        table.insert("rdfs".into(), "http://www.w3.org/2000/01/rdf-schema#".into());
        table.insert("rdf".into(), "http://www.w3.org/1999/02/22-rdf-syntax-ns#".into());
        table
    }

    #[test]
    fn test_split_compact_iri() {
        assert_eq!(split_compact_iri("schema:Person"), Some(("schema", "Person")));
        assert_eq!(split_compact_iri("https://schema.org/Person"), None);
        assert_eq!(split_compact_iri("Person"), None);
    }

    #[test]
    fn test_class_node() {
        let raw = json!({
            "@id": "schema:Person",
            "@type": "rdfs:Class",
            "rdfs:comment": "A person (alive, dead, undead, or fictional).",
            "rdfs:subClassOf": {"@id": "schema:Thing"}
        });
        let node = VocabularyNode::from_raw(&raw, &prefixes()).unwrap();
        assert_eq!(node.id(), "https://schema.org/Person");
        assert!(node.is_class());
        assert_eq!(node.kind(), NodeKind::Class);
        assert_eq!(node.parent_classes(), vec!["https://schema.org/Thing"]);
        assert!(node.comment().unwrap().starts_with("A person"));
        // keys stay provider-prefixed
        assert!(node.get("rdfs:subClassOf").is_some());
    }

    #[test]
    fn test_property_node_domain_range() {
        let raw = json!({
            "@id": "schema:author",
            "@type": "rdf:Property",
            "schema:domainIncludes": [{"@id": "schema:CreativeWork"}, {"@id": "schema:Rating"}],
            "schema:rangeIncludes": {"@id": "schema:Person"}
        });
        let node = VocabularyNode::from_raw(&raw, &prefixes()).unwrap();
        assert!(node.is_property());
        assert_eq!(
            node.domain(),
            vec!["https://schema.org/CreativeWork", "https://schema.org/Rating"]
        );
        assert_eq!(node.range(), vec!["https://schema.org/Person"]);
    }

    #[test]
    fn test_sidecar_and_unknown_prefix_untouched() {
        let raw = json!({
            "@id": "ex:thing",
            "@type": "rdf:Property",
            "$validation": {"pattern": "schema:notExpanded"},
            "note": "http://example.org/keep"
        });
        let node = VocabularyNode::from_raw(&raw, &prefixes()).unwrap();
        assert_eq!(node.id(), "ex:thing");
        assert_eq!(
            node.get("$validation"),
            Some(&json!({"pattern": "schema:notExpanded"}))
        );
        assert_eq!(node.get("note"), Some(&json!("http://example.org/keep")));
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let raw = json!({"@type": "rdfs:Class"});
        assert!(VocabularyNode::from_raw(&raw, &prefixes()).is_err());
    }
}
