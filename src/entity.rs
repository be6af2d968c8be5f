//! Entity helpers for RO-Crate graphs
//!
//! Walking a crate's `@graph`, classifying entity `@id`s and reading
//! property values with a uniform list view.

use indexmap::IndexMap;
use serde_json::Value;

use crate::vocab::{METADATA_DESCRIPTOR_ID, METADATA_DESCRIPTOR_JSONLD_ID, ROOT_ENTITY_ID};

/// Entities of one crate keyed by `@id`, in graph order
pub type EntityMap = IndexMap<String, Value>;

/// Classification of an entity @id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdKind {
    /// Root entity: "./"
    Root,
    /// Relative path: "./foo", "./foo/bar", "foo/bar"
    Relative,
    /// Fragment identifier: "#person1", "#ctx-1"
    Fragment,
    /// Absolute URI: "https://...", "http://...", "urn:..."
    Absolute,
    /// Metadata descriptor: "ro-crate-metadata.json" or variants
    MetadataDescriptor,
}

/// Classify an @id string
pub fn classify_id(id: &str) -> IdKind {
    if id == ROOT_ENTITY_ID {
        IdKind::Root
    } else if is_metadata_descriptor_id(id) {
        IdKind::MetadataDescriptor
    } else if id.starts_with('#') {
        IdKind::Fragment
    } else if id.starts_with("http://")
        || id.starts_with("https://")
        || id.starts_with("urn:")
        || id.starts_with("mailto:")
        || id.starts_with("arcp:")
    {
        IdKind::Absolute
    } else {
        IdKind::Relative
    }
}

/// Check if an @id names the metadata descriptor
pub fn is_metadata_descriptor_id(id: &str) -> bool {
    id == METADATA_DESCRIPTOR_ID || id == METADATA_DESCRIPTOR_JSONLD_ID
}

/// Extract @id from an entity
pub fn extract_id(entity: &Value) -> Option<&str> {
    entity.get("@id").and_then(|v| v.as_str())
}

/// Extract @type as a list of type names
pub fn extract_types(entity: &Value) -> Vec<String> {
    match entity.get("@type") {
        Some(Value::String(t)) => vec![t.clone()],
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => vec![],
    }
}

/// View a property value as a list regardless of its cardinality
pub fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(arr) => arr.iter().collect(),
        Value::Null => vec![],
        other => vec![other],
    }
}

/// Return the target id when a value is an `{"@id": ...}` reference
pub fn reference_id(value: &Value) -> Option<&str> {
    match value {
        Value::Object(obj) => obj.get("@id").and_then(|v| v.as_str()),
        _ => None,
    }
}

/// Iterate the non-keyword properties of an entity
pub fn properties(entity: &Value) -> impl Iterator<Item = (&String, &Value)> {
    entity
        .as_object()
        .into_iter()
        .flat_map(|obj| obj.iter())
        .filter(|(key, _)| !key.starts_with('@'))
}

/// Build the entity map from a crate document's `@graph`
///
/// Entities without a string `@id` are skipped. A later duplicate @id
/// replaces an earlier one but keeps its original position.
pub fn entity_map(document: &Value) -> EntityMap {
    let mut map = EntityMap::new();
    let graph = match document.get("@graph").and_then(|g| g.as_array()) {
        Some(g) => g,
        None => return map,
    };
    for entity in graph {
        if let Some(id) = extract_id(entity) {
            map.insert(id.to_string(), entity.clone());
        }
    }
    map
}

/// Find the metadata descriptor among the crate's entities
pub fn find_metadata_descriptor(entities: &EntityMap) -> Option<&Value> {
    entities
        .get(METADATA_DESCRIPTOR_ID)
        .or_else(|| entities.get(METADATA_DESCRIPTOR_JSONLD_ID))
}

/// Resolve the root entity id via the descriptor's `about` reference
pub fn root_entity_id(entities: &EntityMap) -> Option<&str> {
    let descriptor = find_metadata_descriptor(entities)?;
    let about = descriptor.get("about")?;
    as_list(about).into_iter().find_map(reference_id)
}
