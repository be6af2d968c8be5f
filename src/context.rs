//! Crate `@context` interpretation
//!
//! [`CrateContextResolver`] turns the `@context` of one crate into a term
//! table, resolving short terms to IRIs and back. Canonical RO-Crate
//! contexts are recognized by their exact `@id` and their bundled term
//! tables loaded; entries defined inline in the crate are kept apart as
//! custom pairs, which are also the only prefixes used for compact IRIs.

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::config::ValidatorConfig;
use crate::node::split_compact_iri;
use crate::vocab::{known_context, known_context_for_version, KnownContext};

#[derive(Debug, Clone)]
pub struct CrateContextResolver {
    raw: Option<Value>,
    context: IndexMap<String, String>,
    context_reversed: HashMap<String, String>,
    custom_pairs: IndexMap<String, String>,
    specification: Option<String>,
    using_fallback: bool,
    errors: Vec<String>,
    fallback_specification: String,
}

impl Default for CrateContextResolver {
    fn default() -> Self {
        Self::new(ValidatorConfig::default().fallback_specification)
    }
}

impl CrateContextResolver {
    pub fn new(fallback_specification: impl Into<String>) -> Self {
        Self {
            raw: None,
            context: IndexMap::new(),
            context_reversed: HashMap::new(),
            custom_pairs: IndexMap::new(),
            specification: None,
            using_fallback: false,
            errors: Vec::new(),
            fallback_specification: fallback_specification.into(),
        }
    }

    /// Build a resolver for a raw `@context` value
    pub fn from_context(raw: &Value, fallback_specification: impl Into<String>) -> Self {
        let mut resolver = Self::new(fallback_specification);
        resolver.setup(raw);
        resolver
    }

    /// Rebuild unless `raw` is structurally equal to the current context
    ///
    /// Returns true when the term tables were rebuilt.
    pub fn update(&mut self, raw: &Value) -> bool {
        if self.is_same_as(raw) {
            return false;
        }
        self.setup(raw);
        true
    }

    pub fn is_same_as(&self, raw: &Value) -> bool {
        self.raw.as_ref() == Some(raw)
    }

    /// Reset all derived state and interpret `raw`
    ///
    /// `raw` may be a string, an object, or an array mixing both. Problems
    /// are recorded in [`errors`](Self::errors) rather than returned.
    pub fn setup(&mut self, raw: &Value) {
        let fallback = std::mem::take(&mut self.fallback_specification);
        *self = Self::new(fallback);
        self.raw = Some(raw.clone());

        let entries: Vec<&Value> = match raw {
            Value::Array(arr) => arr.iter().collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        };

        for entry in entries {
            match entry {
                Value::String(id) => self.use_known_context(id),
                Value::Object(obj) => self.add_inline_entries(obj),
                other => self
                    .errors
                    .push(format!("Unsupported @context entry: {}", other)),
            }
        }

        if self.specification.is_none() {
            if self.errors.is_empty() {
                self.errors.push("No RO-Crate context found".to_string());
            }
            self.apply_fallback();
        }
    }

    fn use_known_context(&mut self, id: &str) {
        match known_context(id) {
            Some(known) => {
                self.specification = Some(known.version.to_string());
                self.add_known_terms(known, true);
            }
            None => self.errors.push(format!(
                "Unknown context '{}', falling back to RO-Crate {}",
                id, self.fallback_specification
            )),
        }
    }

    fn apply_fallback(&mut self) {
        self.using_fallback = true;
        self.specification = Some(self.fallback_specification.clone());
        match known_context_for_version(&self.fallback_specification) {
            Some(known) => self.add_known_terms(known, false),
            None => self.errors.push(format!(
                "Fallback specification {} has no bundled context",
                self.fallback_specification
            )),
        }
    }

    fn add_known_terms(&mut self, known: &KnownContext, overwrite: bool) {
        let doc: Value = match serde_json::from_str(known.document) {
            Ok(doc) => doc,
            Err(e) => {
                self.errors
                    .push(format!("Bundled context {} is unreadable: {}", known.id, e));
                return;
            }
        };
        let terms = match doc.get("@context").and_then(|c| c.as_object()) {
            Some(terms) => terms,
            None => return,
        };
        for (term, value) in terms {
            if let Some(iri) = term_iri(value) {
                if overwrite || !self.context.contains_key(term) {
                    self.add_term(term, iri);
                }
            }
        }
    }

    /// Terms defined in the crate itself
    ///
    /// Absolute IRIs are taken first so compact values can use prefixes
    /// declared anywhere in the same object.
    fn add_inline_entries(&mut self, obj: &serde_json::Map<String, Value>) {
        let mut compact = Vec::new();
        for (key, value) in obj {
            if key == "@vocab" {
                match value.as_str() {
                    Some(id) => self.use_known_context(id),
                    None => self.errors.push("@vocab must be a string".to_string()),
                }
                continue;
            }
            if key.starts_with('@') {
                continue;
            }
            let iri = match term_iri(value) {
                Some(iri) => iri,
                None => {
                    self.errors
                        .push(format!("Custom term '{}' does not define an IRI", key));
                    continue;
                }
            };
            if is_absolute_iri(iri) {
                self.add_custom(key, iri.to_string());
            } else {
                compact.push((key.clone(), iri.to_string()));
            }
        }

        for (key, value) in compact {
            let expanded = split_compact_iri(&value).and_then(|(prefix, suffix)| {
                self.custom_pairs
                    .get(prefix)
                    .map(|ns| format!("{}{}", ns, suffix))
            });
            match expanded {
                Some(iri) => self.add_custom(&key, iri),
                None => self.errors.push(format!(
                    "Custom term '{}' refers to '{}' without a defined prefix",
                    key, value
                )),
            }
        }
    }

    fn add_custom(&mut self, term: &str, iri: String) {
        self.custom_pairs.insert(term.to_string(), iri.clone());
        self.add_term(term, &iri);
    }

    fn add_term(&mut self, term: &str, iri: &str) {
        if let Some(old) = self.context.insert(term.to_string(), iri.to_string()) {
            if old != iri && self.context_reversed.get(&old).map(String::as_str) == Some(term) {
                self.context_reversed.remove(&old);
                // the latest remaining term for the IRI takes over
                if let Some(other) = self.context.iter().rev().find(|(_, v)| **v == old) {
                    let other = other.0.clone();
                    self.context_reversed.insert(old, other);
                }
            }
        }
        self.context_reversed
            .insert(iri.to_string(), term.to_string());
    }

    /// Expand a term to its IRI
    ///
    /// Exact terms are looked up first; a `prefix:suffix` term is expanded
    /// only against the crate's custom pairs.
    pub fn resolve(&self, term: &str) -> Option<String> {
        if let Some(iri) = self.context.get(term) {
            return Some(iri.clone());
        }
        if let Some((prefix, suffix)) = split_compact_iri(term) {
            if let Some(ns) = self.custom_pairs.get(prefix) {
                return Some(format!("{}{}", ns, suffix));
            }
            debug!(term, prefix, "undefined context prefix");
            return None;
        }
        debug!(term, "term not in context");
        None
    }

    /// Compact an IRI to a term or `prefix:suffix`
    ///
    /// The first custom pair, in declaration order, whose IRI is a string
    /// prefix of `iri` is used.
    pub fn reverse(&self, iri: &str) -> Option<String> {
        if let Some(term) = self.context_reversed.get(iri) {
            return Some(term.clone());
        }
        self.custom_pairs.iter().find_map(|(prefix, ns)| match iri.strip_prefix(ns.as_str()) {
            Some(rest) if !rest.is_empty() => Some(format!("{}:{}", prefix, rest)),
            _ => None,
        })
    }

    pub fn raw(&self) -> Option<&Value> {
        self.raw.as_ref()
    }

    pub fn terms(&self) -> &IndexMap<String, String> {
        &self.context
    }

    pub fn custom_pairs(&self) -> &IndexMap<String, String> {
        &self.custom_pairs
    }

    pub fn specification(&self) -> Option<&str> {
        self.specification.as_deref()
    }

    pub fn using_fallback(&self) -> bool {
        self.using_fallback
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn fallback_specification(&self) -> &str {
        &self.fallback_specification
    }
}

fn term_iri(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(def) => def.get("@id").and_then(|v| v.as_str()),
        _ => None,
    }
}

fn is_absolute_iri(value: &str) -> bool {
    match url::Url::parse(value) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https" | "urn" | "mailto" | "arcp" | "file")
                || split_compact_iri(value).is_none()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ROCRATE_11: &str = "https://w3id.org/ro/crate/1.1/context";

    #[test]
    fn test_known_context_resolves_schema_terms() {
        let resolver = CrateContextResolver::from_context(&json!(ROCRATE_11), "1.1");
        assert_eq!(
            resolver.resolve("Organization").as_deref(),
            Some("https://schema.org/Organization")
        );
        assert_eq!(resolver.specification(), Some("1.1"));
        assert!(!resolver.using_fallback());
        assert!(resolver.errors().is_empty());
        assert!(resolver.custom_pairs().is_empty());
    }

    #[test]
    fn test_unknown_context_falls_back() {
        let resolver =
            CrateContextResolver::from_context(&json!("https://example.org/my-context"), "1.2");
        assert!(resolver.using_fallback());
        assert!(!resolver.errors().is_empty());
        assert_eq!(resolver.specification(), Some("1.2"));
        // fallback terms are still usable
        assert_eq!(
            resolver.resolve("Person").as_deref(),
            Some("https://schema.org/Person")
        );
    }

    #[test]
    fn test_missing_context_falls_back() {
        let resolver = CrateContextResolver::from_context(&Value::Null, "1.1");
        assert!(resolver.using_fallback());
        assert_eq!(resolver.errors().len(), 1);
    }

    #[test]
    fn test_vocab_selects_known_context() {
        let resolver = CrateContextResolver::from_context(&json!({"@vocab": ROCRATE_11}), "1.2");
        assert_eq!(resolver.specification(), Some("1.1"));
        assert!(!resolver.using_fallback());
    }

    #[test]
    fn test_custom_pairs() {
        let resolver = CrateContextResolver::from_context(
            &json!([
                ROCRATE_11,
                {
                    "Widget": "ex:Widget",
                    "ex": "https://example.org/terms/",
                    "colour": {"@id": "https://example.org/terms/colour", "@type": "@id"}
                }
            ]),
            "1.1",
        );
        assert!(resolver.errors().is_empty());
        assert_eq!(resolver.custom_pairs().len(), 3);
        assert_eq!(
            resolver.resolve("Widget").as_deref(),
            Some("https://example.org/terms/Widget")
        );
        assert_eq!(
            resolver.resolve("ex:Gadget").as_deref(),
            Some("https://example.org/terms/Gadget")
        );
        assert_eq!(
            resolver.reverse("https://example.org/terms/Gizmo").as_deref(),
            Some("ex:Gizmo")
        );
        // compact forms only expand against custom pairs
        assert_eq!(resolver.resolve("schema:Person"), None);
        assert_eq!(resolver.reverse("https://unknown.example/x"), None);
    }

    #[test]
    fn test_prefixless_custom_term_is_an_error() {
        let resolver = CrateContextResolver::from_context(
            &json!([ROCRATE_11, {"myTerm": "notAnIri", "other": "nope:thing"}]),
            "1.1",
        );
        assert_eq!(resolver.errors().len(), 2);
        assert_eq!(resolver.resolve("myTerm"), None);
    }

    #[test]
    fn test_reverse_round_trips() {
        let resolver = CrateContextResolver::from_context(
            &json!([ROCRATE_11, {"ex": "https://example.org/terms/"}]),
            "1.1",
        );
        for iri in resolver.terms().values() {
            let term = resolver.reverse(iri).unwrap();
            assert_eq!(resolver.resolve(&term).as_deref(), Some(iri.as_str()));
        }
    }

    #[test]
    fn test_overridden_term_keeps_reverse_consistent() {
        let resolver = CrateContextResolver::from_context(
            &json!([ROCRATE_11, {"name": "https://example.org/terms/title"}]),
            "1.1",
        );
        assert_eq!(
            resolver.resolve("name").as_deref(),
            Some("https://example.org/terms/title")
        );
        assert_eq!(resolver.reverse("https://schema.org/name"), None);
        assert_eq!(
            resolver.reverse("https://example.org/terms/title").as_deref(),
            Some("name")
        );
    }

    #[test]
    fn test_reverse_accepts_namespace_without_separator() {
        let resolver = CrateContextResolver::from_context(
            &json!([ROCRATE_11, {"ex": "https://example.org/terms"}]),
            "1.1",
        );
        let iri = resolver.resolve("ex:Foo").unwrap();
        assert_eq!(iri, "https://example.org/termsFoo");
        assert_eq!(resolver.reverse(&iri).as_deref(), Some("ex:Foo"));
        // the namespace alone is not compacted to an empty suffix
        assert_eq!(
            resolver.reverse("https://example.org/terms").as_deref(),
            Some("ex")
        );
    }

    #[test]
    fn test_reverse_prefers_latest_remaining_term() {
        let resolver = CrateContextResolver::from_context(
            &json!([
                ROCRATE_11,
                {
                    "a": "https://example.org/x",
                    "b": "https://example.org/x",
                    "c": "https://example.org/x"
                },
                {"c": "https://example.org/y"}
            ]),
            "1.1",
        );
        assert_eq!(resolver.reverse("https://example.org/x").as_deref(), Some("b"));
        assert_eq!(resolver.reverse("https://example.org/y").as_deref(), Some("c"));
    }

    #[test]
    fn test_update_is_noop_for_equal_context() {
        let raw = json!([ROCRATE_11, {"ex": "https://example.org/"}]);
        let mut resolver = CrateContextResolver::from_context(&raw, "1.1");
        assert!(resolver.is_same_as(&raw.clone()));
        assert!(!resolver.update(&raw));
        assert!(resolver.update(&json!(ROCRATE_11)));
        assert!(resolver.custom_pairs().is_empty());
    }
}
