//! Vocabulary-backed rules
//!
//! Types and properties are expanded through the crate context and looked
//! up in the vocabulary. Lookups into a namespace no registered schema
//! provides are skipped rather than reported.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::{expanded_types, position, skip_unsupported};
use crate::engine::{EntityRule, PropertyRule, Rule, RuleModule, ValidationContext};
use crate::entity::{as_list, classify_id, extract_types, reference_id, IdKind};
use crate::error::{Result, ValidateError};
use crate::node::VocabularyNode;
use crate::result::ValidationResult;
use crate::vocab::{SCHEMA_DATE, SCHEMA_DATE_TIME, SCHEMA_ORG_NS};

pub fn module() -> RuleModule {
    RuleModule {
        name: "schema",
        build: |_| {
            vec![
                Rule::Entity(Arc::new(UnknownType)),
                Rule::Property(Arc::new(UnknownProperty)),
                Rule::Property(Arc::new(BrokenReference)),
                Rule::Property(Arc::new(ReferenceTypeMismatch)),
                Rule::Property(Arc::new(InvalidDate)),
            ]
        },
    }
}

/// Look up a node, treating unsupported namespaces as unknown-but-fine
async fn lookup(ctx: &ValidationContext, iri: &str) -> Result<Option<Option<Arc<VocabularyNode>>>> {
    skip_unsupported(ctx.vocabulary.get_node(iri).await)
}

/// Vocabulary node of a crate property, if it resolves to a known property
async fn property_node(ctx: &ValidationContext, property: &str) -> Result<Option<Arc<VocabularyNode>>> {
    let Some(iri) = ctx.expand_term(property) else {
        return Ok(None);
    };
    match lookup(ctx, &iri).await? {
        Some(Some(node)) if node.is_property() => Ok(Some(node)),
        _ => Ok(None),
    }
}

/// Expanded type IRIs of an entity that are known classes
async fn entity_classes(ctx: &ValidationContext, entity: &Value) -> Result<Vec<String>> {
    let mut classes = Vec::new();
    for iri in expanded_types(ctx, entity) {
        if let Some(Some(node)) = lookup(ctx, &iri).await? {
            if node.is_class() {
                classes.push(iri);
            }
        }
    }
    Ok(classes)
}

pub struct UnknownType;

#[async_trait]
impl EntityRule for UnknownType {
    fn name(&self) -> &'static str {
        "unknownType"
    }

    async fn check(
        &self,
        ctx: &ValidationContext,
        _entity_id: &str,
        entity: &Value,
    ) -> Result<Vec<ValidationResult>> {
        let mut results = Vec::new();
        let types = extract_types(entity);
        for (i, term) in types.iter().enumerate() {
            let index = (types.len() > 1).then_some(i);
            let with_index = |r: ValidationResult| match index {
                Some(i) => r.property("@type").index(i),
                None => r.property("@type"),
            };

            let Some(iri) = ctx.expand_term(term) else {
                results.push(with_index(ValidationResult::warning(
                    "Undefined type",
                    format!("The type <code>{}</code> is not defined in the crate context", term),
                )));
                continue;
            };
            match lookup(ctx, &iri).await? {
                None => debug!(iri = %iri, "type in unsupported namespace, skipping"),
                Some(None) => results.push(with_index(ValidationResult::soft_warning(
                    "Unknown type",
                    format!("The type <code>{}</code> was not found in any loaded vocabulary", iri),
                ))),
                Some(Some(node)) if !node.is_class() => results.push(with_index(ValidationResult::warning(
                    "Type is not a class",
                    format!("<code>{}</code> is used as a type but is not a class", iri),
                ))),
                Some(Some(_)) => {}
            }
        }
        Ok(results)
    }
}

pub struct UnknownProperty;

#[async_trait]
impl PropertyRule for UnknownProperty {
    fn name(&self) -> &'static str {
        "unknownProperty"
    }

    async fn check(
        &self,
        ctx: &ValidationContext,
        _entity_id: &str,
        entity: &Value,
        property: &str,
        _value: &Value,
    ) -> Result<Vec<ValidationResult>> {
        let Some(iri) = ctx.expand_term(property) else {
            return Ok(vec![ValidationResult::warning(
                "Undefined property",
                format!(
                    "The property <code>{}</code> is not defined in the crate context and will be dropped by JSON-LD processors",
                    property
                ),
            )]);
        };

        let node = match lookup(ctx, &iri).await? {
            None => return Ok(vec![]),
            Some(None) => {
                return Ok(vec![ValidationResult::soft_warning(
                    "Unknown property",
                    format!("The property <code>{}</code> was not found in any loaded vocabulary", iri),
                )])
            }
            Some(Some(node)) => node,
        };
        if !node.is_property() {
            return Ok(vec![ValidationResult::warning(
                "Not a property",
                format!("<code>{}</code> is used as a property but is not one", iri),
            )]);
        }

        let classes = entity_classes(ctx, entity).await?;
        if classes.is_empty() {
            return Ok(vec![]);
        }
        for class in &classes {
            if ctx.vocabulary.is_property_of_class(&iri, class).await? {
                return Ok(vec![]);
            }
        }
        Ok(vec![ValidationResult::soft_warning(
            "Unexpected property",
            format!(
                "<code>{}</code> is not expected on entities of type {}",
                property,
                classes
                    .iter()
                    .map(|c| format!("<code>{}</code>", c))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        )])
    }
}

pub struct BrokenReference;

#[async_trait]
impl PropertyRule for BrokenReference {
    fn name(&self) -> &'static str {
        "brokenReference"
    }

    async fn check(
        &self,
        ctx: &ValidationContext,
        _entity_id: &str,
        _entity: &Value,
        property: &str,
        value: &Value,
    ) -> Result<Vec<ValidationResult>> {
        let mut results = Vec::new();
        for (i, item) in as_list(value).into_iter().enumerate() {
            let Some(target) = reference_id(item) else {
                continue;
            };
            if ctx.entities.contains_key(target) {
                continue;
            }

            let issue = match classify_id(target) {
                _ if target.is_empty() => Some(ValidationResult::error(
                    "Empty reference",
                    format!("<code>{}</code> references an empty <code>@id</code>", property),
                )),
                IdKind::Absolute if target.starts_with("http") => match url::Url::parse(target) {
                    Ok(_) => None,
                    Err(e) => Some(ValidationResult::error(
                        "Invalid URL",
                        format!("<code>{}</code> is not a valid URL: {}", target, e),
                    )),
                },
                IdKind::Absolute => None,
                IdKind::Relative => Some(ValidationResult::warning(
                    "Undescribed reference",
                    format!(
                        "<code>{}</code> is referenced but not described in the crate",
                        target
                    ),
                )),
                IdKind::Fragment | IdKind::Root | IdKind::MetadataDescriptor => {
                    Some(ValidationResult::error(
                        "Broken reference",
                        format!("<code>{}</code> does not exist in the crate", target),
                    ))
                }
            };
            if let Some(result) = issue {
                results.push(match position(value, i) {
                    Some(index) => result.index(index),
                    None => result,
                });
            }
        }
        Ok(results)
    }
}

pub struct ReferenceTypeMismatch;

#[async_trait]
impl PropertyRule for ReferenceTypeMismatch {
    fn name(&self) -> &'static str {
        "referenceTypeMismatch"
    }

    async fn check(
        &self,
        ctx: &ValidationContext,
        _entity_id: &str,
        _entity: &Value,
        property: &str,
        value: &Value,
    ) -> Result<Vec<ValidationResult>> {
        let local_targets: Vec<(usize, &Value)> = as_list(value)
            .into_iter()
            .enumerate()
            .filter_map(|(i, item)| reference_id(item).map(|id| (i, id)))
            .filter_map(|(i, id)| ctx.entities.get(id).map(|target| (i, target)))
            .collect();
        if local_targets.is_empty() {
            return Ok(vec![]);
        }

        let Some(node) = property_node(ctx, property).await? else {
            return Ok(vec![]);
        };
        let range: Vec<String> = node.range().into_iter().map(String::from).collect();
        // a URL range admits a link to anything
        let url = format!("{}URL", SCHEMA_ORG_NS);
        if range.is_empty() || range.contains(&url) {
            return Ok(vec![]);
        }

        let mut allowed: HashSet<String> = range.iter().cloned().collect();
        for class in &range {
            match ctx.vocabulary.get_sub_classes(class).await {
                Ok(subclasses) => allowed.extend(subclasses),
                Err(ValidateError::UnsupportedNamespace(_) | ValidateError::NotAClass(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let mut results = Vec::new();
        for (i, target) in local_targets {
            let types = expanded_types(ctx, target);
            if types.is_empty() || types.iter().any(|t| allowed.contains(t)) {
                continue;
            }
            let target_id = target.get("@id").and_then(|v| v.as_str()).unwrap_or_default();
            let result = ValidationResult::warning(
                "Reference type mismatch",
                format!(
                    "<code>{}</code> should reference one of {}, but <code>{}</code> is a {}",
                    property,
                    range.join(", "),
                    target_id,
                    types.join(", ")
                ),
            );
            results.push(match position(value, i) {
                Some(index) => result.index(index),
                None => result,
            });
        }
        Ok(results)
    }
}

static YEAR_OR_MONTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}(-(0[1-9]|1[0-2]))?$").expect("valid regex pattern"));
static MINUTE_PRECISION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2})(Z|[+-]\d{2}:\d{2})?$").expect("valid regex pattern")
});
static BASIC_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})$").expect("valid regex pattern"));

/// ISO 8601 date or date-time
///
/// Accepts extended dates and date-times (seconds optional), basic-format
/// calendar dates (`20240101`) and reduced year or year-month precision.
/// Basic-format times and week or ordinal dates are rejected.
pub fn is_iso8601_date(value: &str) -> bool {
    is_extended(value)
        || MINUTE_PRECISION.captures(value).is_some_and(|caps| {
            let offset = caps.get(2).map_or("", |m| m.as_str());
            is_extended(&format!("{}:00{}", &caps[1], offset))
        })
        || BASIC_DATE.captures(value).is_some_and(|caps| {
            match (caps[1].parse::<i32>(), caps[2].parse::<u32>(), caps[3].parse::<u32>()) {
                (Ok(y), Ok(m), Ok(d)) => NaiveDate::from_ymd_opt(y, m, d).is_some(),
                _ => false,
            }
        })
        || YEAR_OR_MONTH.is_match(value)
}

fn is_extended(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

pub struct InvalidDate;

#[async_trait]
impl PropertyRule for InvalidDate {
    fn name(&self) -> &'static str {
        "invalidDate"
    }

    async fn check(
        &self,
        ctx: &ValidationContext,
        _entity_id: &str,
        _entity: &Value,
        property: &str,
        value: &Value,
    ) -> Result<Vec<ValidationResult>> {
        let Some(node) = property_node(ctx, property).await? else {
            return Ok(vec![]);
        };
        let range = node.range();
        let dates_only = !range.is_empty()
            && range
                .iter()
                .all(|r| *r == SCHEMA_DATE || *r == SCHEMA_DATE_TIME);
        if !dates_only {
            return Ok(vec![]);
        }

        let mut results = Vec::new();
        for (i, item) in as_list(value).into_iter().enumerate() {
            let text = match item {
                Value::String(s) => Some(s.as_str()),
                Value::Object(obj) => obj.get("@value").and_then(|v| v.as_str()),
                _ => None,
            };
            if text.is_some_and(is_iso8601_date) {
                continue;
            }
            let shown = text.map(String::from).unwrap_or_else(|| item.to_string());
            let result = ValidationResult::warning(
                "Invalid date",
                format!(
                    "<code>{}</code> must be an ISO 8601 date, got <code>{}</code>",
                    property, shown
                ),
            );
            results.push(match position(value, i) {
                Some(index) => result.index(index),
                None => result,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LocalClient;
    use crate::engine::{ValidationEngine, ValidationReport};
    use crate::graph::tests::{schema_graph, schema_graph_with_borrowed_prefixes};
    use crate::graph::VocabularyGraph;
    use crate::result::Severity;
    use serde_json::json;

    async fn validate(graph: Vec<Value>) -> ValidationReport {
        validate_against(schema_graph(), graph).await
    }

    async fn validate_against(vocabulary: VocabularyGraph, graph: Vec<Value>) -> ValidationReport {
        let client = Arc::new(LocalClient::new(Arc::new(vocabulary)));
        let document = json!({
            "@context": "https://w3id.org/ro/crate/1.1/context",
            "@graph": graph
        });
        let ctx = ValidationContext::new(document, client, "1.1");
        ValidationEngine::new(vec![module()]).validate(&ctx).await
    }

    fn descriptor() -> Value {
        json!({
            "@id": "ro-crate-metadata.json",
            "@type": "CreativeWork",
            "about": {"@id": "./"},
            "conformsTo": {"@id": "https://w3id.org/ro/crate/1.1"}
        })
    }

    #[test]
    fn test_iso8601_dates() {
        assert!(is_iso8601_date("2024-02-29"));
        assert!(is_iso8601_date("2024-02-29T10:00:00Z"));
        assert!(is_iso8601_date("2024-02-29T10:00:00+01:00"));
        assert!(is_iso8601_date("2024-02-29T10:00:00"));
        assert!(is_iso8601_date("2024"));
        assert!(is_iso8601_date("2024-06"));
        assert!(!is_iso8601_date("2023-02-29"));
        assert!(!is_iso8601_date("last tuesday"));
        assert!(!is_iso8601_date("2024-13"));
    }

    #[test]
    fn test_iso8601_minute_precision_and_basic_dates() {
        assert!(is_iso8601_date("2024-01-01T10:00Z"));
        assert!(is_iso8601_date("2024-01-01T10:00+02:00"));
        assert!(is_iso8601_date("2024-01-01T10:00"));
        assert!(is_iso8601_date("20240101"));
        assert!(!is_iso8601_date("20240230"));
        assert!(!is_iso8601_date("2024-01-01T25:00Z"));
    }

    #[tokio::test]
    async fn test_valid_crate_has_no_schema_issues() {
        let report = validate(vec![
            descriptor(),
            json!({
                "@id": "./",
                "@type": "Dataset",
                "name": "Example",
                "datePublished": "2024-01-01",
                "author": {"@id": "#alice"},
                "hasPart": [{"@id": "data.csv"}],
                "license": {"@id": "https://spdx.org/licenses/MIT"}
            }),
            json!({"@id": "#alice", "@type": "Person", "name": "Alice"}),
            json!({"@id": "data.csv", "@type": "File", "name": "Data", "contentSize": "12"}),
        ])
        .await;
        assert!(report.results.is_empty(), "{:?}", report.results);
        assert!(report.failed_rules.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_undefined_types() {
        let report = validate(vec![json!({
            "@id": "#x",
            "@type": ["Person", "Spaceship", "name", "https://schema.org/Unicorn"]
        })])
        .await;
        let found = report.for_rule("unknownType");
        let titles: Vec<(&str, Option<usize>)> = found
            .iter()
            .map(|r| (r.title.as_str(), r.property_index))
            .collect();
        assert!(titles.contains(&("Undefined type", Some(1))));
        assert!(titles.contains(&("Type is not a class", Some(2))));
        assert!(titles.contains(&("Unknown type", Some(3))));
        assert_eq!(found.len(), 3);
    }

    #[tokio::test]
    async fn test_properties_checked_against_domain() {
        let report = validate(vec![json!({
            "@id": "#bob",
            "@type": "Person",
            "name": "Bob",
            "affiliation": {"@id": "https://example.org/org"},
            "contentSize": "3",
            "notATerm": true
        })])
        .await;
        let found = report.for_rule("unknownProperty");
        let by_property = |name: &str| {
            found
                .iter()
                .find(|r| r.property_name.as_deref() == Some(name))
                .map(|r| (r.title.clone(), r.severity))
        };
        assert_eq!(
            by_property("contentSize"),
            Some(("Unexpected property".to_string(), Severity::SoftWarning))
        );
        assert_eq!(
            by_property("notATerm"),
            Some(("Undefined property".to_string(), Severity::Warning))
        );
        assert_eq!(by_property("name"), None);
        assert_eq!(by_property("affiliation"), None);
    }

    #[tokio::test]
    async fn test_inherited_subproperty_is_accepted() {
        // creator is a subproperty of author, which CreativeWork declares
        let report = validate(vec![
            json!({"@id": "#work", "@type": "CreativeWork", "creator": {"@id": "#carol"}}),
            json!({"@id": "#carol", "@type": "Person", "name": "Carol"}),
        ])
        .await;
        assert!(report.for_rule("unknownProperty").is_empty());
    }

    #[tokio::test]
    async fn test_broken_references() {
        let report = validate(vec![json!({
            "@id": "#work",
            "@type": "CreativeWork",
            "hasPart": [{"@id": "#missing"}, {"@id": "notes.txt"}, {"@id": "https://example.org/x"}],
            "about": {"@id": "https://exa mple.org"}
        })])
        .await;
        let found = report.for_rule("brokenReference");
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].severity, Severity::Error);
        let missing = found
            .iter()
            .find(|r| r.title == "Broken reference")
            .unwrap();
        assert_eq!(missing.property_index, Some(0));
        assert!(found
            .iter()
            .any(|r| r.title == "Undescribed reference" && r.property_index == Some(1)));
        assert!(found
            .iter()
            .any(|r| r.title == "Invalid URL" && r.property_index.is_none()));
    }

    #[tokio::test]
    async fn test_reference_type_mismatch_uses_subclasses() {
        let report = validate(vec![
            json!({
                "@id": "#work",
                "@type": "CreativeWork",
                "author": [{"@id": "#org"}, {"@id": "#paper"}],
                "hasPart": {"@id": "#dataset"}
            }),
            json!({"@id": "#org", "@type": "Organization", "name": "Org"}),
            json!({"@id": "#paper", "@type": "CreativeWork", "name": "Paper"}),
            json!({"@id": "#dataset", "@type": "Dataset", "name": "Nested"}),
        ])
        .await;
        let found = report.for_rule("referenceTypeMismatch");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].property_name.as_deref(), Some("author"));
        assert_eq!(found[0].property_index, Some(1));
    }

    #[tokio::test]
    async fn test_invalid_dates() {
        let report = validate(vec![json!({
            "@id": "#work",
            "@type": "CreativeWork",
            "name": "2024-99-99",
            "datePublished": ["2024-05-01", "yesterday", 2024]
        })])
        .await;
        let found = report.for_rule("invalidDate");
        let indexes: Vec<Option<usize>> = found.iter().map(|r| r.property_index).collect();
        assert_eq!(indexes, vec![Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn test_unsupported_namespace_is_skipped() {
        let report = validate(vec![json!({
            "@id": "#t",
            "@type": "http://purl.org/dc/terms/Agent",
            "name": "T",
            "http://purl.org/dc/terms/title": "x"
        })])
        .await;
        assert!(report.for_rule("unknownType").is_empty());
        assert!(report.for_rule("unknownProperty").is_empty());
        assert!(report.failed_rules.is_empty());
    }

    #[tokio::test]
    async fn test_borrowed_prefix_does_not_flag_descriptor_terms() {
        let report = validate_against(
            schema_graph_with_borrowed_prefixes(),
            vec![
                descriptor(),
                json!({"@id": "./", "@type": "Dataset", "name": "Example", "datePublished": "2024"}),
            ],
        )
        .await;
        assert!(report.for_rule("unknownProperty").is_empty(), "{:?}", report.results);
        assert!(report.failed_rules.is_empty());
    }
}
