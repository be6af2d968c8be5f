//! Rule-based validation engine
//!
//! A pass takes an immutable [`ValidationContext`] snapshot of one crate and
//! runs every rule of every registered [`RuleModule`] against it: crate
//! rules once, entity rules once per entity and property rules once per
//! (entity, property) pair. A rule that returns `Err` or panics contributes
//! no results for that subject and is listed in
//! [`ValidationReport::failed_rules`]; the pass itself always completes.

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{info, warn};

use crate::client::VocabularyClient;
use crate::context::CrateContextResolver;
use crate::entity::{self, EntityMap};
use crate::error::Result;
use crate::result::{sort_results, Severity, ValidationResult};
use crate::storage::StorageBackend;

/// Everything a rule may look at, captured when the pass starts
#[derive(Clone)]
pub struct ValidationContext {
    pub document: Arc<Value>,
    pub entities: Arc<EntityMap>,
    pub context: Arc<CrateContextResolver>,
    pub vocabulary: Arc<dyn VocabularyClient>,
    pub storage: Option<Arc<dyn StorageBackend>>,
}

impl ValidationContext {
    /// Snapshot a crate document, interpreting its `@context`
    pub fn new(
        document: Value,
        vocabulary: Arc<dyn VocabularyClient>,
        fallback_specification: &str,
    ) -> Self {
        let raw_context = document.get("@context").cloned().unwrap_or(Value::Null);
        let context = CrateContextResolver::from_context(&raw_context, fallback_specification);
        Self::with_resolver(document, Arc::new(context), vocabulary)
    }

    /// Snapshot a crate document with an already set-up context
    pub fn with_resolver(
        document: Value,
        context: Arc<CrateContextResolver>,
        vocabulary: Arc<dyn VocabularyClient>,
    ) -> Self {
        Self {
            entities: Arc::new(entity::entity_map(&document)),
            document: Arc::new(document),
            context,
            vocabulary,
            storage: None,
        }
    }

    pub fn with_storage(mut self, storage: Option<Arc<dyn StorageBackend>>) -> Self {
        self.storage = storage;
        self
    }

    /// Expand a term used in the crate to a vocabulary IRI
    ///
    /// http(s) IRIs are taken as-is; anything else goes through the crate
    /// context.
    pub fn expand_term(&self, term: &str) -> Option<String> {
        if term.starts_with("http://") || term.starts_with("https://") {
            return Some(term.to_string());
        }
        self.context.resolve(term)
    }
}

#[async_trait]
pub trait CrateRule: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, ctx: &ValidationContext) -> Result<Vec<ValidationResult>>;
}

#[async_trait]
pub trait EntityRule: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(
        &self,
        ctx: &ValidationContext,
        entity_id: &str,
        entity: &Value,
    ) -> Result<Vec<ValidationResult>>;
}

#[async_trait]
pub trait PropertyRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// `value` is the property's full value; multi-valued properties are
    /// arrays and results carry the offending position as `property_index`
    async fn check(
        &self,
        ctx: &ValidationContext,
        entity_id: &str,
        entity: &Value,
        property: &str,
        value: &Value,
    ) -> Result<Vec<ValidationResult>>;
}

#[derive(Clone)]
pub enum Rule {
    Crate(Arc<dyn CrateRule>),
    Entity(Arc<dyn EntityRule>),
    Property(Arc<dyn PropertyRule>),
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Rule::Crate(r) => r.name(),
            Rule::Entity(r) => r.name(),
            Rule::Property(r) => r.name(),
        }
    }
}

/// A named group of rules, built fresh for every pass
#[derive(Clone, Copy)]
pub struct RuleModule {
    pub name: &'static str,
    pub build: fn(&ValidationContext) -> Vec<Rule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PassState {
    Idle,
    Running,
    Completed,
}

/// A rule invocation that produced no results because it failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRule {
    pub validator_name: String,
    pub rule_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Sorted for presentation
    pub results: Vec<ValidationResult>,
    pub failed_rules: Vec<FailedRule>,
}

impl ValidationReport {
    pub fn by_severity(&self, severity: Severity) -> Vec<&ValidationResult> {
        self.results.iter().filter(|r| r.severity == severity).collect()
    }

    pub fn for_entity(&self, entity_id: &str) -> Vec<&ValidationResult> {
        self.results
            .iter()
            .filter(|r| r.entity_id.as_deref() == Some(entity_id))
            .collect()
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.results.iter().map(|r| r.severity).max()
    }

    pub fn has_errors(&self) -> bool {
        self.max_severity() == Some(Severity::Error)
    }

    /// Results produced by one rule
    pub fn for_rule(&self, rule_name: &str) -> Vec<&ValidationResult> {
        self.results.iter().filter(|r| r.rule_name == rule_name).collect()
    }
}

struct Subject {
    validator: &'static str,
    rule: &'static str,
    entity_id: Option<String>,
    property: Option<String>,
}

struct Outcome {
    subject: Subject,
    result: std::result::Result<Result<Vec<ValidationResult>>, Box<dyn std::any::Any + Send>>,
}

fn guarded<'a, F>(subject: Subject, check: F) -> BoxFuture<'a, Outcome>
where
    F: Future<Output = Result<Vec<ValidationResult>>> + Send + 'a,
{
    async move {
        let result = AssertUnwindSafe(check).catch_unwind().await;
        Outcome { subject, result }
    }
    .boxed()
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

pub struct ValidationEngine {
    modules: Vec<RuleModule>,
    state: Mutex<PassState>,
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new(crate::rules::default_modules())
    }
}

impl ValidationEngine {
    pub fn new(modules: Vec<RuleModule>) -> Self {
        Self {
            modules,
            state: Mutex::new(PassState::Idle),
        }
    }

    pub fn modules(&self) -> &[RuleModule] {
        &self.modules
    }

    pub fn state(&self) -> PassState {
        *self.state.lock()
    }

    pub async fn validate(&self, ctx: &ValidationContext) -> ValidationReport {
        *self.state.lock() = PassState::Running;

        let built: Vec<(&'static str, Vec<Rule>)> = self
            .modules
            .iter()
            .map(|m| (m.name, (m.build)(ctx)))
            .collect();

        let mut jobs: Vec<BoxFuture<'_, Outcome>> = Vec::new();
        for (module, rules) in &built {
            for rule in rules {
                let subject = |entity_id: Option<&str>, property: Option<&str>| Subject {
                    validator: *module,
                    rule: rule.name(),
                    entity_id: entity_id.map(String::from),
                    property: property.map(String::from),
                };
                match rule {
                    Rule::Crate(r) => jobs.push(guarded(subject(None, None), r.check(ctx))),
                    Rule::Entity(r) => {
                        for (id, entity) in ctx.entities.iter() {
                            jobs.push(guarded(subject(Some(id.as_str()), None), r.check(ctx, id, entity)));
                        }
                    }
                    Rule::Property(r) => {
                        for (id, entity) in ctx.entities.iter() {
                            for (property, value) in entity::properties(entity) {
                                jobs.push(guarded(
                                    subject(Some(id.as_str()), Some(property.as_str())),
                                    r.check(ctx, id, entity, property, value),
                                ));
                            }
                        }
                    }
                }
            }
        }

        let invocations = jobs.len();
        let mut report = ValidationReport::default();
        for Outcome { subject, result } in join_all(jobs).await {
            let reason = match result {
                Ok(Ok(results)) => {
                    report
                        .results
                        .extend(results.into_iter().map(|r| stamp(r, &subject)));
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };
            warn!(
                validator = subject.validator,
                rule = subject.rule,
                entity_id = subject.entity_id.as_deref().unwrap_or(""),
                reason = %reason,
                "rule failed, skipping its results"
            );
            report.failed_rules.push(FailedRule {
                validator_name: subject.validator.to_string(),
                rule_name: subject.rule.to_string(),
                entity_id: subject.entity_id,
                property_name: subject.property,
                reason,
            });
        }

        sort_results(&mut report.results);
        info!(
            invocations,
            results = report.results.len(),
            failed = report.failed_rules.len(),
            "validation pass completed"
        );
        *self.state.lock() = PassState::Completed;
        report
    }
}

fn stamp(mut result: ValidationResult, subject: &Subject) -> ValidationResult {
    result.validator_name = subject.validator.to_string();
    result.rule_name = subject.rule.to_string();
    if result.entity_id.is_none() {
        result.entity_id = subject.entity_id.clone();
    }
    if result.property_name.is_none() {
        result.property_name = subject.property.clone();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LocalClient;
    use crate::error::ValidateError;
    use crate::graph::tests::schema_graph;
    use serde_json::json;

    struct CountEntities;

    #[async_trait]
    impl CrateRule for CountEntities {
        fn name(&self) -> &'static str {
            "countEntities"
        }

        async fn check(&self, ctx: &ValidationContext) -> Result<Vec<ValidationResult>> {
            Ok(vec![ValidationResult::info(
                "Entities",
                format!("{} entities", ctx.entities.len()),
            )])
        }
    }

    /// Flags every property, but fails on `bad` and panics on `worse`
    struct Fragile;

    #[async_trait]
    impl PropertyRule for Fragile {
        fn name(&self) -> &'static str {
            "fragile"
        }

        async fn check(
            &self,
            _ctx: &ValidationContext,
            _entity_id: &str,
            _entity: &Value,
            property: &str,
            _value: &Value,
        ) -> Result<Vec<ValidationResult>> {
            match property {
                "bad" => Err(ValidateError::Rpc("boom".to_string())),
                "worse" => panic!("rule bug"),
                _ => Ok(vec![ValidationResult::warning("Seen", property.to_string())]),
            }
        }
    }

    fn test_module() -> RuleModule {
        RuleModule {
            name: "test",
            build: |_| {
                vec![
                    Rule::Crate(Arc::new(CountEntities)),
                    Rule::Property(Arc::new(Fragile)),
                ]
            },
        }
    }

    fn context(document: Value) -> ValidationContext {
        let client = Arc::new(LocalClient::new(Arc::new(schema_graph())));
        ValidationContext::new(document, client, "1.1")
    }

    #[tokio::test]
    async fn test_failing_rules_do_not_block_others() {
        let ctx = context(json!({
            "@context": "https://w3id.org/ro/crate/1.1/context",
            "@graph": [
                {"@id": "a", "name": "A", "bad": 1},
                {"@id": "b", "worse": 2, "description": "B"}
            ]
        }));
        let engine = ValidationEngine::new(vec![test_module()]);
        assert_eq!(engine.state(), PassState::Idle);

        let report = engine.validate(&ctx).await;
        assert_eq!(engine.state(), PassState::Completed);

        let seen: Vec<(&str, &str)> = report
            .for_rule("fragile")
            .iter()
            .map(|r| {
                (
                    r.entity_id.as_deref().unwrap_or(""),
                    r.property_name.as_deref().unwrap_or(""),
                )
            })
            .collect();
        assert_eq!(seen, vec![("b", "description"), ("a", "name")]);
        assert_eq!(report.for_rule("countEntities").len(), 1);

        assert_eq!(report.failed_rules.len(), 2);
        let worse = report
            .failed_rules
            .iter()
            .find(|f| f.property_name.as_deref() == Some("worse"))
            .unwrap();
        assert_eq!(worse.entity_id.as_deref(), Some("b"));
        assert!(worse.reason.contains("rule bug"));
    }

    #[tokio::test]
    async fn test_results_are_stamped_and_sorted() {
        let ctx = context(json!({"@graph": [{"@id": "a", "name": "A"}]}));
        let report = ValidationEngine::new(vec![test_module()]).validate(&ctx).await;

        assert_eq!(report.max_severity(), Some(Severity::Warning));
        assert_eq!(report.results[0].severity, Severity::Warning);
        assert!(report.results.iter().all(|r| r.validator_name == "test"));
        assert_eq!(report.for_entity("a").len(), 1);
        assert_eq!(report.by_severity(Severity::Info).len(), 1);
        assert!(!report.has_errors());
    }

    #[test]
    fn test_expand_term() {
        let ctx = context(json!({"@context": "https://w3id.org/ro/crate/1.1/context"}));
        assert_eq!(
            ctx.expand_term("Dataset").as_deref(),
            Some("https://schema.org/Dataset")
        );
        assert_eq!(
            ctx.expand_term("http://example.org/X").as_deref(),
            Some("http://example.org/X")
        );
        assert_eq!(ctx.expand_term("notATerm"), None);
    }
}
