//! Vocabulary document fetching and autoload source selection

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{SchemaSource, ValidatorConfig};
use crate::error::{Result, ValidateError};
use crate::node::PrefixTable;

/// Retrieves the raw text of a vocabulary document
#[async_trait]
pub trait SchemaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Fetches over HTTP(S) and from the local filesystem
#[derive(Debug, Clone, Default)]
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchemaFetcher for DefaultFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let fetch_err = |e: reqwest::Error| ValidateError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            };
            return self
                .client
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(fetch_err)?
                .text()
                .await
                .map_err(fetch_err);
        }

        let path = if url.starts_with("file://") {
            url::Url::parse(url)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| ValidateError::Fetch {
                    url: url.to_string(),
                    reason: "not a valid file URL".to_string(),
                })?
        } else {
            url.into()
        };
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ValidateError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Fetches, validates and caches vocabulary documents
pub struct VocabularyResolver {
    sources: RwLock<Vec<SchemaSource>>,
    fetcher: Arc<dyn SchemaFetcher>,
    timeout: Duration,
    cache: Mutex<HashMap<String, Arc<Value>>>,
}

impl VocabularyResolver {
    pub fn new(config: &ValidatorConfig, fetcher: Arc<dyn SchemaFetcher>) -> Self {
        Self {
            sources: RwLock::new(config.schema_sources.clone()),
            fetcher,
            timeout: config.fetch_timeout(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &ValidatorConfig) -> Self {
        Self::new(config, Arc::new(DefaultFetcher::new()))
    }

    /// Register a source, replacing any source with the same id
    pub fn register(&self, source: SchemaSource) {
        let mut sources = self.sources.write();
        sources.retain(|s| s.id != source.id);
        sources.push(source);
    }

    pub fn unregister(&self, source_id: &str) -> Option<SchemaSource> {
        let mut sources = self.sources.write();
        let pos = sources.iter().position(|s| s.id == source_id)?;
        Some(sources.remove(pos))
    }

    pub fn set_enabled(&self, source_id: &str, enabled: bool) -> bool {
        match self.sources.write().iter_mut().find(|s| s.id == source_id) {
            Some(source) => {
                source.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn sources(&self) -> Vec<SchemaSource> {
        self.sources.read().clone()
    }

    /// Enabled sources whose match prefixes cover `iri`
    pub fn sources_for(&self, iri: &str) -> Vec<SchemaSource> {
        self.sources
            .read()
            .iter()
            .filter(|s| s.enabled && s.matches(iri))
            .cloned()
            .collect()
    }

    /// Fetch, parse and structurally validate a vocabulary document
    pub async fn fetch_schema(&self, url: &str) -> Result<Value> {
        debug!(url, "fetching schema document");
        let text = tokio::time::timeout(self.timeout, self.fetcher.fetch(url))
            .await
            .map_err(|_| ValidateError::Timeout {
                url: url.to_string(),
                secs: self.timeout.as_secs(),
            })??;
        let doc: Value = serde_json::from_str(&text).map_err(|e| ValidateError::InvalidSchema {
            source_id: url.to_string(),
            reason: format!("not valid JSON: {}", e),
        })?;
        validate_schema_document(url, &doc)?;
        Ok(doc)
    }

    /// Fetch every registered, non-excluded source that could provide `target_id`
    pub async fn autoload(
        &self,
        target_id: &str,
        excluded: &HashSet<String>,
    ) -> Vec<(String, Result<Arc<Value>>)> {
        let candidates: Vec<SchemaSource> = self
            .sources_for(target_id)
            .into_iter()
            .filter(|s| !excluded.contains(&s.id))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }
        debug!(
            target_id,
            sources = ?candidates.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            "autoloading schemas"
        );

        let fetches = candidates.into_iter().map(|source| async move {
            let outcome = self.cached_fetch(&source.url).await;
            (source.id, outcome)
        });
        join_all(fetches).await
    }

    /// Fetch a registered source ignoring the cache
    pub async fn force_load(&self, source_id: &str) -> Result<Arc<Value>> {
        let source = self
            .sources
            .read()
            .iter()
            .find(|s| s.id == source_id)
            .cloned()
            .ok_or_else(|| ValidateError::Config(format!("unknown schema source '{}'", source_id)))?;
        let doc = Arc::new(self.fetch_schema(&source.url).await?);
        self.cache.lock().insert(source.url, doc.clone());
        Ok(doc)
    }

    async fn cached_fetch(&self, url: &str) -> Result<Arc<Value>> {
        if let Some(doc) = self.cache.lock().get(url).cloned() {
            return Ok(doc);
        }
        let doc = Arc::new(self.fetch_schema(url).await?);
        self.cache.lock().insert(url.to_string(), doc.clone());
        Ok(doc)
    }
}

/// Check the minimal shape of a vocabulary document
///
/// `@context` must be present and `@graph` must be an array of objects that
/// each carry `@id` and `@type`.
pub fn validate_schema_document(source_id: &str, doc: &Value) -> Result<()> {
    let invalid = |reason: String| ValidateError::InvalidSchema {
        source_id: source_id.to_string(),
        reason,
    };
    if doc.get("@context").is_none() {
        return Err(invalid("missing @context".to_string()));
    }
    let graph = doc
        .get("@graph")
        .and_then(|g| g.as_array())
        .ok_or_else(|| invalid("@graph must be an array".to_string()))?;
    for (i, node) in graph.iter().enumerate() {
        let obj = node
            .as_object()
            .ok_or_else(|| invalid(format!("@graph[{}] is not an object", i)))?;
        if !obj.get("@id").is_some_and(|v| v.is_string()) {
            return Err(invalid(format!("@graph[{}] has no @id", i)));
        }
        if !obj.contains_key("@type") {
            return Err(invalid(format!("@graph[{}] has no @type", i)));
        }
    }
    Ok(())
}

/// Prefix entries of a document's `@context`
///
/// Accepts an object or an array of objects; string entries (remote
/// contexts) are ignored. Term definitions given as objects contribute
/// their `@id`.
pub fn context_prefixes(context: &Value) -> PrefixTable {
    let mut table = PrefixTable::new();
    let objects: Vec<&serde_json::Map<String, Value>> = match context {
        Value::Object(obj) => vec![obj],
        Value::Array(arr) => arr.iter().filter_map(|v| v.as_object()).collect(),
        _ => vec![],
    };
    for obj in objects {
        for (key, value) in obj {
            if key.starts_with('@') {
                continue;
            }
            let iri = match value {
                Value::String(s) => Some(s.as_str()),
                Value::Object(def) => def.get("@id").and_then(|v| v.as_str()),
                _ => None,
            };
            if let Some(iri) = iri {
                table.insert(key.clone(), iri.to_string());
            }
        }
    }
    table
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory fetcher counting requests per URL
    #[derive(Default)]
    pub(crate) struct StaticFetcher {
        pub docs: HashMap<String, String>,
        pub calls: AtomicUsize,
    }

    impl StaticFetcher {
        pub fn with(docs: &[(&str, Value)]) -> Self {
            Self {
                docs: docs
                    .iter()
                    .map(|(url, doc)| (url.to_string(), doc.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SchemaFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.docs.get(url).cloned().ok_or_else(|| ValidateError::Fetch {
                url: url.to_string(),
                reason: "404".to_string(),
            })
        }
    }

    struct StalledFetcher;

    #[async_trait]
    impl SchemaFetcher for StalledFetcher {
        async fn fetch(&self, _url: &str) -> Result<String> {
            futures::future::pending::<()>().await;
            Ok(String::new())
        }
    }

    pub(crate) fn example_config() -> ValidatorConfig {
        ValidatorConfig {
            schema_sources: vec![SchemaSource::new(
                "example",
                "mem://example",
                &["https://example.org/terms/"],
            )],
            ..ValidatorConfig::default()
        }
    }

    pub(crate) fn example_vocab() -> Value {
        json!({
            "@context": {
                "ex": "https://example.org/terms/",
                "rdfs": "http://www.w3.org/2000/01/rdf-schema#",
                "rdf": "http://www.w3.org/1999/02/22-rdf-syntax-ns#"
            },
            "@graph": [
                {"@id": "ex:Widget", "@type": "rdfs:Class"},
                {"@id": "ex:Gadget", "@type": "rdfs:Class", "rdfs:subClassOf": {"@id": "ex:Widget"}},
                {
                    "@id": "ex:colour",
                    "@type": "rdf:Property",
                    "ex:domainIncludes": {"@id": "ex:Widget"}
                }
            ]
        })
    }

    #[test]
    fn test_validate_schema_document() {
        assert!(validate_schema_document("ok", &example_vocab()).is_ok());
        assert!(validate_schema_document("no-ctx", &json!({"@graph": []})).is_err());
        assert!(validate_schema_document("bad-graph", &json!({"@context": {}, "@graph": {}})).is_err());
        let untyped = json!({"@context": {}, "@graph": [{"@id": "ex:a"}]});
        assert!(matches!(
            validate_schema_document("untyped", &untyped),
            Err(ValidateError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_context_prefixes() {
        let ctx = json!([
            "https://remote.example/context",
            {"ex": "https://example.org/", "@vocab": "https://schema.org/"},
            {"term": {"@id": "https://example.org/term", "@type": "@id"}}
        ]);
        let table = context_prefixes(&ctx);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("term").map(String::as_str), Some("https://example.org/term"));
    }

    #[tokio::test]
    async fn test_autoload_matches_prefix_and_skips_excluded() {
        let fetcher = Arc::new(StaticFetcher::with(&[("mem://example", example_vocab())]));
        let resolver = VocabularyResolver::new(&example_config(), fetcher.clone());

        let loaded = resolver
            .autoload("https://example.org/terms/Widget", &HashSet::new())
            .await;
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].1.is_ok());

        let none = resolver
            .autoload("https://schema.org/Person", &HashSet::new())
            .await;
        assert!(none.is_empty());

        let excluded: HashSet<String> = ["example".to_string()].into();
        let skipped = resolver
            .autoload("https://example.org/terms/Widget", &excluded)
            .await;
        assert!(skipped.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_is_cached_until_forced() {
        let fetcher = Arc::new(StaticFetcher::with(&[("mem://example", example_vocab())]));
        let resolver = VocabularyResolver::new(&example_config(), fetcher.clone());
        let target = "https://example.org/terms/Widget";

        resolver.autoload(target, &HashSet::new()).await;
        resolver.autoload(target, &HashSet::new()).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        resolver.force_load("example").await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_document_fails_fast() {
        let fetcher = Arc::new(StaticFetcher::with(&[(
            "mem://example",
            json!({"@context": {}, "@graph": [{"@id": "x"}]}),
        )]));
        let resolver = VocabularyResolver::new(&example_config(), fetcher);
        let err = resolver.fetch_schema("mem://example").await.unwrap_err();
        assert!(matches!(err, ValidateError::InvalidSchema { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_fetch_times_out() {
        let config = ValidatorConfig {
            fetch_timeout_secs: 2,
            ..example_config()
        };
        let resolver = VocabularyResolver::new(&config, Arc::new(StalledFetcher));
        let err = resolver.fetch_schema("mem://example").await.unwrap_err();
        assert!(matches!(err, ValidateError::Timeout { secs: 2, .. }));
    }

    #[test]
    fn test_disable_and_unregister() {
        let resolver =
            VocabularyResolver::new(&example_config(), Arc::new(StaticFetcher::default()));
        assert!(resolver.set_enabled("example", false));
        assert!(resolver.sources_for("https://example.org/terms/Widget").is_empty());
        assert!(resolver.unregister("example").is_some());
        assert!(resolver.sources().is_empty());
    }
}
