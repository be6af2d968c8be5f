//! In-memory vocabulary graph
//!
//! Holds the nodes of every loaded vocabulary document together with a
//! merged compact-IRI prefix table. Each load is recorded per source so it
//! can be reversed by [`VocabularyGraph::unload_schema`] without touching
//! what other sources contributed.
//!
//! Lookups that miss are retried once after asking the
//! [`VocabularyResolver`] for documents that could provide the identifier.
//! Hierarchy closures are iterative and keep a visited set, so a cyclic
//! vocabulary terminates instead of recursing forever.

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, ValidateError};
use crate::node::{expand_compact_iri, PrefixTable, VocabularyNode};
use crate::resolver::{context_prefixes, validate_schema_document, VocabularyResolver};
use crate::vocab::is_well_known_namespace;

/// Everything one source declared, whether or not it won
#[derive(Debug, Default)]
struct Contribution {
    prefixes: PrefixTable,
    nodes: Vec<Arc<VocabularyNode>>,
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: HashMap<String, Arc<VocabularyNode>>,
    prefixes: PrefixTable,
    /// node id -> source whose definition is live
    node_owners: HashMap<String, String>,
    /// prefix key -> source whose binding is live
    prefix_owners: HashMap<String, String>,
    /// loaded sources in load order
    sources: IndexMap<String, Contribution>,
    /// source id -> last load error
    issues: HashMap<String, String>,
}

/// Namespace part of an IRI, up to the last `/` or `#`
fn namespace_of(iri: &str) -> &str {
    match iri.rfind(['/', '#']) {
        Some(i) => &iri[..=i],
        None => iri,
    }
}

pub struct VocabularyGraph {
    state: RwLock<GraphState>,
    resolver: Option<Arc<VocabularyResolver>>,
    /// Serializes autoload so concurrent misses fetch a source only once
    load_lock: tokio::sync::Mutex<()>,
}

impl Default for VocabularyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl VocabularyGraph {
    /// A graph that only knows what is added explicitly
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            resolver: None,
            load_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// A graph that autoloads missing identifiers through `resolver`
    pub fn with_resolver(resolver: Arc<VocabularyResolver>) -> Self {
        Self {
            resolver: Some(resolver),
            ..Self::new()
        }
    }

    pub fn resolver(&self) -> Option<&Arc<VocabularyResolver>> {
        self.resolver.as_ref()
    }

    /// Merge a vocabulary document's prefixes and nodes under `source_id`
    ///
    /// Loading an already loaded source replaces its previous contribution.
    /// A key or node already provided by another source keeps that binding;
    /// this source takes over only when the earlier one is unloaded.
    pub fn add_schema_from_file(&self, source_id: &str, doc: &Value) -> Result<()> {
        validate_schema_document(source_id, doc)?;
        let doc_prefixes = doc.get("@context").map(context_prefixes).unwrap_or_default();

        let mut nodes = Vec::new();
        for raw in doc.get("@graph").and_then(|g| g.as_array()).into_iter().flatten() {
            let node = VocabularyNode::from_raw(raw, &doc_prefixes).map_err(|e| match e {
                ValidateError::InvalidSchema { reason, .. } => ValidateError::InvalidSchema {
                    source_id: source_id.to_string(),
                    reason,
                },
                other => other,
            })?;
            nodes.push(Arc::new(node));
        }

        self.unload_schema(source_id);

        let mut state = self.state.write();
        let mut added_keys = 0;
        for (prefix, namespace) in &doc_prefixes {
            match state.prefixes.get(prefix) {
                Some(existing) if existing != namespace => {
                    debug!(source_id, prefix = %prefix, existing = %existing, namespace = %namespace, "prefix already bound");
                }
                Some(_) => {}
                None => {
                    state.prefixes.insert(prefix.clone(), namespace.clone());
                    state.prefix_owners.insert(prefix.clone(), source_id.to_string());
                    added_keys += 1;
                }
            }
        }

        let mut added_nodes = 0;
        for node in &nodes {
            if state.nodes.contains_key(node.id()) {
                continue;
            }
            state.nodes.insert(node.id().to_string(), node.clone());
            state.node_owners.insert(node.id().to_string(), source_id.to_string());
            added_nodes += 1;
        }

        debug!(
            source_id,
            prefixes = added_keys,
            nodes = added_nodes,
            "schema loaded"
        );
        state.sources.insert(
            source_id.to_string(),
            Contribution {
                prefixes: doc_prefixes,
                nodes,
            },
        );
        state.issues.remove(source_id);
        Ok(())
    }

    /// Remove everything `source_id` contributed; returns false if it was not loaded
    ///
    /// A key or node the source provided passes to the earliest loaded source
    /// that also declares it.
    pub fn unload_schema(&self, source_id: &str) -> bool {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let Some(removed) = state.sources.shift_remove(source_id) else {
            return false;
        };

        for prefix in removed.prefixes.keys() {
            if state.prefix_owners.get(prefix).map(String::as_str) != Some(source_id) {
                continue;
            }
            state.prefix_owners.remove(prefix);
            state.prefixes.remove(prefix);
            let heir = state
                .sources
                .iter()
                .find_map(|(id, c)| c.prefixes.get(prefix).map(|ns| (id.clone(), ns.clone())));
            if let Some((heir, namespace)) = heir {
                state.prefixes.insert(prefix.clone(), namespace);
                state.prefix_owners.insert(prefix.clone(), heir);
            }
        }

        for node in &removed.nodes {
            let id = node.id();
            if state.node_owners.get(id).map(String::as_str) != Some(source_id) {
                continue;
            }
            state.node_owners.remove(id);
            state.nodes.remove(id);
            let heir = state.sources.iter().find_map(|(source, c)| {
                c.nodes
                    .iter()
                    .find(|n| n.id() == id)
                    .map(|n| (source.clone(), n.clone()))
            });
            if let Some((heir, node)) = heir {
                state.nodes.insert(id.to_string(), node);
                state.node_owners.insert(id.to_string(), heir);
            }
        }
        debug!(source_id, "schema unloaded");
        true
    }

    /// Drop the recorded failure of a source and load it again
    pub async fn force_load(&self, source_id: &str) -> Result<()> {
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| ValidateError::Config("graph has no schema resolver".to_string()))?;
        self.state.write().issues.remove(source_id);
        let _guard = self.load_lock.lock().await;
        match resolver.force_load(source_id).await {
            Ok(doc) => self.add_schema_from_file(source_id, &doc),
            Err(e) => {
                self.record_issue(source_id, &e);
                Err(e)
            }
        }
    }

    pub fn record_issue(&self, source_id: &str, error: &ValidateError) {
        warn!(source_id, error = %error, "schema source failed to load");
        self.state
            .write()
            .issues
            .insert(source_id.to_string(), error.to_string());
    }

    /// Per-source load failures
    pub fn issues(&self) -> HashMap<String, String> {
        self.state.read().issues.clone()
    }

    pub fn loaded_sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.state.read().sources.keys().cloned().collect();
        sources.sort();
        sources
    }

    pub fn prefixes(&self) -> PrefixTable {
        self.state.read().prefixes.clone()
    }

    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Expand a compact IRI with the merged prefix table
    pub fn expand(&self, compact: &str) -> Option<String> {
        expand_compact_iri(compact, &self.state.read().prefixes)
    }

    /// Direct lookup without autoloading
    pub fn get_loaded_node(&self, id: &str) -> Option<Arc<VocabularyNode>> {
        self.state.read().nodes.get(id).cloned()
    }

    /// Look up a node, autoloading candidate sources once on a miss
    ///
    /// Returns `UnsupportedNamespace` for an absolute IRI in a recognized
    /// vocabulary namespace that nothing loaded or registered provides.
    pub async fn get_node(&self, id: &str) -> Result<Option<Arc<VocabularyNode>>> {
        if let Some(node) = self.get_loaded_node(id) {
            return Ok(Some(node));
        }
        let resolver = match &self.resolver {
            Some(r) => r,
            None => return self.not_found(id),
        };

        let _guard = self.load_lock.lock().await;
        if let Some(node) = self.get_loaded_node(id) {
            return Ok(Some(node));
        }

        let excluded: HashSet<String> = {
            let state = self.state.read();
            state
                .sources
                .keys()
                .chain(state.issues.keys())
                .cloned()
                .collect()
        };
        for (source_id, outcome) in resolver.autoload(id, &excluded).await {
            if let Err(e) = outcome.and_then(|doc| self.add_schema_from_file(&source_id, &doc)) {
                self.record_issue(&source_id, &e);
            }
        }

        match self.get_loaded_node(id) {
            Some(node) => Ok(Some(node)),
            None => self.not_found(id),
        }
    }

    fn not_found(&self, id: &str) -> Result<Option<Arc<VocabularyNode>>> {
        if self.is_unsupported(id) {
            return Err(ValidateError::UnsupportedNamespace(id.to_string()));
        }
        debug!(iri = id, "vocabulary node not found");
        Ok(None)
    }

    fn is_unsupported(&self, id: &str) -> bool {
        let absolute = url::Url::parse(id)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !absolute || !is_well_known_namespace(id) {
            return false;
        }
        // prefix declarations are borrowed freely, so only defined nodes count
        let namespace = namespace_of(id);
        let covered_by_nodes = self
            .state
            .read()
            .nodes
            .keys()
            .any(|n| namespace_of(n) == namespace);
        let covered_by_source = self
            .resolver
            .as_ref()
            .is_some_and(|r| !r.sources_for(id).is_empty());
        !covered_by_nodes && !covered_by_source
    }

    async fn require_class(&self, id: &str) -> Result<Option<Arc<VocabularyNode>>> {
        match self.get_node(id).await? {
            Some(node) if !node.is_class() => Err(ValidateError::NotAClass(id.to_string())),
            other => Ok(other),
        }
    }

    /// Lookup used while walking edges: unsupported targets are dead ends
    async fn walk_node(&self, id: &str) -> Result<Option<Arc<VocabularyNode>>> {
        match self.get_node(id).await {
            Err(ValidateError::UnsupportedNamespace(_)) => Ok(None),
            other => other,
        }
    }

    /// All ancestors of a class, depth first
    pub async fn get_class_parents(&self, id: &str) -> Result<Vec<String>> {
        let root = match self.require_class(id).await? {
            Some(node) => node,
            None => return Ok(Vec::new()),
        };
        self.ancestors(id, &root, |n| n.parent_classes()).await
    }

    /// All ancestors of a property, depth first
    pub async fn get_property_parents(&self, id: &str) -> Result<Vec<String>> {
        let root = match self.get_node(id).await? {
            Some(node) => node,
            None => return Ok(Vec::new()),
        };
        self.ancestors(id, &root, |n| n.parent_properties()).await
    }

    async fn ancestors<F>(&self, id: &str, root: &VocabularyNode, parents_of: F) -> Result<Vec<String>>
    where
        F: Fn(&VocabularyNode) -> Vec<&str>,
    {
        let mut result = Vec::new();
        let mut visited: HashSet<String> = HashSet::from([id.to_string()]);
        let mut stack: Vec<String> = parents_of(root).into_iter().rev().map(String::from).collect();

        while let Some(next) = stack.pop() {
            if !visited.insert(next.clone()) {
                continue;
            }
            result.push(next.clone());
            if let Some(node) = self.walk_node(&next).await? {
                stack.extend(parents_of(&node).into_iter().rev().map(String::from));
            }
        }
        Ok(result)
    }

    /// Transitive subclasses of a class
    pub async fn get_sub_classes(&self, id: &str) -> Result<HashSet<String>> {
        if self.require_class(id).await?.is_none() {
            return Ok(HashSet::new());
        }
        Ok(self.descendants(id, |n| n.parent_classes()))
    }

    /// Transitive subproperties of a property
    pub async fn get_sub_properties(&self, id: &str) -> Result<HashSet<String>> {
        if self.get_node(id).await?.is_none() {
            return Ok(HashSet::new());
        }
        Ok(self.descendants(id, |n| n.parent_properties()))
    }

    fn descendants<F>(&self, id: &str, parents_of: F) -> HashSet<String>
    where
        F: Fn(&VocabularyNode) -> Vec<&str>,
    {
        let state = self.state.read();
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in state.nodes.values() {
            for parent in parents_of(node) {
                children.entry(parent).or_default().push(node.id());
            }
        }

        let mut result = HashSet::new();
        let mut queue = vec![id];
        while let Some(current) = queue.pop() {
            for child in children.get(current).into_iter().flatten() {
                if *child != id && result.insert(child.to_string()) {
                    queue.push(*child);
                }
            }
        }
        result
    }

    /// Properties whose domain names `class_id` directly
    pub async fn get_class_specific_properties(&self, class_id: &str) -> Result<Vec<String>> {
        self.require_class(class_id).await?;
        Ok(self.properties_with_domain(&HashSet::from([class_id.to_string()])))
    }

    /// Properties declared on a class or any of its ancestors
    pub async fn get_class_properties(&self, class_id: &str) -> Result<Vec<String>> {
        let mut classes: HashSet<String> = self.get_class_parents(class_id).await?.into_iter().collect();
        classes.insert(class_id.to_string());
        Ok(self.properties_with_domain(&classes))
    }

    fn properties_with_domain(&self, classes: &HashSet<String>) -> Vec<String> {
        let state = self.state.read();
        let found: BTreeSet<String> = state
            .nodes
            .values()
            .filter(|n| n.is_property())
            .filter(|n| n.domain().iter().any(|d| classes.contains(*d)))
            .map(|n| n.id().to_string())
            .collect();
        found.into_iter().collect()
    }

    /// Whether a property (or one of its ancestors) is declared for a class
    pub async fn is_property_of_class(&self, property_id: &str, class_id: &str) -> Result<bool> {
        let allowed: HashSet<String> = self.get_class_properties(class_id).await?.into_iter().collect();
        if allowed.contains(property_id) {
            return Ok(true);
        }
        let ancestors = self.get_property_parents(property_id).await?;
        Ok(ancestors.iter().any(|p| allowed.contains(p)))
    }
}
