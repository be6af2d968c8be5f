//! One async interface over the vocabulary graph
//!
//! Rules talk to a [`VocabularyClient`] and do not know whether the graph
//! lives in this task ([`LocalClient`]) or behind the worker RPC boundary
//! ([`crate::rpc::WorkerClient`]).

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::graph::VocabularyGraph;
use crate::node::VocabularyNode;

#[async_trait]
pub trait VocabularyClient: Send + Sync {
    async fn get_node(&self, id: &str) -> Result<Option<Arc<VocabularyNode>>>;

    async fn get_class_parents(&self, id: &str) -> Result<Vec<String>>;

    /// Transitive subclasses, sorted
    async fn get_sub_classes(&self, id: &str) -> Result<Vec<String>>;

    /// Transitive subproperties, sorted
    async fn get_sub_properties(&self, id: &str) -> Result<Vec<String>>;

    async fn get_class_specific_properties(&self, class_id: &str) -> Result<Vec<String>>;

    async fn get_class_properties(&self, class_id: &str) -> Result<Vec<String>>;

    async fn is_property_of_class(&self, property_id: &str, class_id: &str) -> Result<bool>;
}

/// Direct in-process calls
#[derive(Clone)]
pub struct LocalClient {
    graph: Arc<VocabularyGraph>,
}

impl LocalClient {
    pub fn new(graph: Arc<VocabularyGraph>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Arc<VocabularyGraph> {
        &self.graph
    }
}

fn sorted(set: std::collections::HashSet<String>) -> Vec<String> {
    let mut items: Vec<String> = set.into_iter().collect();
    items.sort();
    items
}

#[async_trait]
impl VocabularyClient for LocalClient {
    async fn get_node(&self, id: &str) -> Result<Option<Arc<VocabularyNode>>> {
        self.graph.get_node(id).await
    }

    async fn get_class_parents(&self, id: &str) -> Result<Vec<String>> {
        self.graph.get_class_parents(id).await
    }

    async fn get_sub_classes(&self, id: &str) -> Result<Vec<String>> {
        self.graph.get_sub_classes(id).await.map(sorted)
    }

    async fn get_sub_properties(&self, id: &str) -> Result<Vec<String>> {
        self.graph.get_sub_properties(id).await.map(sorted)
    }

    async fn get_class_specific_properties(&self, class_id: &str) -> Result<Vec<String>> {
        self.graph.get_class_specific_properties(class_id).await
    }

    async fn get_class_properties(&self, class_id: &str) -> Result<Vec<String>> {
        self.graph.get_class_properties(class_id).await
    }

    async fn is_property_of_class(&self, property_id: &str, class_id: &str) -> Result<bool> {
        self.graph.is_property_of_class(property_id, class_id).await
    }
}
