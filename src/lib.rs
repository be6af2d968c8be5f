//! RO-Crate Validation Library
//!
//! This library validates RO-Crate metadata against a composable vocabulary
//! graph (schema.org and related RDF vocabularies) and the crate's own
//! JSON-LD `@context`.
//!
//! # Overview
//!
//! - [`VocabularyGraph`] holds the classes and properties of every loaded
//!   vocabulary and answers hierarchy questions (parents, subclasses, which
//!   properties a class may carry). Missing terms are loaded on demand
//!   through a [`VocabularyResolver`].
//! - [`CrateContextResolver`] maps the short terms of one crate to IRIs and
//!   back.
//! - [`ValidationEngine`] runs crate, entity and property rules over a crate
//!   snapshot and collects severity-tagged [`ValidationResult`]s.
//!
//! Vocabulary lookups go through a [`VocabularyClient`], which is either the
//! in-process [`LocalClient`] or a [`WorkerClient`] talking to a graph in a
//! separate task.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use rocrate_validate::*;
//!
//! let config = ValidatorConfig::default();
//! let resolver = Arc::new(VocabularyResolver::from_config(&config));
//! let graph = Arc::new(VocabularyGraph::with_resolver(resolver));
//!
//! let loaded = load_crate(&CrateSource::detect("./my-crate")).await?;
//! let ctx = ValidationContext::new(
//!     loaded.document,
//!     Arc::new(LocalClient::new(graph)),
//!     &config.fallback_specification,
//! )
//! .with_storage(loaded.storage);
//!
//! let report = ValidationEngine::default().validate(&ctx).await;
//! for result in &report.results {
//!     println!("{}: {}", result.severity, result.title);
//! }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod engine;
pub mod entity;
pub mod error;
pub mod graph;
pub mod node;
pub mod resolver;
pub mod result;
pub mod rpc;
pub mod rules;
pub mod storage;
pub mod vocab;

// Re-export main types for convenience
pub use crate::client::{LocalClient, VocabularyClient};
pub use crate::config::{SchemaSource, ValidatorConfig};
pub use crate::context::CrateContextResolver;
pub use crate::engine::{
    CrateRule, EntityRule, FailedRule, PassState, PropertyRule, Rule, RuleModule,
    ValidationContext, ValidationEngine, ValidationReport,
};
pub use crate::error::{Result, ValidateError};
pub use crate::graph::VocabularyGraph;
pub use crate::node::{NodeKind, VocabularyNode};
pub use crate::resolver::{DefaultFetcher, SchemaFetcher, VocabularyResolver};
pub use crate::result::{sort_results, Severity, ValidationAction, ValidationResult};
pub use crate::rpc::{RpcRequest, RpcResponse, Worker, WorkerClient, WorkerService};
pub use crate::storage::{
    load_crate, CrateSource, DirectoryStorage, FileInfo, FileKind, LoadedCrate, StorageBackend,
    ZipStorage,
};
