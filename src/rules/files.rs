//! Data entities checked against the crate's storage

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::expanded_types;
use crate::engine::{EntityRule, Rule, RuleModule, ValidationContext};
use crate::entity::{classify_id, IdKind};
use crate::error::Result;
use crate::result::ValidationResult;
use crate::storage::FileKind;
use crate::vocab::SCHEMA_ORG_NS;

pub fn module() -> RuleModule {
    RuleModule {
        name: "files",
        build: |ctx| match ctx.storage {
            Some(_) => vec![Rule::Entity(Arc::new(DataEntityShape))],
            None => vec![],
        },
    }
}

/// What kind of storage entry an entity's types promise
fn expected_kind(ctx: &ValidationContext, entity: &Value) -> Option<FileKind> {
    let types = expanded_types(ctx, entity);
    let is = |local: &str| types.iter().any(|t| t.strip_prefix(SCHEMA_ORG_NS) == Some(local));
    if is("MediaObject") {
        Some(FileKind::File)
    } else if is("Dataset") {
        Some(FileKind::Directory)
    } else {
        None
    }
}

fn declared_size(entity: &Value) -> Option<u64> {
    match entity.get("contentSize")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub struct DataEntityShape;

#[async_trait]
impl EntityRule for DataEntityShape {
    fn name(&self) -> &'static str {
        "dataEntityShape"
    }

    async fn check(
        &self,
        ctx: &ValidationContext,
        entity_id: &str,
        entity: &Value,
    ) -> Result<Vec<ValidationResult>> {
        // web-based data entities and the root are not looked up
        if classify_id(entity_id) != IdKind::Relative {
            return Ok(vec![]);
        }
        let (Some(storage), Some(expected)) = (&ctx.storage, expected_kind(ctx, entity)) else {
            return Ok(vec![]);
        };

        let Some(info) = storage.file_info(entity_id).await? else {
            let what = match expected {
                FileKind::File => "file",
                FileKind::Directory => "directory",
            };
            return Ok(vec![ValidationResult::warning(
                "Data entity not found",
                format!("No {} <code>{}</code> exists in the crate", what, entity_id),
            )]);
        };

        let mut results = Vec::new();
        match (expected, info.kind) {
            (FileKind::File, FileKind::Directory) => results.push(ValidationResult::error(
                "File is a directory",
                format!("<code>{}</code> is typed as a File but is a directory", entity_id),
            )),
            (FileKind::Directory, FileKind::File) => results.push(ValidationResult::error(
                "Dataset is a file",
                format!("<code>{}</code> is typed as a Dataset but is a file", entity_id),
            )),
            _ => {}
        }

        if let (Some(declared), Some(actual)) = (declared_size(entity), info.size) {
            if declared != actual {
                results.push(
                    ValidationResult::soft_warning(
                        "Content size mismatch",
                        format!(
                            "<code>contentSize</code> says {} bytes but the file has {}",
                            declared, actual
                        ),
                    )
                    .property("contentSize"),
                );
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LocalClient;
    use crate::engine::{ValidationEngine, ValidationReport};
    use crate::graph::tests::schema_graph;
    use crate::result::Severity;
    use crate::storage::{DirectoryStorage, StorageBackend};
    use serde_json::json;

    async fn validate(root: &std::path::Path, with_storage: bool) -> ValidationReport {
        let client = Arc::new(LocalClient::new(Arc::new(schema_graph())));
        let document = json!({
            "@context": "https://w3id.org/ro/crate/1.1/context",
            "@graph": [
                {"@id": "./", "@type": "Dataset"},
                {"@id": "data.csv", "@type": "File", "contentSize": "4"},
                {"@id": "results/", "@type": "Dataset"},
                {"@id": "missing.txt", "@type": "File"},
                {"@id": "folder-as-file", "@type": "File"},
                {"@id": "https://example.org/remote.csv", "@type": "File"},
                {"@id": "#person", "@type": "Person"}
            ]
        });
        let storage: Option<Arc<dyn StorageBackend>> = if with_storage {
            Some(Arc::new(DirectoryStorage::new(root)))
        } else {
            None
        };
        let ctx = ValidationContext::new(document, client, "1.1").with_storage(storage);
        ValidationEngine::new(vec![module()]).validate(&ctx).await
    }

    fn scratch() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.csv"), "a,b\n1,2\n").unwrap();
        std::fs::create_dir(dir.path().join("results")).unwrap();
        std::fs::create_dir(dir.path().join("folder-as-file")).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_data_entities_match_storage() {
        let dir = scratch();
        let report = validate(dir.path(), true).await;

        let for_entity = |id: &str| -> Vec<(String, Severity)> {
            report
                .for_entity(id)
                .iter()
                .map(|r| (r.title.clone(), r.severity))
                .collect()
        };
        assert_eq!(
            for_entity("data.csv"),
            vec![("Content size mismatch".to_string(), Severity::SoftWarning)]
        );
        assert!(for_entity("results/").is_empty());
        assert_eq!(
            for_entity("missing.txt"),
            vec![("Data entity not found".to_string(), Severity::Warning)]
        );
        assert_eq!(
            for_entity("folder-as-file"),
            vec![("File is a directory".to_string(), Severity::Error)]
        );
        assert!(for_entity("https://example.org/remote.csv").is_empty());
        assert!(for_entity("#person").is_empty());
        assert!(for_entity("./").is_empty());
    }

    #[tokio::test]
    async fn test_module_is_empty_without_storage() {
        let dir = scratch();
        let report = validate(dir.path(), false).await;
        assert!(report.results.is_empty());
        assert!(report.failed_rules.is_empty());
    }
}
