//! Structural RO-Crate rules

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::engine::{CrateRule, EntityRule, Rule, RuleModule, ValidationContext};
use crate::entity::{
    extract_types, find_metadata_descriptor, is_metadata_descriptor_id, root_entity_id,
};
use crate::error::Result;
use crate::result::{Severity, ValidationResult};
use crate::vocab::{METADATA_DESCRIPTOR_ID, ROOT_ENTITY_ID, SCHEMA_ORG_NS};

const HELP_BASE: &str = "https://www.researchobject.org/ro-crate/specification";

fn help_url(ctx: &ValidationContext, page: &str) -> String {
    let version = ctx.context.specification().unwrap_or("1.1");
    format!("{}/{}/{}", HELP_BASE, version, page)
}

pub fn module() -> RuleModule {
    RuleModule {
        name: "rocrate",
        build: |_| {
            vec![
                Rule::Crate(Arc::new(MissingMetadataEntity)),
                Rule::Crate(Arc::new(MissingRootEntity)),
                Rule::Crate(Arc::new(ContextFallback)),
                Rule::Entity(Arc::new(MissingType)),
                Rule::Entity(Arc::new(MissingName)),
                Rule::Entity(Arc::new(RootEntityType)),
                Rule::Entity(Arc::new(RootRequiredProperties)),
            ]
        },
    }
}

fn is_root(ctx: &ValidationContext, entity_id: &str) -> bool {
    match root_entity_id(&ctx.entities) {
        Some(root) => root == entity_id,
        None => entity_id == ROOT_ENTITY_ID,
    }
}

fn has_value(entity: &Value, property: &str) -> bool {
    match entity.get(property) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    }
}

pub struct MissingMetadataEntity;

#[async_trait]
impl CrateRule for MissingMetadataEntity {
    fn name(&self) -> &'static str {
        "missingMetadataEntity"
    }

    async fn check(&self, ctx: &ValidationContext) -> Result<Vec<ValidationResult>> {
        if find_metadata_descriptor(&ctx.entities).is_some() {
            return Ok(vec![]);
        }
        Ok(vec![ValidationResult::error(
            "Missing metadata entity",
            format!(
                "The crate has no <code>{}</code> entity describing the metadata file",
                METADATA_DESCRIPTOR_ID
            ),
        )
        .help(help_url(ctx, "root-data-entity.html"))
        .action("addMetadataEntity", "Add metadata entity")])
    }
}

pub struct MissingRootEntity;

#[async_trait]
impl CrateRule for MissingRootEntity {
    fn name(&self) -> &'static str {
        "missingRootEntity"
    }

    async fn check(&self, ctx: &ValidationContext) -> Result<Vec<ValidationResult>> {
        // reported by missingMetadataEntity
        if find_metadata_descriptor(&ctx.entities).is_none() {
            return Ok(vec![]);
        }
        let description = match root_entity_id(&ctx.entities) {
            None => "The metadata entity has no <code>about</code> reference to a root entity"
                .to_string(),
            Some(id) if !ctx.entities.contains_key(id) => {
                format!("The metadata entity is about <code>{}</code>, which is not in the crate", id)
            }
            Some(_) => return Ok(vec![]),
        };
        Ok(vec![ValidationResult::error("Missing root entity", description)
            .help(help_url(ctx, "root-data-entity.html"))])
    }
}

pub struct ContextFallback;

#[async_trait]
impl CrateRule for ContextFallback {
    fn name(&self) -> &'static str {
        "contextFallback"
    }

    async fn check(&self, ctx: &ValidationContext) -> Result<Vec<ValidationResult>> {
        if !ctx.context.using_fallback() {
            return Ok(vec![]);
        }
        let version = ctx.context.specification().unwrap_or_default();
        let mut description = format!(
            "The crate context was not recognized, so terms were resolved with the RO-Crate {} context. Validation results may be incomplete.",
            version
        );
        for error in ctx.context.errors() {
            description.push_str("<br>");
            description.push_str(error);
        }
        Ok(vec![ValidationResult::warning("Unrecognized context", description)])
    }
}

pub struct MissingType;

#[async_trait]
impl EntityRule for MissingType {
    fn name(&self) -> &'static str {
        "missingType"
    }

    async fn check(
        &self,
        _ctx: &ValidationContext,
        _entity_id: &str,
        entity: &Value,
    ) -> Result<Vec<ValidationResult>> {
        if !extract_types(entity).is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![ValidationResult::error(
            "Missing type",
            "Every entity must declare at least one <code>@type</code>",
        )])
    }
}

pub struct MissingName;

#[async_trait]
impl EntityRule for MissingName {
    fn name(&self) -> &'static str {
        "missingName"
    }

    async fn check(
        &self,
        ctx: &ValidationContext,
        entity_id: &str,
        entity: &Value,
    ) -> Result<Vec<ValidationResult>> {
        // the root is covered by rootRequiredProperties
        if is_metadata_descriptor_id(entity_id) || is_root(ctx, entity_id) || has_value(entity, "name") {
            return Ok(vec![]);
        }
        Ok(vec![ValidationResult::soft_warning(
            "Missing name",
            "Entities should have a human-readable <code>name</code>",
        )
        .property("name")])
    }
}

pub struct RootEntityType;

#[async_trait]
impl EntityRule for RootEntityType {
    fn name(&self) -> &'static str {
        "rootEntityType"
    }

    async fn check(
        &self,
        ctx: &ValidationContext,
        entity_id: &str,
        entity: &Value,
    ) -> Result<Vec<ValidationResult>> {
        if !is_root(ctx, entity_id) {
            return Ok(vec![]);
        }
        let dataset = format!("{}Dataset", SCHEMA_ORG_NS);
        let is_dataset = extract_types(entity)
            .iter()
            .any(|t| ctx.expand_term(t).as_deref() == Some(dataset.as_str()));
        if is_dataset {
            return Ok(vec![]);
        }
        Ok(vec![ValidationResult::error(
            "Root entity is not a Dataset",
            "The root data entity must have <code>Dataset</code> among its types",
        )
        .property("@type")
        .help(help_url(ctx, "root-data-entity.html"))])
    }
}

pub struct RootRequiredProperties;

impl RootRequiredProperties {
    /// Required root properties and how strongly, per specification version
    fn requirements(specification: Option<&str>) -> [(&'static str, Severity); 4] {
        match specification {
            // 1.2 only strictly requires datePublished
            Some("1.2") => [
                ("name", Severity::Warning),
                ("description", Severity::Warning),
                ("datePublished", Severity::Error),
                ("license", Severity::Warning),
            ],
            _ => [
                ("name", Severity::Error),
                ("description", Severity::Error),
                ("datePublished", Severity::Error),
                ("license", Severity::Error),
            ],
        }
    }
}

#[async_trait]
impl EntityRule for RootRequiredProperties {
    fn name(&self) -> &'static str {
        "rootRequiredProperties"
    }

    async fn check(
        &self,
        ctx: &ValidationContext,
        entity_id: &str,
        entity: &Value,
    ) -> Result<Vec<ValidationResult>> {
        if !is_root(ctx, entity_id) {
            return Ok(vec![]);
        }
        let results = Self::requirements(ctx.context.specification())
            .into_iter()
            .filter(|(property, _)| !has_value(entity, property))
            .map(|(property, severity)| {
                ValidationResult::new(
                    severity,
                    format!("Missing required property {}", property),
                    format!(
                        "The root data entity must have a <code>{}</code> property",
                        property
                    ),
                )
                .property(property)
                .help(help_url(ctx, "root-data-entity.html"))
            })
            .collect();
        Ok(results)
    }
}
