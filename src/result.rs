//! Validation results

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use ulid::Ulid;

/// Issue severity, ordered `Info < SoftWarning < Warning < Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Info,
    SoftWarning,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::SoftWarning => "soft warning",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(label)
    }
}

/// A remediation the UI may offer next to a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationAction {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub id: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_index: Option<usize>,
    pub title: String,
    pub description: String,
    /// Rule module that produced the result; stamped by the engine
    pub validator_name: String,
    /// Stable key within the module; stamped by the engine
    pub rule_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ValidationAction>,
}

impl ValidationResult {
    pub fn new(severity: Severity, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            severity,
            entity_id: None,
            property_name: None,
            property_index: None,
            title: title.into(),
            description: description.into(),
            validator_name: String::new(),
            rule_name: String::new(),
            help_url: None,
            actions: Vec::new(),
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Error, title, description)
    }

    pub fn warning(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Warning, title, description)
    }

    pub fn soft_warning(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::SoftWarning, title, description)
    }

    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Info, title, description)
    }

    pub fn entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.property_name = Some(name.into());
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.property_index = Some(index);
        self
    }

    pub fn help(mut self, url: impl Into<String>) -> Self {
        self.help_url = Some(url.into());
        self
    }

    pub fn action(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.actions.push(ValidationAction {
            id: id.into(),
            label: label.into(),
        });
        self
    }
}

/// Presentation order: most severe first, then property name, property
/// index, entity id and title
pub fn compare_results(a: &ValidationResult, b: &ValidationResult) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| a.property_name.cmp(&b.property_name))
        .then_with(|| a.property_index.cmp(&b.property_index))
        .then_with(|| a.entity_id.cmp(&b.entity_id))
        .then_with(|| a.title.cmp(&b.title))
}

pub fn sort_results(results: &mut [ValidationResult]) {
    results.sort_by(compare_results);
}
