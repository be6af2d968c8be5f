//! Validator configuration
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! no file at all) yields a working setup with schema.org registered.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, ValidateError};

const DEFAULT_FALLBACK_SPECIFICATION: &str = "1.1";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// A vocabulary document the resolver may load on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSource {
    /// Stable source id, used to track what the document contributed
    pub id: String,
    /// Location of the JSON-LD document (http(s), file:// or a path)
    pub url: String,
    /// IRI prefixes this document provides terms for
    #[serde(default)]
    pub match_prefixes: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SchemaSource {
    pub fn new(id: impl Into<String>, url: impl Into<String>, match_prefixes: &[&str]) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            match_prefixes: match_prefixes.iter().map(|p| p.to_string()).collect(),
            enabled: true,
        }
    }

    /// Whether this source claims to provide `iri`
    pub fn matches(&self, iri: &str) -> bool {
        self.match_prefixes.iter().any(|p| iri.starts_with(p.as_str()))
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Specification version assumed when the crate's context is unknown
    pub fallback_specification: String,
    /// Upper bound on a single vocabulary fetch
    pub fetch_timeout_secs: u64,
    pub schema_sources: Vec<SchemaSource>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            fallback_specification: DEFAULT_FALLBACK_SPECIFICATION.to_string(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            schema_sources: default_schema_sources(),
        }
    }
}

impl ValidatorConfig {
    /// Read a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidateError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Reject settings the validator cannot run with
    pub fn check(&self) -> Result<()> {
        if crate::vocab::known_context_for_version(&self.fallback_specification).is_none() {
            return Err(ValidateError::Config(format!(
                "fallback_specification '{}' is not a known RO-Crate version",
                self.fallback_specification
            )));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ValidateError::Config(
                "fetch_timeout_secs must be at least 1".to_string(),
            ));
        }
        let mut ids: Vec<&str> = self.schema_sources.iter().map(|s| s.id.as_str()).collect();
        ids.sort();
        if let Some(dup) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(ValidateError::Config(format!(
                "schema source '{}' is registered twice",
                dup[0]
            )));
        }
        Ok(())
    }
}

/// Sources registered out of the box
pub fn default_schema_sources() -> Vec<SchemaSource> {
    vec![
        SchemaSource::new(
            "schema.org",
            "https://schema.org/version/latest/schemaorg-current-https.jsonld",
            &["https://schema.org/", "http://schema.org/"],
        ),
        SchemaSource::new(
            "bioschemas",
            "https://raw.githubusercontent.com/BioSchemas/specifications/master/Releases/bioschemas.jsonld",
            &["https://bioschemas.org/"],
        ),
    ]
}
