//! Rule modules shipped with the validator
//!
//! - [`rocrate`]: structural RO-Crate requirements
//! - [`schema`]: type, property and reference checks against the vocabulary
//! - [`files`]: data entities cross-checked against the crate's storage

use serde_json::Value;

use crate::engine::{RuleModule, ValidationContext};
use crate::entity::extract_types;
use crate::error::{Result, ValidateError};

pub mod files;
pub mod rocrate;
pub mod schema;

pub fn default_modules() -> Vec<RuleModule> {
    vec![rocrate::module(), schema::module(), files::module()]
}

/// Treat a lookup into an unsupported namespace as "nothing to check"
pub(crate) fn skip_unsupported<T>(outcome: Result<T>) -> Result<Option<T>> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(ValidateError::UnsupportedNamespace(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Expanded IRIs of an entity's types; terms the context cannot resolve are dropped
pub(crate) fn expanded_types(ctx: &ValidationContext, entity: &Value) -> Vec<String> {
    extract_types(entity)
        .iter()
        .filter_map(|t| ctx.expand_term(t))
        .collect()
}

/// Index to report for position `i` of a value; single values carry none
pub(crate) fn position(value: &Value, i: usize) -> Option<usize> {
    value.is_array().then_some(i)
}
