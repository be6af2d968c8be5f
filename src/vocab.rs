//! Vocabulary constants for RO-Crate validation
//!
//! RDF/RDFS terms used to classify vocabulary nodes, the well-known
//! namespaces the validator recognizes, and the RO-Crate identifiers.

/// `rdfs:Class`
pub const RDFS_CLASS: &str = "http://www.w3.org/2000/01/rdf-schema#Class";

/// `rdf:Property`
pub const RDF_PROPERTY: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#Property";

/// Base schema.org namespace used by the bundled contexts
pub const SCHEMA_ORG_NS: &str = "https://schema.org/";

/// schema.org datatypes that carry date values
pub const SCHEMA_DATE: &str = "https://schema.org/Date";
pub const SCHEMA_DATE_TIME: &str = "https://schema.org/DateTime";

/// Namespaces that are recognized as vocabulary namespaces even when no
/// schema source is registered for them
pub const WELL_KNOWN_NAMESPACES: &[&str] = &[
    "https://schema.org/",
    "http://schema.org/",
    "https://bioschemas.org/",
    "http://purl.org/dc/terms/",
    "http://pcdm.org/models#",
    "http://www.w3.org/ns/dx/prof/",
    "http://www.w3.org/ns/prov#",
    "http://www.w3.org/2000/01/rdf-schema#",
    "http://www.w3.org/1999/02/22-rdf-syntax-ns#",
    "http://www.w3.org/2001/XMLSchema#",
    "http://www.w3.org/2002/07/owl#",
    "http://www.w3.org/2004/02/skos/core#",
    "https://w3id.org/ro/terms/",
];

/// Standard metadata descriptor filename
pub const METADATA_DESCRIPTOR_ID: &str = "ro-crate-metadata.json";

/// Metadata descriptor filename used by JSON-LD aware tooling
pub const METADATA_DESCRIPTOR_JSONLD_ID: &str = "ro-crate-metadata.jsonld";

/// Root entity ID
pub const ROOT_ENTITY_ID: &str = "./";

/// A canonical RO-Crate context document shipped with the crate
#[derive(Debug, Clone, Copy)]
pub struct KnownContext {
    /// Exact `@id` of the context, including version
    pub id: &'static str,
    /// Specification version this context belongs to
    pub version: &'static str,
    /// Bundled JSON-LD document carrying the term table
    pub document: &'static str,
}

pub const KNOWN_CONTEXTS: &[KnownContext] = &[
    KnownContext {
        id: "https://w3id.org/ro/crate/1.1/context",
        version: "1.1",
        document: include_str!("../contexts/ro-crate-1.1.jsonld"),
    },
    KnownContext {
        id: "https://w3id.org/ro/crate/1.2/context",
        version: "1.2",
        document: include_str!("../contexts/ro-crate-1.2.jsonld"),
    },
];

/// Look up a known context by its exact `@id`
pub fn known_context(id: &str) -> Option<&'static KnownContext> {
    KNOWN_CONTEXTS.iter().find(|c| c.id == id)
}

/// Look up a known context by specification version
pub fn known_context_for_version(version: &str) -> Option<&'static KnownContext> {
    KNOWN_CONTEXTS.iter().find(|c| c.version == version)
}

/// Check whether an IRI falls in a well-known vocabulary namespace
pub fn is_well_known_namespace(iri: &str) -> bool {
    WELL_KNOWN_NAMESPACES.iter().any(|ns| iri.starts_with(ns))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_contexts_parse() {
        for known in KNOWN_CONTEXTS {
            let doc: serde_json::Value = serde_json::from_str(known.document).unwrap();
            assert_eq!(doc.get("@id").and_then(|v| v.as_str()), Some(known.id));
            assert!(doc.get("@context").unwrap().is_object());
        }
    }

    #[test]
    fn test_known_context_lookup() {
        assert_eq!(
            known_context("https://w3id.org/ro/crate/1.1/context").map(|c| c.version),
            Some("1.1")
        );
        assert!(known_context("https://w3id.org/ro/crate/1.1").is_none());
        assert!(known_context_for_version("1.2").is_some());
    }

    #[test]
    fn test_well_known_namespace() {
        assert!(is_well_known_namespace("http://purl.org/dc/terms/conformsTo"));
        assert!(!is_well_known_namespace("https://example.org/terms/foo"));
    }
}
