//! RO-Crate Validation CLI
//!
//! Command-line tool for validating RO-Crates and resolving their terms.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use rocrate_validate::{
    load_crate, CrateContextResolver, CrateSource, LocalClient, ValidateError, ValidationContext,
    ValidationEngine, ValidationReport, ValidatorConfig, VocabularyClient, VocabularyGraph,
    VocabularyResolver, Worker,
};

#[derive(Parser)]
#[command(name = "rocrate-validate")]
#[command(about = "Validate RO-Crate metadata against schema.org vocabularies")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a crate and report issues
    Validate(ValidateArgs),
    /// Expand a term, or compact an IRI, using a crate's context
    Resolve(ResolveArgs),
}

#[derive(Args)]
struct ValidateArgs {
    /// Path to RO-Crate directory, zip archive, ro-crate-metadata.json file, or URL
    source: String,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Load a local vocabulary file up front: --schema <ID>=<PATH>
    #[arg(long = "schema", value_name = "ID=PATH", value_parser = parse_schema_arg)]
    schemas: Vec<(String, PathBuf)>,

    /// RO-Crate version assumed when the crate's context is not recognized
    #[arg(long, value_name = "VERSION")]
    fallback: Option<String>,

    /// Run vocabulary lookups in a worker task
    #[arg(long)]
    worker: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct ResolveArgs {
    /// Path to RO-Crate directory, zip archive, ro-crate-metadata.json file, or URL
    source: String,

    /// Term to expand, or http(s) IRI to compact
    term: String,

    /// RO-Crate version assumed when the crate's context is not recognized
    #[arg(long, value_name = "VERSION")]
    fallback: Option<String>,
}

fn parse_schema_arg(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((id, path)) if !id.is_empty() && !path.is_empty() => {
            Ok((id.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected ID=PATH, got '{}'", value)),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>, fallback: Option<&String>) -> Result<ValidatorConfig, ValidateError> {
    let mut config = match path {
        Some(path) => ValidatorConfig::load(path)?,
        None => ValidatorConfig::default(),
    };
    if let Some(version) = fallback {
        config.fallback_specification = version.clone();
        config.check()?;
    }
    Ok(config)
}

async fn load_local_schemas(
    graph: &VocabularyGraph,
    schemas: &[(String, PathBuf)],
) -> Result<(), ValidateError> {
    for (id, path) in schemas {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ValidateError::LoadError {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let document: serde_json::Value = serde_json::from_str(&content)?;
        graph.add_schema_from_file(id, &document)?;
        debug!(source_id = %id, path = %path.display(), "loaded local schema");
    }
    Ok(())
}

static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<br\s*/?>|<[^>]+>").expect("valid regex pattern"));

fn plain(text: &str) -> String {
    MARKUP
        .replace_all(text, |caps: &regex::Captures| {
            if caps[0].starts_with("<br") {
                "\n    ".to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

fn print_report(report: &ValidationReport) {
    for result in &report.results {
        let mut subject = result.entity_id.clone().unwrap_or_else(|| "(crate)".to_string());
        if let Some(property) = &result.property_name {
            subject.push_str(" > ");
            subject.push_str(property);
            if let Some(index) = result.property_index {
                subject.push_str(&format!("[{}]", index));
            }
        }
        println!(
            "{:>12}  {}  {} [{}/{}]",
            result.severity.to_string(),
            subject,
            result.title,
            result.validator_name,
            result.rule_name
        );
        println!("    {}", plain(&result.description));
    }
    for failed in &report.failed_rules {
        eprintln!(
            "Rule {}/{} failed on {}: {}",
            failed.validator_name,
            failed.rule_name,
            failed.entity_id.as_deref().unwrap_or("(crate)"),
            failed.reason
        );
    }
}

async fn run_validate(args: ValidateArgs) -> Result<bool, ValidateError> {
    let config = load_config(args.config.as_ref(), args.fallback.as_ref())?;
    let resolver = Arc::new(VocabularyResolver::from_config(&config));
    let graph = Arc::new(VocabularyGraph::with_resolver(resolver));
    load_local_schemas(&graph, &args.schemas).await?;

    let loaded = load_crate(&CrateSource::detect(&args.source)).await?;
    debug!(origin = %loaded.origin, "crate loaded");

    let vocabulary: Arc<dyn VocabularyClient> = if args.worker {
        let client = Worker::spawn(graph.clone());
        if !client.health_check().await {
            return Err(ValidateError::Rpc("worker did not answer the health check".to_string()));
        }
        Arc::new(client)
    } else {
        Arc::new(LocalClient::new(graph.clone()))
    };

    let ctx = ValidationContext::new(loaded.document, vocabulary, &config.fallback_specification)
        .with_storage(loaded.storage);
    let report = ValidationEngine::default().validate(&ctx).await;

    for (source_id, issue) in graph.issues() {
        warn!(source_id = %source_id, "vocabulary not available: {}", issue);
    }

    if args.json {
        let output = if args.pretty {
            serde_json::to_string_pretty(&report)?
        } else {
            serde_json::to_string(&report)?
        };
        println!("{}", output);
    } else {
        print_report(&report);
    }

    let errors = report.by_severity(rocrate_validate::Severity::Error).len();
    eprintln!(
        "Validated {} entities: {} results ({} errors)",
        ctx.entities.len(),
        report.results.len(),
        errors
    );
    Ok(report.has_errors())
}

async fn run_resolve(args: ResolveArgs) -> Result<bool, ValidateError> {
    let config = load_config(None, args.fallback.as_ref())?;
    let loaded = load_crate(&CrateSource::detect(&args.source)).await?;
    let raw = loaded
        .document
        .get("@context")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    let context = CrateContextResolver::from_context(&raw, config.fallback_specification);
    for error in context.errors() {
        warn!("{}", error);
    }

    let answer = if args.term.starts_with("http://") || args.term.starts_with("https://") {
        context.reverse(&args.term)
    } else {
        context.resolve(&args.term)
    };
    match answer {
        Some(value) => {
            println!("{}", value);
            Ok(false)
        }
        None => {
            eprintln!("'{}' is not defined in the crate context", args.term);
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Validate(args) => run_validate(args).await,
        Commands::Resolve(args) => run_resolve(args).await,
    };

    match result {
        Ok(false) => {}
        Ok(true) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schema_arg() {
        assert_eq!(
            parse_schema_arg("local=./vocab.jsonld").unwrap(),
            ("local".to_string(), PathBuf::from("./vocab.jsonld"))
        );
        assert!(parse_schema_arg("no-separator").is_err());
        assert!(parse_schema_arg("=path").is_err());
    }

    #[test]
    fn test_plain_strips_markup() {
        assert_eq!(plain("Use <code>name</code>"), "Use name");
        assert_eq!(plain("a<br>b"), "a\n    b");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "rocrate-validate",
            "-v",
            "validate",
            "./crate",
            "--schema",
            "ex=ex.jsonld",
            "--json",
            "--worker",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Validate(args) => {
                assert!(args.json && args.worker);
                assert_eq!(args.schemas.len(), 1);
            }
            Commands::Resolve(_) => panic!("expected validate"),
        }
    }
}
