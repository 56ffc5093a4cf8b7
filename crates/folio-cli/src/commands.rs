use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use folio_collection::{
    compose_id, BulkWriteError, Collection, CollectionConfig, CollectionDeclaration, CollectionError, NoOpHooks,
};
use folio_store::InMemoryStore;
use folio_types::{DocumentId, Draft, FieldPath, Fields};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::cli::*;

/// Contents of a `folio.toml`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FolioConfig {
    #[serde(default)]
    pub limits: CollectionConfig,
    #[serde(default)]
    pub collections: Vec<CollectionDeclaration>,
}

impl FolioConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid configuration {}", path.display()))
    }

    /// Parse and validate every declaration.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        if config.limits.max_transaction_documents == 0 {
            bail!("limits.max_transaction_documents must be at least 1");
        }
        let mut names = HashSet::new();
        for declaration in &config.collections {
            declaration.validate()?;
            if !names.insert(declaration.name.as_str()) {
                bail!("collection '{}' is declared twice", declaration.name);
            }
        }
        Ok(config)
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionDeclaration> {
        self.collections.iter().find(|c| c.name == name)
    }
}

/// Outcome of one `folio import`.
#[derive(Debug, Serialize)]
pub struct ImportSummary {
    pub collection: String,
    pub mode: &'static str,
    pub read: usize,
    pub stored: usize,
    pub failed: Vec<ImportFailure>,
}

#[derive(Debug, Serialize)]
pub struct ImportFailure {
    /// 1-based line of the input file.
    pub line: usize,
    pub error: String,
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::CheckConfig(args) => cmd_check_config(args, format),
        Command::ComposeId(args) => cmd_compose_id(args, format),
        Command::Import(args) => cmd_import(args, format).await,
    }
}

fn cmd_check_config(args: CheckConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = FolioConfig::load(&args.config)?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    println!(
        "{} {} ({} collections, {} documents per transaction)",
        "✓".green().bold(),
        args.config.display().to_string().bold(),
        config.collections.len(),
        config.limits.max_transaction_documents
    );
    for declaration in &config.collections {
        let keys = if declaration.unique_keys.is_empty() {
            "random ids".dimmed().to_string()
        } else {
            declaration.unique_keys.join(", ")
        };
        println!(
            "  {}  version {}  keys: {}",
            declaration.name.cyan(),
            declaration.current_version().yellow(),
            keys
        );
    }
    Ok(())
}

fn cmd_compose_id(args: ComposeIdArgs, format: OutputFormat) -> anyhow::Result<()> {
    let id = compose_for(&args.record, &args.keys)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "id": id.as_str() })),
        OutputFormat::Text => println!("{}", id.as_str().yellow()),
    }
    Ok(())
}

/// Compose the id of `record` from `keys`; no keys yields a random id.
fn compose_for(record: &str, keys: &[String]) -> anyhow::Result<DocumentId> {
    if keys.is_empty() {
        return Ok(folio_crypto::random_id());
    }
    let fields: Fields = serde_json::from_str(record).context("record must be a JSON object")?;
    let paths = keys
        .iter()
        .map(|k| FieldPath::parse(k).with_context(|| format!("bad key '{k}'")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(compose_id(&fields, &paths)?)
}

async fn cmd_import(args: ImportArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = FolioConfig::load(&args.config)?;
    let input = std::fs::read_to_string(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
    let summary = import(&config, &args.collection, &input, args.bulk).await?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    let mark = if summary.failed.is_empty() {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!(
        "{} {}: {} of {} records stored ({})",
        mark,
        summary.collection.cyan(),
        summary.stored.to_string().bold(),
        summary.read,
        summary.mode
    );
    for failure in &summary.failed {
        println!("  line {}: {}", failure.line.to_string().yellow(), failure.error);
    }
    Ok(())
}

/// Import JSON-lines `input` into a fresh in-memory store.
///
/// Chunked mode stops at the first failing chunk; bulk mode attempts every
/// record and reports each failure.
pub async fn import(config: &FolioConfig, name: &str, input: &str, bulk: bool) -> anyhow::Result<ImportSummary> {
    let declaration = config
        .collection(name)
        .with_context(|| format!("collection '{name}' is not declared"))?
        .clone();

    let mut lines = Vec::new();
    let mut drafts = Vec::new();
    for (index, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Fields =
            serde_json::from_str(line).with_context(|| format!("line {}: not a JSON object", index + 1))?;
        drafts.push(draft_from(fields).with_context(|| format!("line {}", index + 1))?);
        lines.push(index + 1);
    }
    debug!(collection = %name, records = drafts.len(), bulk, "parsed import");

    let store = Arc::new(InMemoryStore::new());
    let collection: Collection<Fields> =
        Collection::new(declaration, store.clone(), Arc::new(NoOpHooks))?.with_config(config.limits.clone());

    let read = drafts.len();
    let mut failed = Vec::new();
    if bulk {
        match collection.multi().create(drafts).await {
            Ok(_) => {}
            Err(CollectionError::Bulk(BulkWriteError { failures, .. })) => {
                failed = failures
                    .into_iter()
                    .map(|f| ImportFailure {
                        line: lines[f.index],
                        error: f.error.to_string(),
                    })
                    .collect();
            }
            Err(other) => return Err(other.into()),
        }
    } else if let Err(err) = collection.create().all(drafts, None).await {
        failed.push(ImportFailure {
            line: 0,
            error: err.to_string(),
        });
    }

    let stored = store.len(name);
    info!(collection = %name, read, stored, failed = failed.len(), "import finished");
    Ok(ImportSummary {
        collection: name.to_string(),
        mode: if bulk { "bulk" } else { "chunked" },
        read,
        stored,
        failed,
    })
}

/// An `_id` in the input pins the document id.
fn draft_from(mut fields: Fields) -> anyhow::Result<Draft<Fields>> {
    match fields.remove(folio_types::envelope::FIELD_ID) {
        None => Ok(Draft::new(fields)),
        Some(Value::String(raw)) => Ok(Draft::new(fields).with_id(DocumentId::parse(raw)?)),
        Some(other) => bail!("_id must be a string, got {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"
[limits]
max_transaction_documents = 2

[[collections]]
name = "users"
unique_keys = ["email"]
versions = ["v1", "v2"]

[[collections]]
name = "notes"
versions = ["v1"]
"#;

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    #[test]
    fn loads_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let config = FolioConfig::load(file.path()).unwrap();
        assert_eq!(config.limits.max_transaction_documents, 2);
        assert_eq!(config.collections.len(), 2);
        assert_eq!(config.collection("users").unwrap().current_version(), "v2");
        assert!(config.collection("notes").unwrap().unique_keys.is_empty());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = FolioConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("reading"));
    }

    #[test]
    fn rejects_duplicate_collections() {
        let raw = "[[collections]]\nname = \"a\"\nversions = [\"v1\"]\n\n[[collections]]\nname = \"a\"\nversions = [\"v1\"]\n";
        assert!(FolioConfig::parse(raw).is_err());
    }

    #[test]
    fn rejects_declaration_without_versions() {
        let raw = "[[collections]]\nname = \"a\"\nversions = []\n";
        assert!(FolioConfig::parse(raw).is_err());
    }

    // -----------------------------------------------------------------------
    // compose-id
    // -----------------------------------------------------------------------

    #[test]
    fn compose_is_deterministic() {
        let keys = vec!["a".to_string(), "b".to_string()];
        let one = compose_for(r#"{"a": 1, "b": "x", "c": true}"#, &keys).unwrap();
        let two = compose_for(r#"{"b": "x", "a": 1}"#, &keys).unwrap();
        assert_eq!(one, two);
        assert!(compose_for(r#"{"a": 1}"#, &keys).is_err());
    }

    #[test]
    fn no_keys_gives_random_ids() {
        assert_ne!(compose_for("{}", &[]).unwrap(), compose_for("{}", &[]).unwrap());
    }

    // -----------------------------------------------------------------------
    // import
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn chunked_import_stores_every_record() {
        let config = FolioConfig::parse(CONFIG).unwrap();
        let input = "{\"email\": \"a@x\"}\n\n{\"email\": \"b@x\"}\n{\"email\": \"c@x\"}\n";
        let summary = import(&config, "users", input, false).await.unwrap();
        assert_eq!(summary.read, 3);
        assert_eq!(summary.stored, 3);
        assert!(summary.failed.is_empty());
    }

    #[tokio::test]
    async fn bulk_import_reports_failing_lines() {
        let config = FolioConfig::parse(CONFIG).unwrap();
        // Line 2 lacks the unique key.
        let input = "{\"email\": \"a@x\"}\n{\"name\": \"nobody\"}\n{\"email\": \"c@x\"}\n";
        let summary = import(&config, "users", input, true).await.unwrap();
        assert_eq!(summary.mode, "bulk");
        assert_eq!(summary.stored, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].line, 2);
    }

    #[tokio::test]
    async fn pinned_ids_are_kept() {
        let config = FolioConfig::parse(CONFIG).unwrap();
        let input = "{\"_id\": \"n1\", \"text\": \"hi\"}\n";
        let summary = import(&config, "notes", input, false).await.unwrap();
        assert_eq!(summary.stored, 1);
        assert!(import(&config, "missing", input, false).await.is_err());
    }
}
