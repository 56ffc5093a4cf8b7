use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "folio",
    about = "Folio -- typed document collections over a document store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Raise log output to debug
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate a collection configuration file
    CheckConfig(CheckConfigArgs),
    /// Compose the document id a record would be stored under
    ComposeId(ComposeIdArgs),
    /// Import JSON-lines records into a collection
    Import(ImportArgs),
}

#[derive(Args)]
pub struct CheckConfigArgs {
    /// Path to the TOML configuration
    pub config: PathBuf,
}

#[derive(Args)]
pub struct ComposeIdArgs {
    /// Record as a JSON object
    pub record: String,
    /// Unique-key fields, in order (dotted paths allowed)
    #[arg(short, long, value_delimiter = ',')]
    pub keys: Vec<String>,
}

#[derive(Args)]
pub struct ImportArgs {
    /// Path to the TOML configuration
    #[arg(short, long)]
    pub config: PathBuf,
    /// Target collection, as declared in the configuration
    #[arg(long)]
    pub collection: String,
    /// JSON-lines file, one record per line
    pub input: PathBuf,
    /// Use non-atomic bulk writes instead of chunked transactions
    #[arg(long)]
    pub bulk: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_key_list() {
        let cli = Cli::parse_from(["folio", "compose-id", "-k", "a,b.c", r#"{"a":1}"#]);
        match cli.command {
            Command::ComposeId(args) => assert_eq!(args.keys, vec!["a", "b.c"]),
            _ => panic!("expected compose-id"),
        }
    }

    #[test]
    fn parses_import_flags() {
        let cli = Cli::parse_from([
            "folio", "-v", "import", "-c", "folio.toml", "--collection", "users", "users.jsonl", "--bulk",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Command::Import(args) => {
                assert!(args.bulk);
                assert_eq!(args.collection, "users");
            }
            _ => panic!("expected import"),
        }
    }
}
