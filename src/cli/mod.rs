//! CLI command definitions and parsing
use crate::error::{PxError, Result};
use crate::store::Where;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "px",
    version,
    about = "Schema-driven entity collections with semantic retrieval",
    long_about = "px stores entities in a local embedding index under <path>/.px, \
                  reconstructs them from field-level matches and validates generated \
                  output against JSON Schema."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/promptx/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Project directory holding the .px store (defaults to storage.root)
    #[arg(short, long, global = true, value_name = "DIR")]
    pub path: Option<PathBuf>,

    /// Configuration profile to apply (e.g., "test", "prod")
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the store under <path>/.px
    Init,

    /// List collections
    Collections,

    /// Embed entities from a JSON file (an object or an array of objects)
    Embed {
        /// Collection name
        collection: String,

        /// JSON data file
        file: PathBuf,

        /// JSON Schema the data is validated against
        #[arg(short, long)]
        schema: Option<PathBuf>,
    },

    /// Show the entities of a collection
    Show {
        collection: String,

        /// Print entities as JSON
        #[arg(long)]
        json: bool,
    },

    /// Query a collection by text and metadata
    Query {
        collection: String,

        /// Query texts; their scores are summed
        texts: Vec<String>,

        /// Metadata filter as key=value (repeatable)
        #[arg(short, long = "where", value_name = "KEY=VALUE")]
        filter: Vec<String>,

        /// Maximum number of results to return
        #[arg(short, long)]
        limit: Option<usize>,

        /// Minimum aggregate score
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a collection and its records
    Drop { collection: String },

    /// Validate a JSON Schema and print the fields it describes
    Schema { file: PathBuf },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Combine `key=value` pairs into one filter.
///
/// Values that parse as JSON keep their type (`age=20` is a number), anything else is
/// a string.
pub fn parse_where(pairs: &[String]) -> Result<Option<Where>> {
    let mut filter: Option<Where> = None;
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| PxError::InvalidQuery(format!("expected KEY=VALUE, got '{}'", pair)))?;
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::from(raw));
        let condition = Where::eq(key, value);
        filter = Some(match filter {
            Some(existing) => existing.and(condition),
            None => condition,
        });
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::parse_from([
            "px", "query", "users", "rust", "sqlite", "--where", "type=user", "-l", "5",
        ]);
        match cli.command {
            Commands::Query {
                collection,
                texts,
                filter,
                limit,
                threshold,
                json,
            } => {
                assert_eq!(collection, "users");
                assert_eq!(texts, vec!["rust", "sqlite"]);
                assert_eq!(filter, vec!["type=user"]);
                assert_eq!(limit, Some(5));
                assert_eq!(threshold, None);
                assert!(!json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_where_pairs() {
        assert!(parse_where(&[]).unwrap().is_none());

        let filter = parse_where(&["type=user".to_string(), "age=20".to_string()])
            .unwrap()
            .unwrap();
        let matching = json!({"type": "user", "age": 20});
        let other = json!({"type": "user", "age": "20"});
        assert!(filter.matches(matching.as_object().unwrap()));
        assert!(!filter.matches(other.as_object().unwrap()));
    }

    #[test]
    fn test_parse_where_rejects_missing_separator() {
        assert!(matches!(
            parse_where(&["type".to_string()]),
            Err(PxError::InvalidQuery(_))
        ));
        assert!(parse_where(&["=user".to_string()]).is_err());
    }
}
