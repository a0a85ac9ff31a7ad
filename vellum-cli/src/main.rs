use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vellum_core::{
    set_log_level, CommitMode, Database, DatabaseOptions, ExportOptions, FileObjectStore,
    FindOptions, LogLevel, NoopBroadcast, ObjectStore, PersistentStorage, Registrar, StoreConfig,
};

#[derive(Parser)]
#[command(name = "vellum")]
#[command(about = "Vellum CLI - inspect and maintain file-backed Vellum document stores")]
#[command(version)]
struct Cli {
    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import documents from a JSON file
    /// Format: { "collection_name": [documents...], ... }
    Import {
        /// JSON file to import
        file: PathBuf,
        /// Database log path
        #[arg(long, default_value = "vellum.vlog")]
        db: PathBuf,
    },
    /// Export the durable content of one collection as a JSON array
    Export {
        collection: String,
        #[arg(long, default_value = "vellum.vlog")]
        db: PathBuf,
        /// First id to include
        #[arg(long)]
        offset: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Query a collection
    Find {
        collection: String,
        #[arg(long, default_value = "vellum.vlog")]
        db: PathBuf,
        /// Filter expression as JSON
        #[arg(long, default_value = "{}")]
        filter: String,
        /// Sort key as field:1 or field:-1 (repeatable)
        #[arg(long)]
        sort: Vec<String>,
        #[arg(long)]
        skip: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Count documents matching a filter
    Count {
        collection: String,
        #[arg(long, default_value = "vellum.vlog")]
        db: PathBuf,
        #[arg(long, default_value = "{}")]
        filter: String,
    },
    /// Rewrite the log so it only holds live documents
    Compact {
        #[arg(long, default_value = "vellum.vlog")]
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = LogLevel::parse(&cli.log_level)
        .with_context(|| format!("Unknown log level: {}", cli.log_level))?;
    set_log_level(level);

    match cli.command {
        Commands::Import { file, db } => import_data(&file, &db),
        Commands::Export {
            collection,
            db,
            offset,
            limit,
            output,
        } => export_data(&collection, &db, ExportOptions { offset, limit }, output.as_deref()),
        Commands::Find {
            collection,
            db,
            filter,
            sort,
            skip,
            limit,
        } => {
            let mut options = FindOptions::new();
            for key in &sort {
                let (field, direction) = parse_sort(key)?;
                options = options.with_sort(field, direction);
            }
            options.skip = skip;
            options.limit = limit;
            find_documents(&collection, &db, &filter, &options)
        }
        Commands::Count { collection, db, filter } => count_documents(&collection, &db, &filter),
        Commands::Compact { db } => compact(&db),
    }
}

/// Open a database registering every existing store plus `extra`
fn open_database(db_path: &Path, extra: &[String]) -> Result<Database<PersistentStorage>> {
    let store = FileObjectStore::open(db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

    let mut names: BTreeSet<String> = store.store_names()?.into_iter().collect();
    names.extend(extra.iter().cloned());

    let mut options = DatabaseOptions::new(db_path.display().to_string())
        .with_config(StoreConfig::default().with_commit_mode(CommitMode::Manual));
    for name in names {
        options = options.register(Registrar::new(name));
    }

    let store: Arc<dyn ObjectStore> = Arc::new(store);
    Database::open(options, store, &NoopBroadcast)
        .with_context(|| format!("Failed to load database: {}", db_path.display()))
}

fn parse_filter(filter: &str) -> Result<Value> {
    serde_json::from_str(filter).with_context(|| format!("Invalid filter JSON: {}", filter))
}

fn parse_sort(key: &str) -> Result<(String, i32)> {
    match key.rsplit_once(':') {
        None => Ok((key.to_string(), 1)),
        Some((field, "1")) => Ok((field.to_string(), 1)),
        Some((field, "-1")) => Ok((field.to_string(), -1)),
        Some(_) => bail!("Invalid sort '{}', expected field:1 or field:-1", key),
    }
}

fn import_data(file: &Path, db_path: &Path) -> Result<()> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;

    let data: Map<String, Value> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in file: {}", file.display()))?;

    let names: Vec<String> = data.keys().cloned().collect();
    let db = open_database(db_path, &names)?;

    let mut total_docs = 0;
    for (collection_name, documents) in data {
        let Value::Array(docs) = documents else {
            bail!("Collection '{}' must be an array", collection_name);
        };
        let count = docs.len();

        db.collection(&collection_name)?
            .insert_many(docs)
            .with_context(|| format!("Failed to insert documents into {}", collection_name))?;
        total_docs += count;

        println!("Imported {} documents into '{}'", count, collection_name);
    }

    db.close().context("Failed to commit imported documents")?;
    println!("Total: {} documents imported to {}", total_docs, db_path.display());
    Ok(())
}

fn export_data(collection: &str, db_path: &Path, options: ExportOptions, output: Option<&Path>) -> Result<()> {
    let db = open_database(db_path, &[])?;
    let docs = db
        .export(collection, &options)
        .with_context(|| format!("Failed to export collection: {}", collection))?;

    let json = serde_json::to_string_pretty(&docs).context("Failed to serialize to JSON")?;
    match output {
        Some(file) => {
            fs::write(file, json)
                .with_context(|| format!("Failed to write to file: {}", file.display()))?;
            println!("Exported {} documents from '{}' to {}", docs.len(), collection, file.display());
        }
        None => println!("{}", json),
    }

    db.close()?;
    Ok(())
}

fn find_documents(collection: &str, db_path: &Path, filter: &str, options: &FindOptions) -> Result<()> {
    let filter = parse_filter(filter)?;
    let db = open_database(db_path, &[])?;

    let docs = db
        .collection(collection)?
        .find(&filter, options)
        .with_context(|| format!("Failed to query collection: {}", collection))?;
    println!("{}", serde_json::to_string_pretty(&docs)?);

    db.close()?;
    Ok(())
}

fn count_documents(collection: &str, db_path: &Path, filter: &str) -> Result<()> {
    let filter = parse_filter(filter)?;
    let db = open_database(db_path, &[])?;

    let count = db
        .collection(collection)?
        .count(&filter)
        .with_context(|| format!("Failed to count collection: {}", collection))?;
    println!("{}", count);

    db.close()?;
    Ok(())
}

fn compact(db_path: &Path) -> Result<()> {
    let store = FileObjectStore::open(db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

    let before = store.file_len()?;
    store.compact().context("Compaction failed")?;
    let after = store.file_len()?;
    store.close()?;

    println!("Compacted {}: {} -> {} bytes", db_path.display(), before, after);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sort() {
        assert_eq!(parse_sort("name").unwrap(), ("name".to_string(), 1));
        assert_eq!(parse_sort("profile.age:-1").unwrap(), ("profile.age".to_string(), -1));
        assert!(parse_sort("name:up").is_err());
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(parse_filter("{}").unwrap(), serde_json::json!({}));
        assert!(parse_filter("{oops").is_err());
    }
}
