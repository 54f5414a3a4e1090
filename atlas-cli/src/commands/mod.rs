pub mod clusters;
pub mod context;
pub mod ingest;
pub mod query;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use atlas_core::config::AtlasConfig;
use atlas_core::store::SqliteStore;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse a source tree into a new generation of the code graph
    Ingest(ingest::IngestArgs),
    /// Search the code graph with one of the five query strategies
    Query(query::QueryArgs),
    /// Compute or inspect semantic clusters
    Clusters(clusters::ClustersArgs),
    /// Select a token-budgeted context pack for a task
    Context(context::ContextArgs),
    /// Show generations and store statistics
    Status(status::StatusArgs),
}

pub async fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Ingest(args) => ingest::run(args).await,
        Command::Query(args) => query::run(args).await,
        Command::Clusters(args) => clusters::run(args).await,
        Command::Context(args) => context::run(args).await,
        Command::Status(args) => status::run(args).await,
    }
}

/// Codebase location shared by every command.
#[derive(Args, Debug, Clone)]
pub struct RepoArgs {
    /// Root of the source tree (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Database location (default: <path>/.atlas/atlas.db)
    #[arg(long)]
    pub db: Option<PathBuf>,
}

impl RepoArgs {
    pub fn root(&self) -> anyhow::Result<PathBuf> {
        std::fs::canonicalize(&self.path)
            .with_context(|| format!("Cannot resolve path: {}", self.path.display()))
    }

    pub fn config(&self, root: &Path) -> anyhow::Result<AtlasConfig> {
        Ok(AtlasConfig::load_for_root(root)?)
    }

    pub fn db_path(&self, root: &Path, config: &AtlasConfig) -> PathBuf {
        self.db.clone().unwrap_or_else(|| config.db_path(root))
    }

    /// Open an existing index; fails when nothing has been ingested here.
    pub fn open_existing(&self) -> anyhow::Result<(AtlasConfig, Arc<SqliteStore>)> {
        let root = self.root()?;
        let config = self.config(&root)?;
        let db_path = self.db_path(&root, &config);
        if !db_path.exists() {
            anyhow::bail!(
                "No index in {}. Run `atlas ingest` first.",
                root.display()
            );
        }
        let store = SqliteStore::open(&db_path)?;
        Ok((config, Arc::new(store)))
    }
}

/// A token cancelled on Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            child.cancel();
        }
    });
    token
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{text}");
    Ok(())
}
