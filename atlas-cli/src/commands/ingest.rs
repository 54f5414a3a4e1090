use std::sync::Arc;
use std::time::Duration;

use clap::Args;

use atlas_core::ingest::IngestionPipeline;
use atlas_core::progress::IndicatifReporter;
use atlas_core::store::SqliteStore;
use atlas_core::types::IngestMode;

use super::RepoArgs;

#[derive(Args, Debug)]
pub struct IngestArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    /// Re-extract only files whose content changed since the active generation
    #[arg(long)]
    pub incremental: bool,

    /// Abort (writing nothing) after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

pub async fn run(args: IngestArgs) -> anyhow::Result<()> {
    let root = args.repo.root()?;
    let config = args.repo.config(&root)?;
    let db_path = args.repo.db_path(&root, &config);
    let store = Arc::new(SqliteStore::open(&db_path)?);

    let reporter = if args.no_progress {
        IndicatifReporter::hidden()
    } else {
        IndicatifReporter::new()
    };
    let pipeline = IngestionPipeline::new(store, config).with_reporter(Arc::new(reporter));
    let mode = if args.incremental {
        IngestMode::Incremental
    } else {
        IngestMode::Full
    };

    let cancel = super::cancel_on_ctrl_c();
    let report = match args.timeout_secs {
        Some(secs) => {
            pipeline
                .ingest_with_timeout(&root, mode, &cancel, Duration::from_secs(secs))
                .await?
        }
        None => pipeline.ingest(&root, mode, &cancel).await?,
    };
    super::print_json(&report)
}
