use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};

use atlas_core::cluster::ClusterEngine;
use atlas_core::progress::IndicatifReporter;
use atlas_core::query::{ClusterSelector, QueryEngine, QueryRequest, Strategy};
use atlas_core::store::GraphStore;

use super::RepoArgs;

#[derive(Args, Debug)]
pub struct ClustersArgs {
    #[command(subcommand)]
    pub action: ClustersAction,
}

#[derive(Subcommand, Debug)]
pub enum ClustersAction {
    /// Recompute clusters for the active generation
    Run {
        #[command(flatten)]
        repo: RepoArgs,

        /// Abort (publishing nothing) after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Show clusters by name pattern, by member entity, or all of them
    Show {
        #[command(flatten)]
        repo: RepoArgs,

        #[arg(long, conflicts_with = "entity")]
        name: Option<String>,

        #[arg(long)]
        entity: Option<String>,
    },
}

pub async fn run(args: ClustersArgs) -> anyhow::Result<()> {
    match args.action {
        ClustersAction::Run { repo, timeout_secs } => {
            let (config, store) = repo.open_existing()?;
            let engine = ClusterEngine::new(store, config.cluster)
                .with_reporter(Arc::new(IndicatifReporter::new()));
            let cancel = super::cancel_on_ctrl_c();
            let report = match timeout_secs {
                Some(secs) => {
                    engine
                        .run_with_timeout(&cancel, Duration::from_secs(secs))
                        .await?
                }
                None => engine.run(&cancel).await?,
            };
            super::print_json(&report)
        }
        ClustersAction::Show { repo, name, entity } => {
            let (config, store) = repo.open_existing()?;
            let selector = match (name, entity) {
                (Some(pattern), _) => ClusterSelector::Name(pattern),
                (None, Some(id)) => ClusterSelector::Entity(id),
                (None, None) => {
                    let Some(generation) = store.active_generation().await? else {
                        return super::print_json(&Vec::<()>::new());
                    };
                    let clusters = store.load_clusters(&generation.generation_id).await?;
                    return super::print_json(&clusters);
                }
            };
            let engine = QueryEngine::new(store, config.query);
            let request = QueryRequest {
                strategy: Strategy::Cluster,
                cluster: Some(selector),
                ..QueryRequest::default()
            };
            let response = engine.run(&request, &super::cancel_on_ctrl_c()).await?;
            super::print_json(&response)
        }
    }
}
