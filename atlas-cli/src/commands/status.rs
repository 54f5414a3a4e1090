use clap::Args;
use serde::Serialize;

use atlas_core::store::GraphStore;
use atlas_core::types::{Generation, StoreStats};

use super::RepoArgs;

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub repo: RepoArgs,
}

#[derive(Serialize)]
struct Status {
    root: String,
    database: String,
    active: Option<StoreStats>,
    generations: Vec<Generation>,
}

pub async fn run(args: StatusArgs) -> anyhow::Result<()> {
    let root = args.repo.root()?;
    let (config, store) = args.repo.open_existing()?;

    let generations = store.list_generations().await?;
    let active = match store.active_generation().await? {
        Some(g) => Some(store.stats(&g.generation_id).await?),
        None => None,
    };

    super::print_json(&Status {
        root: root.display().to_string(),
        database: args.repo.db_path(&root, &config).display().to_string(),
        active,
        generations,
    })
}
