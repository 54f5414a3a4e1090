use clap::Args;

use atlas_core::context::{ContextSelector, Focus, TaskType};
use atlas_core::error::AtlasError;

use super::RepoArgs;

#[derive(Args, Debug)]
pub struct ContextArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    /// Task description; its words locate the focus entity
    #[arg(required_unless_present = "entity")]
    pub task: Option<String>,

    /// Focus on this entity id instead of searching by task text
    #[arg(long)]
    pub entity: Option<String>,

    /// understand, modify, debug or review
    #[arg(long = "type", default_value = "understand")]
    pub task_type: String,

    /// Token budget (default from config)
    #[arg(long)]
    pub budget: Option<u32>,
}

pub async fn run(args: ContextArgs) -> anyhow::Result<()> {
    let task: TaskType = args.task_type.parse().map_err(AtlasError::from)?;
    let focus = match (args.entity, args.task) {
        (Some(id), _) => Focus::Entity(id),
        (None, Some(text)) => Focus::Keywords(text),
        (None, None) => anyhow::bail!("Either a task description or --entity is required"),
    };
    let (config, store) = args.repo.open_existing()?;
    let selector = ContextSelector::new(store, config.context);
    let pack = selector
        .select(&focus, task, args.budget, &super::cancel_on_ctrl_c())
        .await?;
    super::print_json(&pack)
}
