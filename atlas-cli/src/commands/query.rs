use std::time::Duration;

use anyhow::Context;
use clap::{Args, ValueEnum};

use atlas_core::query::{ClusterSelector, QueryEngine, QueryRequest, Strategy, TraversalSpec};
use atlas_core::store::Predicate;
use atlas_core::types::Direction;

use super::RepoArgs;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    Auto,
    Metadata,
    Signature,
    Body,
    Traversal,
    Cluster,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Auto => Self::Auto,
            StrategyArg::Metadata => Self::Metadata,
            StrategyArg::Signature => Self::Signature,
            StrategyArg::Body => Self::Body,
            StrategyArg::Traversal => Self::Traversal,
            StrategyArg::Cluster => Self::Cluster,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionArg {
    Forward,
    Reverse,
}

#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct QueryArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    /// Query strategy
    #[arg(long, value_enum, default_value = "auto")]
    pub strategy: StrategyArg,

    /// Predicate as JSON, e.g. '{"cmp":{"field":"signature","op":"contains","value":"-> User"}}'
    #[arg(long, conflicts_with = "pattern")]
    pub predicate: Option<String>,

    /// Substring matched against names, qualified names and paths
    #[arg(long)]
    pub pattern: Option<String>,

    /// Traversal seed entity id
    #[arg(long)]
    pub seed: Option<String>,

    #[arg(long, value_enum, default_value = "forward")]
    pub direction: DirectionArg,

    /// Traversal depth in hops
    #[arg(long, default_value_t = 2)]
    pub depth: u32,

    /// Cluster name pattern
    #[arg(long, conflicts_with = "cluster_entity")]
    pub cluster_name: Option<String>,

    /// Entity whose cluster to return
    #[arg(long)]
    pub cluster_entity: Option<String>,

    #[arg(long)]
    pub include_body: bool,

    /// Attach forward and reverse references to each entity
    #[arg(long)]
    pub include_refs: bool,

    #[arg(long)]
    pub include_tests: bool,

    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl QueryArgs {
    fn request(&self) -> anyhow::Result<QueryRequest> {
        let mut request = match (&self.pattern, &self.predicate) {
            (Some(text), _) => QueryRequest::pattern(text),
            (None, Some(json)) => QueryRequest {
                predicate: Some(
                    serde_json::from_str::<Predicate>(json).context("Invalid predicate JSON")?,
                ),
                ..QueryRequest::default()
            },
            (None, None) => QueryRequest::default(),
        };
        request.strategy = self.strategy.into();
        request.traversal = self.seed.as_ref().map(|seed| TraversalSpec {
            seed: seed.clone(),
            direction: match self.direction {
                DirectionArg::Forward => Direction::Forward,
                DirectionArg::Reverse => Direction::Reverse,
            },
            max_depth: self.depth,
        });
        request.cluster = match (&self.cluster_name, &self.cluster_entity) {
            (Some(name), _) => Some(ClusterSelector::Name(name.clone())),
            (None, Some(id)) => Some(ClusterSelector::Entity(id.clone())),
            (None, None) => None,
        };
        request.include_body = self.include_body;
        request.include_refs = self.include_refs;
        request.include_tests = self.include_tests;
        request.limit = self.limit;
        request.timeout = self.timeout_ms.map(Duration::from_millis);
        Ok(request)
    }
}

pub async fn run(args: QueryArgs) -> anyhow::Result<()> {
    let request = args.request()?;
    let (config, store) = args.repo.open_existing()?;
    let engine = QueryEngine::new(store, config.query);
    let response = engine.run(&request, &super::cancel_on_ctrl_c()).await?;
    super::print_json(&response)
}
