use clap::Parser;

use atlas_core::error::AtlasError;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "atlas",
    version,
    about = "Index a codebase into a queryable graph and pack context for agents"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into an exit code.
///
///   0: success
///   1: general/unknown error
///   2: configuration error
///   3: path not found / nothing ingested
///   4: store unavailable
///   5: invalid query
///   6: clustering failed
///   7: extraction failed
///   8: cancelled
///   9: timed out
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    if let Some(atlas) = err.downcast_ref::<AtlasError>() {
        return match atlas.class() {
            "invalid_config" => 2,
            "store_unavailable" => 4,
            "invalid_query" => 5,
            "cluster_failed" => 6,
            "extract_failed" => 7,
            "cancelled" => 8,
            "timeout" => 9,
            _ => 1,
        };
    }
    let lower = format!("{err:#}").to_lowercase();
    if lower.contains("no index in") || lower.contains("cannot resolve path") {
        3
    } else if lower.contains("predicate") {
        5
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(commands::run(cli.command)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use atlas_core::error::{ConfigError, QueryError, StoreError};

    use super::*;

    #[test]
    fn exit_code_from_error_class() {
        let err = anyhow::Error::from(AtlasError::from(ConfigError::Invalid("bad".into())));
        assert_eq!(classify_exit_code(&err), 2);

        let err = anyhow::Error::from(AtlasError::from(StoreError::Unavailable {
            path: "/x".into(),
            message: "denied".into(),
        }));
        assert_eq!(classify_exit_code(&err), 4);

        let err = anyhow::Error::from(AtlasError::from(QueryError::MissingInput("seed".into())));
        assert_eq!(classify_exit_code(&err), 5);

        let err = anyhow::Error::from(AtlasError::Timeout(Duration::from_secs(1)));
        assert_eq!(classify_exit_code(&err), 9);
    }

    #[test]
    fn exit_code_survives_context() {
        use anyhow::Context as _;
        let result: Result<(), AtlasError> = Err(AtlasError::Cancelled);
        let err = result.context("Ingestion failed").unwrap_err();
        assert_eq!(classify_exit_code(&err), 8);
    }

    #[test]
    fn exit_code_not_ingested() {
        let err = anyhow::anyhow!("No index in /foo. Run `atlas ingest` first.");
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_general() {
        let err = anyhow::anyhow!("Something unexpected happened");
        assert_eq!(classify_exit_code(&err), 1);
    }
}
