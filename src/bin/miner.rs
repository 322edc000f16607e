//! Mining tool entry point: discover repositories and mine them for
//! candidate breaking updates.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use breaking_updates::github::TokenPool;
use breaking_updates::miner::{Miner, SearchConfig};
use breaking_updates::store::json;
use breaking_updates::store::RepositoryIndex;

#[derive(Parser)]
#[command(version, about = "Mines GitHub for breaking dependency updates")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Find Maven repositories with pull-request workflows and record them
    /// in the repository index.
    Find {
        /// A file containing a newline separated list of GitHub API tokens
        #[arg(short = 'a', long, value_name = "TOKEN-FILE")]
        api_tokens: PathBuf,

        /// A directory where output data will be stored
        #[arg(short = 'o', long, value_name = "OUTPUT-DIR")]
        output_directory: PathBuf,

        /// A JSON file specifying details about the repositories to search for
        #[arg(short = 's', long, value_name = "SEARCH-CONFIG")]
        search_config: PathBuf,

        /// A JSON file containing previously found repositories, updated in
        /// place. Defaults to repositoryIndex.json in the output directory.
        #[arg(short = 'r', long, value_name = "REPO-FILE")]
        repos: Option<PathBuf>,

        /// Resume the date walk from this instant instead of now
        /// (yyyy-MM-dd HH:mm:ss)
        #[arg(short = 'l', long, value_name = "LAST-DATE")]
        last: Option<String>,
    },

    /// Mine the indexed repositories for breaking updates.
    Mine {
        /// A file containing a newline separated list of GitHub API tokens
        #[arg(short = 'a', long, value_name = "TOKEN-FILE")]
        api_tokens: PathBuf,

        /// A directory where output data will be stored
        #[arg(short = 'o', long, value_name = "OUTPUT-DIR")]
        output_directory: PathBuf,

        /// The repository index as written by the find subcommand
        #[arg(short = 'r', long, value_name = "REPO-FILE")]
        repos: PathBuf,
    },
}

fn read_tokens(path: &Path) -> anyhow::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("could not read token file {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "breaking_updates=info,miner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Argument errors exit with 1, like IO errors.
    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(1);
    });
    match cli.command {
        Command::Find {
            api_tokens,
            output_directory,
            search_config,
            repos,
            last,
        } => {
            let tokens = read_tokens(&api_tokens)?;
            let pool = Arc::new(TokenPool::new(tokens).await?);
            let config = SearchConfig::from_file(&search_config)
                .with_context(|| format!("unreadable search config {}", search_config.display()))?;
            let last = last
                .map(|value| {
                    json::parse_timestamp(&value)
                        .with_context(|| format!("invalid --last date {value:?}"))
                })
                .transpose()?;

            let index_path = repos.unwrap_or_else(|| output_directory.join("repositoryIndex.json"));
            std::fs::create_dir_all(&output_directory)?;
            let index = RepositoryIndex::load(&index_path)?;

            let miner = Miner::new(pool, output_directory.join("candidates"))?;
            let added = miner.find(&index, &config, last).await?;
            tracing::info!(added, index = %index_path.display(), "find finished");
        }
        Command::Mine {
            api_tokens,
            output_directory,
            repos,
        } => {
            let tokens = read_tokens(&api_tokens)?;
            let pool = Arc::new(TokenPool::new(tokens).await?);
            let index = Arc::new(RepositoryIndex::load(&repos)?);

            let miner = Arc::new(Miner::new(pool, output_directory.join("candidates"))?);
            let found = miner.mine(&index).await?;
            tracing::info!(found, "mine finished");
        }
    }
    Ok(())
}
