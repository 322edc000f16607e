//! Reproducer tool entry point: verify candidate breaking updates inside
//! containers and place the results in the benchmark.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use breaking_updates::container::docker::DockerCli;
use breaking_updates::container::RegistryCredentials;
use breaking_updates::github::TokenPool;
use breaking_updates::reproducer::results::{Enrichment, ResultManager, ResultPaths};
use breaking_updates::reproducer::Reproducer;

#[derive(Parser)]
#[command(version, about = "Reproduces candidate breaking updates in containers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reproduce candidates and place records in the benchmark.
    Reproduce {
        /// A file containing a newline separated list of GitHub API tokens
        #[arg(short = 'a', long, value_name = "TOKEN-FILE")]
        api_tokens: PathBuf,

        /// Directory for successfully reproduced breaking update records
        #[arg(short = 'b', long, value_name = "BENCHMARK-DIR")]
        benchmark_dir: PathBuf,

        /// Directory for attempted-but-unreproducible records
        #[arg(short = 'u', long, value_name = "UNSUCCESSFUL-DIR")]
        unsuccessful_reproductions_dir: PathBuf,

        /// Directory holding candidate records pending reproduction
        #[arg(short = 'i', long, value_name = "IN-PROGRESS-DIR")]
        in_progress_reproductions_dir: PathBuf,

        /// Directory for Maven build logs
        #[arg(short = 'l', long, value_name = "LOG-DIR")]
        log_dir: PathBuf,

        /// Directory for extracted dependency jar/pom files
        #[arg(short = 'j', long, value_name = "JAR-DIR")]
        jar_dir: PathBuf,

        /// A JSON file with the credentials for pushing images to the registry
        #[arg(short = 'c', long, value_name = "CREDENTIALS-FILE")]
        github_packages_credentials: PathBuf,

        /// A single candidate JSON file to reproduce instead of the whole
        /// in-progress directory
        #[arg(short = 'f', long, value_name = "BREAKING-UPDATE-FILE")]
        file: Option<PathBuf>,
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

/// All candidate files in the in-progress directory, in name order.
fn candidate_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("could not list candidate directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "breaking_updates=info,reproducer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Argument errors exit with 1, like IO errors.
    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(1);
    });
    let Command::Reproduce {
        api_tokens,
        benchmark_dir,
        unsuccessful_reproductions_dir,
        in_progress_reproductions_dir,
        log_dir,
        jar_dir,
        github_packages_credentials,
        file,
    } = cli.command;

    let tokens = read_tokens(&api_tokens)?;
    let pool = Arc::new(TokenPool::new(tokens).await?);
    let credentials = RegistryCredentials::from_file(&github_packages_credentials)
        .with_context(|| {
            format!(
                "unreadable registry credentials {}",
                github_packages_credentials.display()
            )
        })?;

    let files = match file {
        Some(file) => vec![file],
        None => candidate_files(&in_progress_reproductions_dir)?,
    };
    tracing::info!(candidates = files.len(), "starting reproduction");

    let runner = Arc::new(DockerCli::new());
    let results = ResultManager::new(
        Arc::clone(&runner),
        ResultPaths {
            benchmark_dir,
            unsuccessful_dir: unsuccessful_reproductions_dir,
            candidates_dir: in_progress_reproductions_dir,
            log_dir,
            jar_dir,
            metadata_file: PathBuf::from("image_metadata.json"),
        },
        credentials,
        Some(Enrichment::new(Arc::clone(&pool))),
    )?;

    let reproducer = Arc::new(Reproducer::new(runner, results, pool.len()));
    reproducer.reproduce_all(files).await?;
    Ok(())
}
