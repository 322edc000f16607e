//! Discovery and mining of candidate breaking updates.
//!
//! `find` populates the repository index with Java Maven projects that run
//! CI on pull requests, walking repository creation dates backwards one day
//! at a time (the Forge caps any search at 1000 results, so discovery
//! shards by creation date). `mine` walks the pull requests of every
//! indexed repository and emits a candidate record for each PR that bumps a
//! single dependency version in a POM and has a failing PR workflow run.
//!
//! Parallelism equals the token-pool size: the Forge counts concurrent
//! request streams against an abuse budget keyed by credential, so one
//! worker per credential maximizes throughput without tripping it.

pub mod candidate;
pub mod filters;
pub mod pom;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;

use crate::github::client::Repository;
use crate::github::{Credential, ForgeError, GithubClient, PatchCache, TokenPool};
use crate::store::json::{self, timestamp};
use crate::store::{RepositoryIndex, StoreError, JSON_FILE_ENDING};
use crate::types::RepoId;

use candidate::CandidateBuilder;

/// What repositories `find` searches for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    pub min_number_of_stars: u32,
    /// The oldest repository creation date the search walks back to.
    #[serde(with = "timestamp")]
    pub earliest_creation_date: DateTime<Utc>,
}

impl SearchConfig {
    pub fn from_file(path: &std::path::Path) -> Result<Self, StoreError> {
        json::read_json(path)
    }
}

/// Errors from the mining pipeline.
#[derive(Debug, Error)]
pub enum MineError {
    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The miner: discovery (`find`) and candidate emission (`mine`).
pub struct Miner {
    pool: Arc<TokenPool>,
    client: GithubClient,
    cache: Arc<PatchCache>,
    candidates_dir: PathBuf,
}

impl Miner {
    /// Creates a miner writing candidates into `candidates_dir` (created if
    /// missing). The patch cache authenticates with one credential from the
    /// pool; diff downloads are cheap enough not to need rotation.
    pub fn new(pool: Arc<TokenPool>, candidates_dir: PathBuf) -> Result<Self, MineError> {
        std::fs::create_dir_all(&candidates_dir)?;
        let cache = Arc::new(PatchCache::new(pool.acquire().token()));
        Ok(Miner {
            pool,
            client: GithubClient::new(),
            cache,
            candidates_dir,
        })
    }

    /// Populates the index with repositories matching the search config,
    /// walking creation dates backwards from `last` (default: today) to the
    /// configured earliest date. The index is persisted after every day so
    /// an interrupted search resumes cheaply via `--last`.
    ///
    /// Returns the number of repositories added.
    pub async fn find(
        &self,
        index: &RepositoryIndex,
        config: &SearchConfig,
        last: Option<DateTime<Utc>>,
    ) -> Result<usize, MineError> {
        let earliest = config.earliest_creation_date.date_naive();
        let mut day = last.unwrap_or_else(Utc::now).date_naive();
        let mut added = 0;

        while day >= earliest {
            match self.find_repositories_created_on(index, config, day).await {
                Ok(count) => {
                    added += count;
                    index.persist()?;
                }
                Err(e) => {
                    tracing::error!(date = %day, error = %e, "search failed for day; continuing");
                }
            }
            let Some(previous) = day.checked_sub_days(Days::new(1)) else {
                break;
            };
            day = previous;
        }

        tracing::info!(added, "repository discovery finished");
        Ok(added)
    }

    async fn find_repositories_created_on(
        &self,
        index: &RepositoryIndex,
        config: &SearchConfig,
        day: NaiveDate,
    ) -> Result<usize, MineError> {
        tracing::info!(date = %day, "checking repos created on this day");
        let cred = self.pool.acquire();
        cred.ensure_budget().await?;

        let mut added = 0;
        for page in 1..=10u32 {
            let results = self
                .client
                .search_repositories(&cred, config.min_number_of_stars, day, page)
                .await?;
            if results.items.is_empty() {
                break;
            }
            let page_len = results.items.len();

            for repo in results.items {
                if index.contains(&repo.full_name) {
                    continue;
                }
                match self.qualifies(&repo).await {
                    Ok(true) => {
                        tracing::info!(repo = %repo.full_name, "found repository");
                        index.add(&repo.full_name, &repo.html_url);
                        added += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(repo = %repo.full_name, error = %e, "repository probe failed");
                    }
                }
            }

            if page_len < 100 {
                break;
            }
        }
        Ok(added)
    }

    /// A repository qualifies when it is a Maven project and runs workflows
    /// on pull requests.
    async fn qualifies(&self, repo: &Repository) -> Result<bool, ForgeError> {
        let Some(repo_id) = repo.repo_id() else {
            return Ok(false);
        };
        let cred = self.pool.acquire();
        Ok(
            filters::is_maven_project(&repo_id, &repo.default_branch, &self.client, &cred).await?
                && filters::has_pull_request_workflows(&repo_id, &self.client, &cred).await?,
        )
    }

    /// Mines every indexed repository for candidate breaking updates, with
    /// one worker per pool credential. Each repository is processed
    /// end-to-end by one worker; the index is persisted after each.
    ///
    /// Returns the number of candidates emitted.
    pub async fn mine(self: &Arc<Self>, index: &Arc<RepositoryIndex>) -> Result<usize, MineError> {
        let queue: Arc<Mutex<VecDeque<String>>> =
            Arc::new(Mutex::new(index.names().into_iter().collect()));
        let workers = self.pool.len().max(1);

        let mut set = JoinSet::new();
        for _ in 0..workers {
            let miner = Arc::clone(self);
            let index = Arc::clone(index);
            let queue = Arc::clone(&queue);
            set.spawn(async move {
                let mut found = 0;
                loop {
                    let next = queue.lock().pop_front();
                    let Some(repo) = next else { break };
                    match miner.mine_repository(&index, &repo).await {
                        Ok(count) => found += count,
                        Err(e) => {
                            tracing::error!(repo = %repo, error = %e, "mining failed; continuing");
                        }
                    }
                }
                found
            });
        }

        let mut total = 0;
        while let Some(result) = set.join_next().await {
            total += result.unwrap_or(0);
        }
        tracing::info!(candidates = total, "mining finished");
        Ok(total)
    }

    /// Walks one repository's pull requests newest-first, stopping at the
    /// page whose head PR predates the watermark, then advances the
    /// watermark to the completion instant.
    async fn mine_repository(
        &self,
        index: &RepositoryIndex,
        full_name: &str,
    ) -> Result<usize, MineError> {
        let Some(repo_id) = RepoId::parse_full_name(full_name) else {
            tracing::warn!(repo = %full_name, "malformed index entry, skipping");
            return Ok(0);
        };

        let cred = self.pool.acquire();
        cred.ensure_budget().await?;

        tracing::info!(repo = %full_name, "checking repository");
        let repo = self.client.repository(&cred, &repo_id).await?;
        let watermark = index.last_checked(full_name);
        let mut found = 0;

        for page in 1..u32::MAX {
            let summaries = self.client.pull_request_page(&cred, &repo_id, page).await?;
            if summaries.is_empty() {
                break;
            }
            let page_len = summaries.len();
            // PRs arrive newest-first; once a whole page is behind the
            // watermark there is nothing new further back.
            if summaries
                .first()
                .is_some_and(|first| filters::created_before(first, watermark))
            {
                break;
            }

            for summary in summaries {
                match self
                    .process_pull_request(&cred, &repo, &repo_id, summary.number)
                    .await
                {
                    Ok(true) => found += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(
                            repo = %full_name,
                            pr = summary.number,
                            error = %e,
                            "could not evaluate pull request"
                        );
                    }
                }
            }

            if page_len < 100 {
                break;
            }
        }

        index.set_checked(full_name, Utc::now());
        index.persist()?;
        tracing::info!(repo = %full_name, found, "done checking repository");
        Ok(found)
    }

    /// Applies both PR predicates and emits the candidate file on success.
    async fn process_pull_request(
        &self,
        cred: &Credential,
        repo: &Repository,
        repo_id: &RepoId,
        number: u64,
    ) -> Result<bool, MineError> {
        let pr = self.client.pull_request(cred, repo_id, number).await?;

        if !filters::changes_only_dependency_version_in_pom_xml(&pr, &self.cache).await {
            return Ok(false);
        }
        if !filters::breaks_build(&pr, repo_id, &self.client, cred).await? {
            self.cache.evict(&pr);
            return Ok(false);
        }

        let builder = CandidateBuilder::new(&self.client, &self.cache);
        let bu = builder.build(cred, repo, repo_id, &pr).await?;

        let dependency = &bu.updated_dependency;
        if dependency.previous_version == dependency.new_version {
            tracing::warn!(
                pr = %bu.url,
                version = %dependency.previous_version,
                "version bump resolves to no change, skipping"
            );
            return Ok(false);
        }

        let path = self
            .candidates_dir
            .join(format!("{}{}", bu.breaking_commit, JSON_FILE_ENDING));
        json::write_json(&path, &bu)?;
        tracing::info!(pr = %bu.url, breaking_commit = %bu.breaking_commit, "found breaking update");
        Ok(true)
    }
}
