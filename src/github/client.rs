//! Typed Forge operations.
//!
//! This module wraps the octocrab transport with the exact set of REST
//! operations the miner and reproducer need, deserializing into DTOs owned
//! by this crate so the wire models carry exactly the fields that are used.
//! Every operation takes the [`Credential`] it should run under; callers
//! acquire one from the pool and pass it through the call chain rather than
//! relying on ambient state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RepoId;

use super::error::ForgeError;
use super::retry::{retry_forge_call, RetryConfig};
use super::token_pool::Credential;

/// Page size used for all list endpoints.
const PAGE_SIZE: u8 = 100;

// ─── Wire models ──────────────────────────────────────────────────────────────

/// A Forge user or bot account.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub login: String,
    #[serde(rename = "type")]
    pub account_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct License {
    pub name: String,
}

/// A repository as returned by search and lookup endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    pub owner: Account,
    pub default_branch: String,
    #[serde(default)]
    pub license: Option<License>,
}

impl Repository {
    pub fn repo_id(&self) -> Option<RepoId> {
        RepoId::parse_full_name(&self.full_name)
    }
}

/// The head ref of a pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct PrHead {
    #[serde(rename = "ref")]
    pub branch: String,
    pub sha: String,
}

/// A pull request as returned by the list endpoint. The list form carries no
/// change-size counters; fetch the full [`PullRequest`] for those.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestSummary {
    pub number: u64,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    pub head: PrHead,
}

/// A pull request as returned by the single-PR endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
    pub diff_url: String,
    pub created_at: DateTime<Utc>,
    pub head: PrHead,
    #[serde(default)]
    pub user: Option<Account>,
    pub changed_files: u64,
    pub additions: u64,
    pub deletions: u64,
}

/// A commit with its author and parent links.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    #[serde(default)]
    pub author: Option<Account>,
    #[serde(default)]
    pub parents: Vec<CommitRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitRef {
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreeEntry {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tree {
    pub tree: Vec<TreeEntry>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub head_sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRuns {
    pub total_count: u64,
    pub workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage<T> {
    pub total_count: u64,
    pub items: Vec<T>,
}

// ─── Client ───────────────────────────────────────────────────────────────────

/// Typed Forge operations, one method per endpoint in use.
#[derive(Debug, Default, Clone)]
pub struct GithubClient {
    retry: RetryConfig,
}

impl GithubClient {
    pub fn new() -> Self {
        GithubClient {
            retry: RetryConfig::DEFAULT,
        }
    }

    pub fn with_retry(retry: RetryConfig) -> Self {
        GithubClient { retry }
    }

    async fn get<T, P>(
        &self,
        cred: &Credential,
        route: String,
        parameters: Option<&P>,
    ) -> Result<T, ForgeError>
    where
        T: serde::de::DeserializeOwned,
        P: Serialize + ?Sized,
    {
        retry_forge_call(self.retry, || async {
            cred.octocrab()
                .get::<T, _, _>(&route, parameters)
                .await
                .map_err(ForgeError::from_octocrab)
        })
        .await
    }

    /// Searches repositories created on the given day: Java language,
    /// parent-only (no forks), at least `min_stars` stars, sorted by stars
    /// descending. One page of at most 100 results; the Forge caps any
    /// search at 1000 results, which is why discovery shards by day.
    pub async fn search_repositories(
        &self,
        cred: &Credential,
        min_stars: u32,
        created_on: NaiveDate,
        page: u32,
    ) -> Result<SearchPage<Repository>, ForgeError> {
        #[derive(Serialize)]
        struct Params {
            q: String,
            sort: &'static str,
            order: &'static str,
            per_page: u8,
            page: u32,
        }
        let params = Params {
            q: format!("language:Java fork:false stars:>={min_stars} created:{created_on}"),
            sort: "stars",
            order: "desc",
            per_page: PAGE_SIZE,
            page,
        };
        self.get(cred, "/search/repositories".to_string(), Some(&params))
            .await
    }

    pub async fn repository(
        &self,
        cred: &Credential,
        repo: &RepoId,
    ) -> Result<Repository, ForgeError> {
        self.get(cred, format!("/repos/{repo}"), None::<&()>).await
    }

    /// Lists one page of pull requests in creation-descending order, any
    /// state. Pages are 1-indexed.
    pub async fn pull_request_page(
        &self,
        cred: &Credential,
        repo: &RepoId,
        page: u32,
    ) -> Result<Vec<PullRequestSummary>, ForgeError> {
        #[derive(Serialize)]
        struct Params {
            state: &'static str,
            sort: &'static str,
            direction: &'static str,
            per_page: u8,
            page: u32,
        }
        let params = Params {
            state: "all",
            sort: "created",
            direction: "desc",
            per_page: PAGE_SIZE,
            page,
        };
        self.get(cred, format!("/repos/{repo}/pulls"), Some(&params))
            .await
    }

    /// Fetches the full pull request, including the change-size counters the
    /// list endpoint omits.
    pub async fn pull_request(
        &self,
        cred: &Credential,
        repo: &RepoId,
        number: u64,
    ) -> Result<PullRequest, ForgeError> {
        self.get(cred, format!("/repos/{repo}/pulls/{number}"), None::<&()>)
            .await
    }

    /// The repository tree of the given branch, recursively.
    pub async fn tree(
        &self,
        cred: &Credential,
        repo: &RepoId,
        branch: &str,
    ) -> Result<Tree, ForgeError> {
        #[derive(Serialize)]
        struct Params {
            recursive: &'static str,
        }
        self.get(
            cred,
            format!("/repos/{repo}/git/trees/{branch}"),
            Some(&Params { recursive: "1" }),
        )
        .await
    }

    /// Failed, completed workflow runs triggered by pull-request events on
    /// the given branch. The Forge folds run conclusions into the `status`
    /// query parameter, so `status=failure` selects completed-and-failed
    /// runs; callers still match `head_sha` exactly.
    pub async fn failed_pr_workflow_runs(
        &self,
        cred: &Credential,
        repo: &RepoId,
        branch: &str,
    ) -> Result<WorkflowRuns, ForgeError> {
        #[derive(Serialize)]
        struct Params<'a> {
            event: &'static str,
            status: &'static str,
            branch: &'a str,
            per_page: u8,
        }
        let params = Params {
            event: "pull_request",
            status: "failure",
            branch,
            per_page: PAGE_SIZE,
        };
        self.get(cred, format!("/repos/{repo}/actions/runs"), Some(&params))
            .await
    }

    /// Whether the repository has ever run a workflow for a pull-request
    /// event. A single-result page is enough; only the count matters.
    pub async fn has_pr_workflow_runs(
        &self,
        cred: &Credential,
        repo: &RepoId,
    ) -> Result<bool, ForgeError> {
        #[derive(Serialize)]
        struct Params {
            event: &'static str,
            per_page: u8,
        }
        let params = Params {
            event: "pull_request",
            per_page: 1,
        };
        let runs: WorkflowRuns = self
            .get(cred, format!("/repos/{repo}/actions/runs"), Some(&params))
            .await?;
        Ok(runs.total_count > 0)
    }

    pub async fn commit(
        &self,
        cred: &Credential,
        repo: &RepoId,
        sha: &str,
    ) -> Result<CommitInfo, ForgeError> {
        self.get(cred, format!("/repos/{repo}/commits/{sha}"), None::<&()>)
            .await
    }

    /// One page of repository tags. Pages are 1-indexed.
    pub async fn tag_page(
        &self,
        cred: &Credential,
        repo_full_name: &str,
        page: u32,
    ) -> Result<Vec<Tag>, ForgeError> {
        #[derive(Serialize)]
        struct Params {
            per_page: u8,
            page: u32,
        }
        let params = Params {
            per_page: PAGE_SIZE,
            page,
        };
        self.get(cred, format!("/repos/{repo_full_name}/tags"), Some(&params))
            .await
    }

    /// Appends one file to a cache repository as a fresh commit on the given
    /// branch, via the git data API: blob, tree, commit, ref update.
    pub async fn push_file(
        &self,
        cred: &Credential,
        cache_repo: &str,
        branch: &str,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), ForgeError> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        #[derive(Deserialize)]
        struct Ref {
            object: RefObject,
        }
        #[derive(Deserialize)]
        struct RefObject {
            sha: String,
        }
        #[derive(Deserialize)]
        struct Created {
            sha: String,
        }

        let octocrab = cred.octocrab();
        let head: Ref = octocrab
            .get(
                format!("/repos/{cache_repo}/git/ref/heads/{branch}"),
                None::<&()>,
            )
            .await
            .map_err(ForgeError::from_octocrab)?;

        let blob: Created = octocrab
            .post(
                format!("/repos/{cache_repo}/git/blobs"),
                Some(&serde_json::json!({
                    "content": STANDARD.encode(content),
                    "encoding": "base64",
                })),
            )
            .await
            .map_err(ForgeError::from_octocrab)?;

        let tree: Created = octocrab
            .post(
                format!("/repos/{cache_repo}/git/trees"),
                Some(&serde_json::json!({
                    "base_tree": head.object.sha,
                    "tree": [{
                        "path": path,
                        "mode": "100644",
                        "type": "blob",
                        "sha": blob.sha,
                    }],
                })),
            )
            .await
            .map_err(ForgeError::from_octocrab)?;

        let commit: Created = octocrab
            .post(
                format!("/repos/{cache_repo}/git/commits"),
                Some(&serde_json::json!({
                    "message": message,
                    "tree": tree.sha,
                    "parents": [head.object.sha],
                })),
            )
            .await
            .map_err(ForgeError::from_octocrab)?;

        let _: serde_json::Value = octocrab
            .patch(
                format!("/repos/{cache_repo}/git/refs/heads/{branch}"),
                Some(&serde_json::json!({ "sha": commit.sha })),
            )
            .await
            .map_err(ForgeError::from_octocrab)?;

        Ok(())
    }
}
