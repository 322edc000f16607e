//! Memoized fetches of pull-request diffs and file contents.
//!
//! The single-line filter, the candidate parser and the section resolver all
//! look at the same diff, so the first fetch is cached for the lifetime of
//! the run. A second map caches file contents at a commit (the POM at the
//! breaking commit). Both maps are process-local and unbounded; filters
//! evict the diff of every rejected PR, which in practice keeps the cache at
//! the size of the accepted set.
//!
//! Cache misses fetch over plain HTTP with bearer auth. Fetch failures are
//! logged and surface as an empty result; two racing misses fetching the
//! same key twice is acceptable.

use std::collections::HashMap;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::types::Sha;

use super::client::PullRequest;

/// HTTP timeouts for diff and contents fetches.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

pub struct PatchCache {
    http: reqwest::Client,
    token: String,
    diffs: Mutex<HashMap<String, String>>,
    files: Mutex<HashMap<String, String>>,
}

impl PatchCache {
    /// Creates a cache that authenticates its fetches with the given token.
    pub fn new(token: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .unwrap_or_default();
        PatchCache {
            http,
            token: token.into(),
            diffs: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
        }
    }

    /// The unified diff of a pull request, fetched on first use.
    pub async fn diff(&self, pr: &PullRequest) -> Option<String> {
        if let Some(diff) = self.diffs.lock().get(&pr.diff_url) {
            return Some(diff.clone());
        }
        match self.fetch_diff(pr).await {
            Ok(diff) => {
                self.diffs.lock().insert(pr.diff_url.clone(), diff.clone());
                Some(diff)
            }
            Err(e) => {
                tracing::error!(pr = %pr.html_url, error = %e, "failed to fetch PR diff");
                None
            }
        }
    }

    /// The contents of a file at a commit, fetched through the Forge's
    /// contents API on first use. Cached by commit: each breaking commit
    /// involves exactly one POM.
    pub async fn file_at_commit(
        &self,
        org: &str,
        project: &str,
        commit: &Sha,
        path: &str,
    ) -> Option<String> {
        if let Some(content) = self.files.lock().get(commit.as_str()) {
            return Some(content.clone());
        }
        match self.fetch_file(org, project, commit, path).await {
            Ok(content) => {
                self.files
                    .lock()
                    .insert(commit.as_str().to_string(), content.clone());
                Some(content)
            }
            Err(e) => {
                tracing::error!(
                    breaking_commit = %commit,
                    path,
                    error = %e,
                    "failed to fetch file contents"
                );
                None
            }
        }
    }

    /// Seeds the diff cache directly, bypassing the network. Test-only.
    #[cfg(test)]
    pub fn prime_diff(&self, pr: &PullRequest, diff: &str) {
        self.diffs
            .lock()
            .insert(pr.diff_url.clone(), diff.to_string());
    }

    /// Drops a rejected PR's diff to bound memory.
    pub fn evict(&self, pr: &PullRequest) {
        self.diffs.lock().remove(&pr.diff_url);
    }

    /// Whether a diff for this PR is currently cached.
    pub fn contains(&self, pr: &PullRequest) -> bool {
        self.diffs.lock().contains_key(&pr.diff_url)
    }

    async fn fetch_diff(&self, pr: &PullRequest) -> Result<String, reqwest::Error> {
        self.http
            .get(&pr.diff_url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    async fn fetch_file(
        &self,
        org: &str,
        project: &str,
        commit: &Sha,
        path: &str,
    ) -> Result<String, FileFetchError> {
        #[derive(Deserialize)]
        struct Contents {
            content: String,
        }

        let url =
            format!("https://api.github.com/repos/{org}/{project}/contents/{path}?ref={commit}");
        let contents: Contents = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "breaking-updates")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // The contents API wraps base64 payloads at 60 columns.
        let sanitized: String = contents
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = BASE64.decode(sanitized)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Debug, thiserror::Error)]
enum FileFetchError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}
