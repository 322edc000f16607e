//! Predicates over repositories and pull requests.
//!
//! The pull-request predicates decide whether a PR is a candidate breaking
//! update; the repository predicates gate discovery. All are total: a
//! predicate either answers, or a Forge failure propagates to the caller
//! (which logs and moves on — one bad unit of work never stops a batch).

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::github::client::{PullRequest, PullRequestSummary};
use crate::github::{Credential, ForgeError, GithubClient, PatchCache};
use crate::types::RepoId;

/// A diff header adding lines to a POM file.
static POM_XML_CHANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[+]{3}.*pom.xml$").expect("constant regex pattern is valid")
});

/// A removed and an added `<version>` line inside one `<dependency>` element.
static DEPENDENCY_VERSION_CHANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?sm)<dependency>(?:.*^[+-]\s*<version>.+</version>.*){2}</dependency>")
        .expect("constant regex pattern is valid")
});

/// Checks whether a pull request fulfills all of these properties:
///
/// - it changes only one line (one addition, one deletion, one file),
/// - the change is made to a pom.xml file,
/// - the change is to the version number in a version tag inside a
///   dependency declaration.
///
/// A rejected PR is evicted from the patch cache to bound memory.
pub async fn changes_only_dependency_version_in_pom_xml(
    pr: &PullRequest,
    cache: &PatchCache,
) -> bool {
    if pr.changed_files != 1 || pr.additions != 1 || pr.deletions != 1 {
        cache.evict(pr);
        return false;
    }

    let patch = cache.diff(pr).await.unwrap_or_default();
    if POM_XML_CHANGE.is_match(&patch) && DEPENDENCY_VERSION_CHANGE.is_match(&patch) {
        true
    } else {
        cache.evict(pr);
        false
    }
}

/// Checks whether this pull request broke a CI workflow: some completed,
/// failed workflow run triggered by a pull-request event on the PR's head
/// branch must have run against exactly the PR's head commit.
pub async fn breaks_build(
    pr: &PullRequest,
    repo: &RepoId,
    client: &GithubClient,
    cred: &Credential,
) -> Result<bool, ForgeError> {
    let runs = client
        .failed_pr_workflow_runs(cred, repo, &pr.head.branch)
        .await?;
    Ok(runs
        .workflow_runs
        .iter()
        .any(|run| run.head_sha == pr.head.sha))
}

/// Whether the PR was created strictly before the given instant. Used to
/// short-circuit paginated walks at a repository's watermark.
pub fn created_before(pr: &PullRequestSummary, instant: DateTime<Utc>) -> bool {
    pr.created_at < instant
}

/// Whether the repository is a Maven project: it contains a `pom.xml`
/// anywhere in the default-branch tree.
pub async fn is_maven_project(
    repo: &RepoId,
    default_branch: &str,
    client: &GithubClient,
    cred: &Credential,
) -> Result<bool, ForgeError> {
    let tree = client.tree(cred, repo, default_branch).await?;
    Ok(tree.tree.iter().any(|entry| entry.path.contains("pom.xml")))
}

/// Whether the repository has any workflow run triggered by a pull-request
/// event.
pub async fn has_pull_request_workflows(
    repo: &RepoId,
    client: &GithubClient,
    cred: &Credential,
) -> Result<bool, ForgeError> {
    client.has_pr_workflow_runs(cred, repo).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{jetty_bump_diff, two_file_diff};

    fn pr(changed_files: u64, additions: u64, deletions: u64) -> PullRequest {
        serde_json::from_value(serde_json::json!({
            "number": 4233,
            "html_url": "https://github.com/acme/widget/pull/4233",
            "diff_url": "https://github.com/acme/widget/pull/4233.diff",
            "created_at": "2022-06-01T10:00:00Z",
            "head": { "ref": "bump", "sha": "0123456789abcdef0123456789abcdef01234567" },
            "changed_files": changed_files,
            "additions": additions,
            "deletions": deletions
        }))
        .unwrap()
    }

    fn cache_with(pr: &PullRequest, diff: &str) -> PatchCache {
        let cache = PatchCache::new("token");
        cache.prime_diff(pr, diff);
        cache
    }

    #[tokio::test]
    async fn accepts_single_line_pom_version_bump() {
        let pr = pr(1, 1, 1);
        let cache = cache_with(&pr, &jetty_bump_diff());
        assert!(changes_only_dependency_version_in_pom_xml(&pr, &cache).await);
        // Accepted PRs stay cached for the candidate parser.
        assert!(cache.contains(&pr));
    }

    #[tokio::test]
    async fn rejects_two_changed_files_and_evicts() {
        let pr = pr(2, 1, 1);
        let cache = cache_with(&pr, &two_file_diff());
        assert!(!changes_only_dependency_version_in_pom_xml(&pr, &cache).await);
        assert!(!cache.contains(&pr), "rejected PR must be evicted");
    }

    #[tokio::test]
    async fn rejects_unbalanced_additions() {
        for (additions, deletions) in [(2, 1), (1, 2), (0, 1), (1, 0)] {
            let pr = pr(1, additions, deletions);
            let cache = cache_with(&pr, &jetty_bump_diff());
            assert!(
                !changes_only_dependency_version_in_pom_xml(&pr, &cache).await,
                "{additions}+/{deletions}- should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn rejects_non_pom_target_and_evicts() {
        let pr = pr(1, 1, 1);
        let diff = jetty_bump_diff().replace("pom.xml", "build.gradle");
        let cache = cache_with(&pr, &diff);
        assert!(!changes_only_dependency_version_in_pom_xml(&pr, &cache).await);
        assert!(!cache.contains(&pr), "rejected PR must be evicted");
    }

    #[tokio::test]
    async fn rejects_version_change_outside_dependency_block() {
        let pr = pr(1, 1, 1);
        let diff = jetty_bump_diff()
            .replace("<dependency>", "<parent>")
            .replace("</dependency>", "</parent>");
        let cache = cache_with(&pr, &diff);
        assert!(!changes_only_dependency_version_in_pom_xml(&pr, &cache).await);
    }

    #[test]
    fn created_before_compares_strictly() {
        let summary: PullRequestSummary = serde_json::from_value(serde_json::json!({
            "number": 1,
            "html_url": "https://github.com/a/b/pull/1",
            "created_at": "2022-06-01T10:00:00Z",
            "head": { "ref": "x", "sha": "0123456789abcdef0123456789abcdef01234567" }
        }))
        .unwrap();
        let exactly = summary.created_at;
        assert!(!created_before(&summary, exactly));
        assert!(created_before(&summary, exactly + chrono::Duration::seconds(1)));
        assert!(!created_before(&summary, exactly - chrono::Duration::seconds(1)));
    }
}
