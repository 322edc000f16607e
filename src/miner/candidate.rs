//! Constructs a [`BreakingUpdate`] record from an accepted pull request.
//!
//! The updated-dependency coordinate is extracted from the unified diff with
//! line-anchored regexes; a missing match falls back to the documented
//! default (`unknown` identifiers, `compile` scope). The declaring POM
//! section is resolved by fetching the POM at the breaking commit and
//! walking the Maven model. Authorship takes three Forge queries: the PR
//! user, the parent-commit author and the breaking-commit author.

use std::sync::LazyLock;

use regex::Regex;

use crate::github::client::{PullRequest, Repository};
use crate::github::{Credential, ForgeError, GithubClient, PatchCache};
use crate::types::{
    AuthorType, BreakingUpdate, DependencyScope, DependencySection, RepoId, Sha, UpdatedDependency,
    VersionUpdateType,
};

static DEPENDENCY_GROUP_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*<groupId>(.*)</groupId>\s*$").expect("constant regex pattern is valid")
});

static DEPENDENCY_ARTIFACT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*<artifactId>(.*)</artifactId>\s*$")
        .expect("constant regex pattern is valid")
});

static PREVIOUS_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^-\s*<version>(.*?)</version>(?:\s*<!--(?:.*?)-->)?\s*$")
        .expect("constant regex pattern is valid")
});

static NEW_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\+\s*<version>(.*?)</version>(?:\s*<!--(?:.*?)-->)?\s*$")
        .expect("constant regex pattern is valid")
});

static SCOPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*<scope>(.*)</scope>\s*$").expect("constant regex pattern is valid")
});

/// Builds candidate records from pull requests the filters accepted.
pub struct CandidateBuilder<'a> {
    client: &'a GithubClient,
    cache: &'a PatchCache,
}

impl<'a> CandidateBuilder<'a> {
    pub fn new(client: &'a GithubClient, cache: &'a PatchCache) -> Self {
        CandidateBuilder { client, cache }
    }

    /// Assembles the full record. Author and section lookups are
    /// best-effort: a failed query stores the documented default rather
    /// than failing the candidate.
    pub async fn build(
        &self,
        cred: &Credential,
        repo: &Repository,
        repo_id: &RepoId,
        pr: &PullRequest,
    ) -> Result<BreakingUpdate, ForgeError> {
        let breaking_commit = Sha::parse(&pr.head.sha)
            .map_err(|e| ForgeError::permanent(format!("PR head is not a commit SHA: {e}")))?;

        let patch = self.cache.diff(pr).await.unwrap_or_default();
        let group_id = first_capture(&DEPENDENCY_GROUP_ID, &patch).unwrap_or("unknown");
        let artifact_id = first_capture(&DEPENDENCY_ARTIFACT_ID, &patch).unwrap_or("unknown");
        let previous_version = first_capture(&PREVIOUS_VERSION, &patch).unwrap_or("unknown");
        let new_version = first_capture(&NEW_VERSION, &patch).unwrap_or("unknown");
        let scope = first_capture(&SCOPE, &patch)
            .map(DependencyScope::parse)
            .unwrap_or_default();

        let section = self
            .resolve_section(repo_id, &breaking_commit, &patch, group_id, artifact_id)
            .await;

        let pr_author = pr
            .user
            .as_ref()
            .map(|user| AuthorType::from_account(&user.account_type, &user.login))
            .unwrap_or(AuthorType::Unknown);
        let (pre_commit_author, breaking_commit_author) =
            self.commit_authors(cred, repo_id, &breaking_commit).await;

        let license_info = repo
            .license
            .as_ref()
            .map(|license| license.name.clone())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(BreakingUpdate {
            url: pr.html_url.clone(),
            project: repo.name.clone(),
            project_organisation: repo.owner.login.clone(),
            breaking_commit,
            pr_author,
            pre_commit_author,
            breaking_commit_author,
            license_info,
            updated_dependency: UpdatedDependency {
                dependency_group_id: group_id.to_string(),
                dependency_artifact_id: artifact_id.to_string(),
                previous_version: previous_version.to_string(),
                new_version: new_version.to_string(),
                dependency_scope: scope,
                version_update_type: VersionUpdateType::classify(previous_version, new_version),
                dependency_section: section,
            },
            failure_category: None,
            java_version_used_for_reproduction: None,
            pre_commit_reproduction_command: None,
            breaking_update_reproduction_command: None,
            github_compare_link: None,
            maven_source_link_pre: None,
            maven_source_link_breaking: None,
            updated_file_type: None,
        })
    }

    /// Resolves which POM section declares the coordinate, by reading the
    /// POM at the breaking commit. Any failure along the way is `Unknown`.
    async fn resolve_section(
        &self,
        repo_id: &RepoId,
        breaking_commit: &Sha,
        patch: &str,
        group_id: &str,
        artifact_id: &str,
    ) -> DependencySection {
        let Some(pom_path) = extract_pom_file_path(patch) else {
            return DependencySection::Unknown;
        };
        let Some(pom_xml) = self
            .cache
            .file_at_commit(&repo_id.owner, &repo_id.project, breaking_commit, pom_path)
            .await
        else {
            return DependencySection::Unknown;
        };
        match super::pom::parse(&pom_xml) {
            Ok(project) => super::pom::locate_section(&project, group_id, artifact_id),
            Err(e) => {
                tracing::error!(
                    breaking_commit = %breaking_commit,
                    error = %e,
                    "could not parse POM to find the dependency section"
                );
                DependencySection::Unknown
            }
        }
    }

    /// Looks up the authors of the pre-commit and the breaking commit.
    ///
    /// The Forge has no direct parent accessor, so the first entry of the
    /// breaking commit's parent list is taken as the immediate parent.
    async fn commit_authors(
        &self,
        cred: &Credential,
        repo_id: &RepoId,
        breaking_commit: &Sha,
    ) -> (AuthorType, AuthorType) {
        let breaking = match self
            .client
            .commit(cred, repo_id, breaking_commit.as_str())
            .await
        {
            Ok(commit) => commit,
            Err(e) => {
                tracing::error!(
                    breaking_commit = %breaking_commit,
                    error = %e,
                    "could not fetch breaking commit for authorship"
                );
                return (AuthorType::Unknown, AuthorType::Unknown);
            }
        };

        let breaking_author = author_type(breaking.author.as_ref());

        let pre_author = match breaking.parents.first() {
            Some(parent) => match self.client.commit(cred, repo_id, &parent.sha).await {
                Ok(parent_commit) => author_type(parent_commit.author.as_ref()),
                Err(e) => {
                    tracing::error!(
                        breaking_commit = %breaking_commit,
                        error = %e,
                        "could not fetch pre-commit for authorship"
                    );
                    AuthorType::Unknown
                }
            },
            None => {
                tracing::warn!(
                    breaking_commit = %breaking_commit,
                    "breaking commit has no parent"
                );
                AuthorType::Unknown
            }
        };

        (pre_author, breaking_author)
    }
}

fn author_type(account: Option<&crate::github::Account>) -> AuthorType {
    match account {
        Some(account) => AuthorType::from_account(&account.account_type, &account.login),
        None => AuthorType::Unknown,
    }
}

fn first_capture<'t>(pattern: &Regex, text: &'t str) -> Option<&'t str> {
    pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

/// Extracts the path of the changed POM from the diff's `--- a/` header.
pub fn extract_pom_file_path(patch: &str) -> Option<&str> {
    patch
        .lines()
        .filter_map(|line| line.strip_prefix("--- a/"))
        .find(|path| path.ends_with("pom.xml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::jetty_bump_diff;

    #[test]
    fn extracts_coordinate_from_diff() {
        let patch = jetty_bump_diff();
        assert_eq!(
            first_capture(&DEPENDENCY_GROUP_ID, &patch),
            Some("org.eclipse.jetty")
        );
        assert_eq!(
            first_capture(&DEPENDENCY_ARTIFACT_ID, &patch),
            Some("jetty-server")
        );
        assert_eq!(
            first_capture(&PREVIOUS_VERSION, &patch),
            Some("9.4.17.v20190418")
        );
        assert_eq!(first_capture(&NEW_VERSION, &patch), Some("10.0.10"));
        assert_eq!(first_capture(&SCOPE, &patch), None);
    }

    #[test]
    fn version_lines_tolerate_trailing_comment() {
        let patch = "-    <version>1.0.0</version> <!-- keep in sync -->\n\
                     +    <version>1.0.1</version> <!-- keep in sync -->\n";
        assert_eq!(first_capture(&PREVIOUS_VERSION, patch), Some("1.0.0"));
        assert_eq!(first_capture(&NEW_VERSION, patch), Some("1.0.1"));
    }

    #[test]
    fn scope_is_extracted_when_present() {
        let patch = "     <scope>provided</scope>\n";
        assert_eq!(first_capture(&SCOPE, patch), Some("provided"));
        assert_eq!(
            first_capture(&SCOPE, patch).map(DependencyScope::parse),
            Some(DependencyScope::Provided)
        );
    }

    #[test]
    fn pom_path_from_diff_header() {
        assert_eq!(
            extract_pom_file_path(&jetty_bump_diff()),
            Some("pom.xml")
        );

        let nested = jetty_bump_diff().replace("a/pom.xml", "a/server/pom.xml");
        assert_eq!(extract_pom_file_path(&nested), Some("server/pom.xml"));

        assert_eq!(extract_pom_file_path("--- a/src/Main.java\n"), None);
    }

    #[test]
    fn extraction_reconstitutes_bump_line() {
        // When the single-line predicate held, the captured fields pin down
        // the version-bump lines of the diff unambiguously.
        let patch = jetty_bump_diff();
        let previous = first_capture(&PREVIOUS_VERSION, &patch).unwrap();
        let new = first_capture(&NEW_VERSION, &patch).unwrap();
        assert!(patch.contains(&format!("-        <version>{previous}</version>")));
        assert!(patch.contains(&format!("+        <version>{new}</version>")));
        assert_ne!(previous, new);
    }
}
