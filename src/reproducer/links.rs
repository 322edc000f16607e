//! Best-effort enrichment links for reproduced breaking updates.
//!
//! Two kinds of references are resolved for the benchmark record: the
//! Forge's compare page between the two release tags of the updated
//! dependency, and Maven Central source-jar URLs for both versions. Both
//! are conveniences for downstream analysis; every failure here is logged
//! and the record simply goes without the link.

use std::sync::Arc;
use std::time::Duration;

use crate::github::{GithubClient, TokenPool};
use crate::types::BreakingUpdate;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on tag pages fetched per dependency repository.
const MAX_TAG_PAGES: u32 = 10;

pub struct LinkFinder {
    pool: Arc<TokenPool>,
    client: GithubClient,
    http: reqwest::Client,
}

impl LinkFinder {
    pub fn new(pool: Arc<TokenPool>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .unwrap_or_default();
        LinkFinder {
            pool,
            client: GithubClient::new(),
            http,
        }
    }

    /// The compare URL between the release tags matching the previous and
    /// new versions, when the dependency's repository and both tags exist.
    ///
    /// The repository is guessed from the coordinate: the second groupId
    /// segment (or the whole groupId) as owner, the artifactId as name.
    /// Tag names are normalized to their digits and dots before comparison,
    /// so `v1.2.3` and `release-1.2.3` both match `1.2.3`.
    pub async fn github_compare_link(&self, bu: &BreakingUpdate) -> Option<String> {
        let dependency = &bu.updated_dependency;
        let owner = dependency
            .dependency_group_id
            .split('.')
            .nth(1)
            .unwrap_or(&dependency.dependency_group_id);
        let repo_name = format!("{owner}/{}", dependency.dependency_artifact_id);

        let cred = self.pool.acquire();
        let mut matching: Vec<String> = Vec::new();
        for page in 1..=MAX_TAG_PAGES {
            let tags = match self.client.tag_page(&cred, &repo_name, page).await {
                Ok(tags) => tags,
                Err(e) => {
                    tracing::error!(
                        breaking_commit = %bu.breaking_commit,
                        repo = %repo_name,
                        error = %e,
                        "could not list tags for the updated dependency"
                    );
                    return None;
                }
            };
            if tags.is_empty() {
                break;
            }
            let page_len = tags.len();
            matching.extend(tags.into_iter().map(|tag| tag.name).filter(|name| {
                let normalized = normalize_tag(name);
                normalized == dependency.previous_version || normalized == dependency.new_version
            }));
            if page_len < 100 {
                break;
            }
        }

        // Previous-version tag first, then the new one.
        matching.sort_by_key(|tag| !tag.contains(&dependency.previous_version));
        if matching.len() != 2 {
            tracing::info!(
                breaking_commit = %bu.breaking_commit,
                repo = %repo_name,
                "release tags for both versions not found"
            );
            return None;
        }
        Some(format!(
            "https://github.com/{repo_name}/compare/{}...{}",
            matching[0], matching[1]
        ))
    }

    /// Maven Central source-jar URLs for both versions, when at least one of
    /// them is actually published (HEAD probe not answering 404).
    pub async fn maven_source_links(&self, bu: &BreakingUpdate) -> Option<(String, String)> {
        let dependency = &bu.updated_dependency;
        let base = format!(
            "https://repo1.maven.org/maven2/{}/{}",
            dependency.group_path(),
            dependency.dependency_artifact_id
        );
        let source_jar = |version: &str| {
            format!(
                "{base}/{version}/{}-{version}-sources.jar",
                dependency.dependency_artifact_id
            )
        };
        let pre_link = source_jar(&dependency.previous_version);
        let breaking_link = source_jar(&dependency.new_version);

        let pre_status = self.head_status(&pre_link).await;
        let breaking_status = self.head_status(&breaking_link).await;
        match (pre_status, breaking_status) {
            (Some(pre), Some(breaking)) if pre != 404 || breaking != 404 => {
                Some((pre_link, breaking_link))
            }
            (Some(_), Some(_)) => None,
            _ => {
                tracing::error!(
                    breaking_commit = %bu.breaking_commit,
                    "Maven Central source links could not be probed"
                );
                None
            }
        }
    }

    async fn head_status(&self, url: &str) -> Option<u16> {
        match self.http.head(url).send().await {
            Ok(response) => Some(response.status().as_u16()),
            Err(e) => {
                tracing::error!(url, error = %e, "HEAD probe failed");
                None
            }
        }
    }
}

/// Strips everything but digits and dots from a tag name.
fn normalize_tag(tag: &str) -> String {
    tag.chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_normalization() {
        assert_eq!(normalize_tag("v1.2.3"), "1.2.3");
        assert_eq!(normalize_tag("release-10.0.10"), "10.0.10");
        assert_eq!(normalize_tag("jetty-9.4.17.v20190418"), "9.4.17.20190418");
        assert_eq!(normalize_tag("1.2.3"), "1.2.3");
    }
}
