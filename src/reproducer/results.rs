//! Placement of reproduction results: partitions, logs, jars, images.
//!
//! The result manager owns the partition invariant: after an attempted
//! reproduction a record lives in exactly one of `benchmark/` or
//! `unsuccessful/`, and its candidate file is gone. Both moves write the
//! target document atomically before deleting the source, so a crash in
//! between leaves a duplicate (harmless, keyed identically) rather than a
//! lost record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::container::{CommitOptions, ContainerError, ContainerRunner, RegistryCredentials};
use crate::github::{GithubClient, TokenPool};
use crate::store::json;
use crate::store::JSON_FILE_ENDING;
use crate::types::{BreakingUpdate, FailureCategory, UpdatedFileType, DEFAULT_JAVA_VERSION};

use super::classify;
use super::links::LinkFinder;
use super::ReproduceError;

/// The registry repository holding the published benchmark images.
pub const REGISTRY_REPO: &str = "ghcr.io/breakbot/breaking-updates";

/// Image-tag suffix for the state preceding the breaking commit.
pub const PRE_IMAGE_TAG_SUFFIX: &str = "-pre";

/// Image-tag suffix for the state at the breaking commit.
pub const BREAKING_IMAGE_TAG_SUFFIX: &str = "-breaking";

/// The Forge repository that mirrors logs and extracted artifacts.
pub const CACHE_REPO: &str = "breakbot/breaking-updates-cache";
const CACHE_REPO_BRANCH: &str = "main";

/// Default command baked into the final images, exec form.
const IMAGE_CMD: &str = r#"["mvn", "clean", "test", "-B"]"#;

/// Which log directory a build log belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDir {
    Successful,
    Unsuccessful,
}

/// On-disk layout for the result manager.
#[derive(Debug, Clone)]
pub struct ResultPaths {
    pub benchmark_dir: PathBuf,
    pub unsuccessful_dir: PathBuf,
    pub candidates_dir: PathBuf,
    pub log_dir: PathBuf,
    pub jar_dir: PathBuf,
    pub metadata_file: PathBuf,
}

/// Forge-side extras: enrichment links and cache-repository mirroring.
/// Absent in offline runs and in tests; everything it backs is best-effort.
pub struct Enrichment {
    pool: Arc<TokenPool>,
    client: GithubClient,
    links: LinkFinder,
}

impl Enrichment {
    pub fn new(pool: Arc<TokenPool>) -> Self {
        Enrichment {
            links: LinkFinder::new(Arc::clone(&pool)),
            client: GithubClient::new(),
            pool,
        }
    }
}

pub struct ResultManager<R> {
    runner: Arc<R>,
    benchmark_dir: PathBuf,
    unsuccessful_dir: PathBuf,
    candidates_dir: PathBuf,
    jar_dir: PathBuf,
    successful_log_dir: PathBuf,
    unsuccessful_log_dir: PathBuf,
    metadata_file: PathBuf,
    // The metadata document is shared across candidates, unlike every other
    // file, so its read-modify-write needs a lock.
    metadata_lock: Mutex<()>,
    registry_credentials: RegistryCredentials,
    enrichment: Option<Enrichment>,
}

impl<R: ContainerRunner> ResultManager<R> {
    pub fn new(
        runner: Arc<R>,
        paths: ResultPaths,
        registry_credentials: RegistryCredentials,
        enrichment: Option<Enrichment>,
    ) -> Result<Self, ReproduceError> {
        let successful_log_dir = paths.log_dir.join("successfulReproductionLogs");
        let unsuccessful_log_dir = paths.log_dir.join("unsuccessfulReproductionLogs");
        for dir in [
            &paths.benchmark_dir,
            &paths.unsuccessful_dir,
            &paths.candidates_dir,
            &paths.jar_dir,
            &successful_log_dir,
            &unsuccessful_log_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(ResultManager {
            runner,
            benchmark_dir: paths.benchmark_dir,
            unsuccessful_dir: paths.unsuccessful_dir,
            candidates_dir: paths.candidates_dir,
            jar_dir: paths.jar_dir,
            successful_log_dir,
            unsuccessful_log_dir,
            metadata_file: paths.metadata_file,
            metadata_lock: Mutex::new(()),
            registry_credentials,
            enrichment,
        })
    }

    fn log_dir(&self, dir: LogDir) -> &Path {
        match dir {
            LogDir::Successful => &self.successful_log_dir,
            LogDir::Unsuccessful => &self.unsuccessful_log_dir,
        }
    }

    fn log_path(&self, bu: &BreakingUpdate, dir: LogDir) -> PathBuf {
        self.log_dir(dir)
            .join(format!("{}.log", bu.breaking_commit))
    }

    /// Copies the Maven log out of a build container into the given log
    /// directory, overwriting any earlier attempt's log.
    pub async fn store_log(
        &self,
        bu: &BreakingUpdate,
        container_id: &str,
        dir: LogDir,
    ) -> Result<PathBuf, ReproduceError> {
        let source = format!("/{}/{}.log", bu.project, bu.breaking_commit);
        let contents = self.runner.copy_out(container_id, &source).await?;
        let target = self.log_path(bu, dir);
        std::fs::write(&target, contents)?;
        Ok(target)
    }

    /// Deletes a previously stored log. Used by the flakiness policy to
    /// undo a tentative placement.
    pub fn remove_log(&self, bu: &BreakingUpdate, dir: LogDir) {
        let path = self.log_path(bu, dir);
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::error!(
                breaking_commit = %bu.breaking_commit,
                path = %path.display(),
                error = %e,
                "could not remove reproduction log"
            );
        }
    }

    /// Removes the candidate file. Idempotent: a missing file is fine.
    pub fn remove_candidate_file(&self, bu: &BreakingUpdate) {
        let path = self
            .candidates_dir
            .join(format!("{}{}", bu.breaking_commit, JSON_FILE_ENDING));
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(
                    breaking_commit = %bu.breaking_commit,
                    error = %e,
                    "could not remove candidate file"
                );
            }
        }
    }

    /// The success path: classifies the stored log, extracts dependency
    /// artifacts, resolves enrichment links, publishes both images, records
    /// image metadata, and moves the record into `benchmark/`.
    pub async fn store_result(
        &self,
        bu: &BreakingUpdate,
        post_container_id: &str,
        pre_container_id: &str,
    ) -> Result<FailureCategory, ReproduceError> {
        let log_path = self.log_path(bu, LogDir::Successful);
        if let Ok(contents) = std::fs::read(&log_path) {
            self.push_cache_file(bu, &format!("{}.log", bu.breaking_commit), &contents)
                .await;
        }
        let category = classify::classify_file(&log_path)?;

        let (compare_link, maven_links) = match &self.enrichment {
            Some(enrichment) => (
                enrichment.links.github_compare_link(bu).await,
                enrichment.links.maven_source_links(bu).await,
            ),
            None => (None, None),
        };
        let updated_file_type = self
            .extract_dependencies(bu, post_container_id, pre_container_id)
            .await;

        tracing::info!(breaking_commit = %bu.breaking_commit, "creating images");
        self.create_final_image(bu, pre_container_id, "pre", PRE_IMAGE_TAG_SUFFIX, category)
            .await?;
        self.create_final_image(
            bu,
            post_container_id,
            "post",
            BREAKING_IMAGE_TAG_SUFFIX,
            category,
        )
        .await?;

        tracing::info!(breaking_commit = %bu.breaking_commit, "pushing images");
        self.push_final_image(bu, PRE_IMAGE_TAG_SUFFIX).await;
        self.push_final_image(bu, BREAKING_IMAGE_TAG_SUFFIX).await;

        self.store_image_metadata(bu).await;

        let mut record = bu.clone();
        record.failure_category = Some(category);
        record.java_version_used_for_reproduction = Some(DEFAULT_JAVA_VERSION.to_string());
        record.github_compare_link = compare_link;
        if let Some((pre, breaking)) = maven_links {
            record.maven_source_link_pre = Some(pre);
            record.maven_source_link_breaking = Some(breaking);
        }
        record.updated_file_type = updated_file_type;
        record.pre_commit_reproduction_command = Some(format!(
            "docker run {REGISTRY_REPO}:{}{PRE_IMAGE_TAG_SUFFIX}",
            bu.breaking_commit
        ));
        record.breaking_update_reproduction_command = Some(format!(
            "docker run {REGISTRY_REPO}:{}{BREAKING_IMAGE_TAG_SUFFIX}",
            bu.breaking_commit
        ));

        tracing::info!(
            breaking_commit = %bu.breaking_commit,
            failure_category = %category,
            "storing successfully reproduced breaking update"
        );
        json::write_json(
            &self
                .benchmark_dir
                .join(format!("{}{}", bu.breaking_commit, JSON_FILE_ENDING)),
            &record,
        )?;
        self.remove_candidate_file(bu);
        Ok(category)
    }

    /// The failure path: a trimmed record (no enrichment, no reproduction
    /// commands) moves into `unsuccessful/`.
    pub fn save_unsuccessful(&self, bu: &BreakingUpdate) -> Result<(), ReproduceError> {
        let mut record = bu.clone();
        record.failure_category = None;
        record.java_version_used_for_reproduction = Some(DEFAULT_JAVA_VERSION.to_string());
        record.pre_commit_reproduction_command = None;
        record.breaking_update_reproduction_command = None;
        record.github_compare_link = None;
        record.maven_source_link_pre = None;
        record.maven_source_link_breaking = None;
        record.updated_file_type = None;

        tracing::info!(
            breaking_commit = %bu.breaking_commit,
            "storing unsuccessful reproduction"
        );
        json::write_json(
            &self
                .unsuccessful_dir
                .join(format!("{}{}", bu.breaking_commit, JSON_FILE_ENDING)),
            &record,
        )?;
        self.remove_candidate_file(bu);
        Ok(())
    }

    /// Copies the old/new dependency artifact out of the build containers'
    /// local Maven repositories into `jars/`.
    ///
    /// The answer is `JAR` when a jar exists on at least one side, `POM`
    /// when only a pom does, `None` when neither was found.
    async fn extract_dependencies(
        &self,
        bu: &BreakingUpdate,
        post_container_id: &str,
        pre_container_id: &str,
    ) -> Option<UpdatedFileType> {
        let dependency = &bu.updated_dependency;
        for (kind, extension) in [(UpdatedFileType::Jar, "jar"), (UpdatedFileType::Pom, "pom")] {
            let old_found = self
                .extract_one(
                    bu,
                    pre_container_id,
                    &dependency.previous_version,
                    extension,
                    "prev",
                )
                .await;
            let new_found = self
                .extract_one(
                    bu,
                    post_container_id,
                    &dependency.new_version,
                    extension,
                    "new",
                )
                .await;
            if old_found || new_found {
                return Some(kind);
            }
            if kind == UpdatedFileType::Jar {
                tracing::info!(
                    breaking_commit = %bu.breaking_commit,
                    "no jar found for the updated dependency, searching for a pom instead"
                );
            }
        }
        tracing::error!(
            breaking_commit = %bu.breaking_commit,
            "neither a jar nor a pom found for the updated dependency"
        );
        None
    }

    async fn extract_one(
        &self,
        bu: &BreakingUpdate,
        container_id: &str,
        version: &str,
        extension: &str,
        side: &str,
    ) -> bool {
        let dependency = &bu.updated_dependency;
        let source = dependency.m2_artifact_path(version, extension);
        let contents = match self.runner.copy_out(container_id, &source).await {
            Ok(contents) => contents,
            Err(ContainerError::NotFound(_)) => return false,
            Err(e) => {
                tracing::error!(
                    breaking_commit = %bu.breaking_commit,
                    source,
                    error = %e,
                    "could not copy dependency artifact out of container"
                );
                return false;
            }
        };

        let target_dir = self.jar_dir.join(dependency.group_path()).join(version);
        let file_name = format!("{}-{version}.{extension}", dependency.dependency_artifact_id);
        let write = std::fs::create_dir_all(&target_dir)
            .and_then(|()| std::fs::write(target_dir.join(&file_name), &contents));
        if let Err(e) = write {
            tracing::error!(
                breaking_commit = %bu.breaking_commit,
                file = %file_name,
                error = %e,
                "could not store dependency artifact"
            );
            return false;
        }

        let cache_name = format!(
            "{}_{}_{version}__{side}.{extension}",
            dependency.dependency_group_id, dependency.dependency_artifact_id
        );
        self.push_cache_file(bu, &cache_name, &contents).await;
        true
    }

    fn image_labels(
        &self,
        bu: &BreakingUpdate,
        category: FailureCategory,
    ) -> BTreeMap<String, String> {
        let dependency = &bu.updated_dependency;
        BTreeMap::from([
            ("github_repository".to_string(), bu.project.clone()),
            ("pr_url".to_string(), bu.url.clone()),
            (
                "updated_dependency".to_string(),
                format!(
                    "{}/{}",
                    dependency.dependency_group_id, dependency.dependency_artifact_id
                ),
            ),
            ("new_version".to_string(), dependency.new_version.clone()),
            (
                "previous_version".to_string(),
                dependency.previous_version.clone(),
            ),
            ("failure_category".to_string(), category.as_str().to_string()),
        ])
    }

    /// Snapshots a build container and converts the snapshot into the final
    /// runnable, labeled image.
    async fn create_final_image(
        &self,
        bu: &BreakingUpdate,
        container_id: &str,
        snapshot_tag: &str,
        suffix: &str,
        category: FailureCategory,
    ) -> Result<(), ReproduceError> {
        let snapshot = format!("{}:{snapshot_tag}", bu.breaking_commit);
        self.runner
            .commit(container_id, &snapshot, &CommitOptions::default())
            .await?;

        let staging = self.runner.create(&snapshot, None, &[]).await?;
        let options = CommitOptions {
            labels: self.image_labels(bu, category),
            cmd: Some(IMAGE_CMD.to_string()),
            workdir: Some(format!("/{}", bu.project)),
        };
        let reference = format!("{REGISTRY_REPO}:{}{suffix}", bu.breaking_commit);
        let committed = self.runner.commit(&staging, &reference, &options).await;
        if let Err(e) = self.runner.remove(&staging).await {
            tracing::warn!(error = %e, "could not remove image staging container");
        }
        committed?;
        Ok(())
    }

    /// Pushes a final image. Failures are logged; the local image and the
    /// benchmark record are kept, and a later run retries the push.
    async fn push_final_image(&self, bu: &BreakingUpdate, suffix: &str) {
        let tag = format!("{}{suffix}", bu.breaking_commit);
        if let Err(e) = self
            .runner
            .push(REGISTRY_REPO, &tag, &self.registry_credentials)
            .await
        {
            tracing::error!(
                breaking_commit = %bu.breaking_commit,
                tag,
                error = %e,
                "failed to push image to the registry"
            );
        }
    }

    /// Records the `du -s` sizes of the Maven repository and the project
    /// tree inside both final images, merged into the image-metadata
    /// document. Best-effort: a failed probe leaves its key out.
    async fn store_image_metadata(&self, bu: &BreakingUpdate) {
        let mut sizes = BTreeMap::new();
        for (prefix, suffix) in [
            ("pre", PRE_IMAGE_TAG_SUFFIX),
            ("post", BREAKING_IMAGE_TAG_SUFFIX),
        ] {
            for (label, path) in [
                ("M2", "/root/.m2".to_string()),
                ("Project", format!("/{}", bu.project)),
            ] {
                match self.folder_size(bu, suffix, &path).await {
                    Some(size) => {
                        sizes.insert(format!("{prefix}Image{label}FolderSize"), size);
                    }
                    None => {
                        tracing::error!(
                            breaking_commit = %bu.breaking_commit,
                            path,
                            suffix,
                            "failed to measure folder size inside image"
                        );
                    }
                }
            }
        }

        let _guard = self.metadata_lock.lock();
        let mut metadata: BTreeMap<String, BTreeMap<String, String>> = if self.metadata_file.exists()
        {
            json::read_json(&self.metadata_file).unwrap_or_default()
        } else {
            BTreeMap::new()
        };
        metadata.insert(bu.breaking_commit.as_str().to_string(), sizes);
        if let Err(e) = json::write_json(&self.metadata_file, &metadata) {
            tracing::error!(
                breaking_commit = %bu.breaking_commit,
                error = %e,
                "failed to store image metadata"
            );
        }
    }

    /// Spawns a detached container from the image and measures one path
    /// with `du -s`, returning the first field of its output.
    async fn folder_size(&self, bu: &BreakingUpdate, suffix: &str, path: &str) -> Option<String> {
        let image = format!("{REGISTRY_REPO}:{}{suffix}", bu.breaking_commit);
        let id = self
            .runner
            .create(&image, None, &["tail", "-f", "/dev/null"])
            .await
            .ok()?;

        let size = match self.runner.start(&id).await {
            Ok(()) => match self.runner.exec(&id, &["du", "-s", path]).await {
                Ok(output) => String::from_utf8_lossy(&output)
                    .split_whitespace()
                    .next()
                    .map(str::to_string),
                Err(e) => {
                    tracing::error!(image, path, error = %e, "du failed inside container");
                    None
                }
            },
            Err(e) => {
                tracing::error!(image, error = %e, "could not start metadata container");
                None
            }
        };
        if let Err(e) = self.runner.remove(&id).await {
            tracing::warn!(error = %e, "could not remove metadata container");
        }
        size
    }

    /// Mirrors one file into the cache repository as a fresh commit.
    /// Logged-only: a failed push never blocks progress.
    async fn push_cache_file(&self, bu: &BreakingUpdate, name: &str, content: &[u8]) {
        let Some(enrichment) = &self.enrichment else {
            return;
        };
        let cred = enrichment.pool.acquire();
        let path = format!("data/{}/{name}", bu.breaking_commit);
        let message = format!("Add {name} for the breaking update {}.", bu.breaking_commit);
        match enrichment
            .client
            .push_file(&cred, CACHE_REPO, CACHE_REPO_BRANCH, &path, content, &message)
            .await
        {
            Ok(()) => {
                tracing::info!(file = name, repo = CACHE_REPO, "pushed file to cache repository");
            }
            Err(e) => {
                tracing::error!(
                    file = name,
                    repo = CACHE_REPO,
                    error = %e,
                    "failed to push file to cache repository"
                );
            }
        }
    }
}
