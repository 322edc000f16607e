//! Container-orchestrated reproduction of candidate breaking updates.
//!
//! Each candidate is verified by building the commit preceding the breaking
//! commit (which must succeed) and the breaking commit itself (which must
//! fail, with a stable failure classification). Both builds run inside
//! containers derived from a snapshot holding the cloned repository, so the
//! whole verification replays offline and survives repository deletion.
//!
//! Flakiness is handled with a small retry budget on both sides of the
//! state machine; see [`Reproducer::reproduce`].

pub mod classify;
pub mod links;
pub mod results;


use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::container::{CommitOptions, ContainerError, ContainerRunner};
use crate::github::ForgeError;
use crate::store::json;
use crate::store::StoreError;
use crate::types::{BreakingUpdate, FailureCategory};

use results::{LogDir, ResultManager};

/// The Maven-capable base image all build containers derive from.
pub const BASE_MAVEN_IMAGE: &str = "maven:3.8.6-eclipse-temurin-11";

/// Default size of the flaky-test retry budget. Policy, not law.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Errors from the reproduction pipeline.
#[derive(Debug, Error)]
pub enum ReproduceError {
    /// The `<sha>:base` image could not be created (usually the repository
    /// is gone). The candidate is discarded without a partition write.
    #[error("could not create base image for {breaking_commit}: {reason}")]
    BaseImage {
        breaking_commit: String,
        reason: String,
    },

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a reproduction attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Three consecutive breaking builds failed identically; the record is
    /// in `benchmark/` and both images exist.
    Reproduced(FailureCategory),

    /// The preceding commit never built green.
    PrecedingBuildFailed,

    /// The breaking commit built green on the first try.
    NoBreakage,

    /// Breaking builds disagreed with each other (a later run passed, or
    /// the failure classification diverged).
    Flaky,
}

/// The per-candidate reproduction state machine.
pub struct Reproducer<R: ContainerRunner> {
    runner: Arc<R>,
    results: ResultManager<R>,
    attempts: u32,
    workers: usize,
}

impl<R: ContainerRunner + 'static> Reproducer<R> {
    pub fn new(runner: Arc<R>, results: ResultManager<R>, workers: usize) -> Self {
        Reproducer {
            runner,
            results,
            attempts: DEFAULT_ATTEMPTS,
            workers,
        }
    }

    /// Overrides the flaky-test retry budget.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Pulls the Maven base image if it is not already present.
    pub async fn ensure_base_image(&self) -> Result<(), ReproduceError> {
        self.runner.pull(BASE_MAVEN_IMAGE).await?;
        Ok(())
    }

    /// Reproduces every candidate file, one worker per credential. A
    /// failure in one candidate is logged and does not stop the batch.
    pub async fn reproduce_all(self: &Arc<Self>, files: Vec<PathBuf>) -> Result<(), ReproduceError> {
        self.ensure_base_image().await?;

        let queue: Arc<Mutex<VecDeque<PathBuf>>> = Arc::new(Mutex::new(files.into()));
        let mut set = JoinSet::new();
        for _ in 0..self.workers.max(1) {
            let reproducer = Arc::clone(self);
            let queue = Arc::clone(&queue);
            set.spawn(async move {
                loop {
                    let next = queue.lock().pop_front();
                    let Some(path) = next else { break };
                    let bu: BreakingUpdate = match json::read_json(&path) {
                        Ok(bu) => bu,
                        Err(e) => {
                            tracing::error!(path = %path.display(), error = %e, "unreadable candidate");
                            continue;
                        }
                    };
                    match reproducer.reproduce(&bu).await {
                        Ok(outcome) => {
                            tracing::info!(
                                breaking_commit = %bu.breaking_commit,
                                ?outcome,
                                "reproduction finished"
                            );
                        }
                        Err(e) => {
                            tracing::error!(
                                breaking_commit = %bu.breaking_commit,
                                error = %e,
                                "reproduction failed; continuing"
                            );
                        }
                    }
                }
            });
        }
        while set.join_next().await.is_some() {}
        Ok(())
    }

    /// Runs the pre/post state machine for one candidate.
    ///
    /// ```text
    ///                       prev_pass? ──no──▶ unsuccessful (pre build not green)
    /// start ─▶ run PRE (≤N) ┤
    ///                       prev_pass? ─yes──▶ run POST (≤N)
    ///                                          ├─ any pass ──────▶ unsuccessful (no breakage / flaky)
    ///                                          ├─ diverging class ▶ unsuccessful (flaky)
    ///                                          └─ N identical ────▶ benchmark
    /// ```
    pub async fn reproduce(&self, bu: &BreakingUpdate) -> Result<Outcome, ReproduceError> {
        self.create_base_image(bu).await?;
        let base_image = format!("{}:base", bu.breaking_commit);
        let workdir = format!("/{}", bu.project);

        // Containers created for this candidate, removed on every exit path.
        let mut containers: Vec<String> = Vec::new();

        let outcome = self
            .run_state_machine(bu, &base_image, &workdir, &mut containers)
            .await;

        // The success path also removes its snapshot images.
        let mut images = vec![base_image];
        if matches!(outcome, Ok(Outcome::Reproduced(_))) {
            images.push(format!("{}:pre", bu.breaking_commit));
            images.push(format!("{}:post", bu.breaking_commit));
        }
        self.cleanup(bu, &containers, &images).await;
        outcome
    }

    async fn run_state_machine(
        &self,
        bu: &BreakingUpdate,
        base_image: &str,
        workdir: &str,
        containers: &mut Vec<String>,
    ) -> Result<Outcome, ReproduceError> {
        // ─── PRE: the preceding commit must build green ───────────────────
        tracing::info!(
            breaking_commit = %bu.breaking_commit,
            "attempting to compile and test the preceding commit"
        );
        let mut pre_container: Option<String> = None;
        let mut wrote_unsuccessful_log = false;

        for attempt in 1..=self.attempts {
            let (id, exit) = self
                .run_build(base_image, workdir, &pre_command(bu))
                .await?;
            if exit == 0 {
                if wrote_unsuccessful_log {
                    // Earlier flaky attempts left a log in the wrong place.
                    self.results.remove_log(bu, LogDir::Unsuccessful);
                }
                pre_container = Some(id);
                break;
            }

            containers.push(id.clone());
            let log_path = self.results.store_log(bu, &id, LogDir::Unsuccessful).await?;
            wrote_unsuccessful_log = true;
            let category = classify::classify_file(&log_path)?;
            tracing::info!(
                breaking_commit = %bu.breaking_commit,
                attempt,
                %category,
                "preceding build failed"
            );
            if category != FailureCategory::TestFailure {
                // Only test flakiness warrants a retry.
                break;
            }
        }

        let Some(pre_container) = pre_container else {
            self.results.save_unsuccessful(bu)?;
            return Ok(Outcome::PrecedingBuildFailed);
        };
        containers.push(pre_container.clone());

        // ─── POST: the breaking commit must fail, consistently ────────────
        tracing::info!(
            breaking_commit = %bu.breaking_commit,
            "attempting to compile and test the breaking commit"
        );
        let mut post_container: Option<String> = None;
        let mut recorded: Option<(i64, FailureCategory)> = None;
        let mut consecutive = 0;

        for attempt in 1..=self.attempts {
            let (id, exit) = self
                .run_build(base_image, workdir, &post_command(bu))
                .await?;
            containers.push(id.clone());

            if exit == 0 {
                if recorded.is_some() {
                    self.results.remove_log(bu, LogDir::Successful);
                }
                self.results.save_unsuccessful(bu)?;
                return Ok(if attempt == 1 {
                    Outcome::NoBreakage
                } else {
                    Outcome::Flaky
                });
            }

            let log_path = self.results.store_log(bu, &id, LogDir::Successful).await?;
            let category = classify::classify_file(&log_path)?;
            tracing::info!(
                breaking_commit = %bu.breaking_commit,
                attempt,
                exit,
                %category,
                "breaking build failed"
            );

            match recorded {
                None => {
                    recorded = Some((exit, category));
                    consecutive = 1;
                }
                Some(previous) if previous == (exit, category) => {
                    consecutive += 1;
                }
                Some(previous) => {
                    tracing::info!(
                        breaking_commit = %bu.breaking_commit,
                        ?previous,
                        current = ?(exit, category),
                        "breaking build classification diverged"
                    );
                    self.results.remove_log(bu, LogDir::Successful);
                    self.results.save_unsuccessful(bu)?;
                    return Ok(Outcome::Flaky);
                }
            }
            post_container = Some(id);
        }

        debug_assert_eq!(consecutive, self.attempts);
        let post_container = post_container.expect("at least one post attempt ran");
        let category = self
            .results
            .store_result(bu, &post_container, &pre_container)
            .await?;
        Ok(Outcome::Reproduced(category))
    }

    /// Creates the `<sha>:base` image: clone the project, fetch the
    /// breaking commit with its parent, snapshot. A non-zero exit aborts
    /// the candidate with a fatal error and no partition write.
    async fn create_base_image(&self, bu: &BreakingUpdate) -> Result<(), ReproduceError> {
        tracing::info!(breaking_commit = %bu.breaking_commit, "creating base image");
        let clone_cmd = format!(
            "git clone {} && cd {} && git fetch --depth 2 origin {}",
            bu.project_url(),
            bu.project,
            bu.breaking_commit
        );
        let id = self
            .runner
            .create(BASE_MAVEN_IMAGE, None, &["bash", "-c", &clone_cmd])
            .await?;
        self.runner.start(&id).await?;
        let exit = self.runner.wait(&id).await?;
        if exit != 0 {
            let _ = self.runner.remove(&id).await;
            return Err(ReproduceError::BaseImage {
                breaking_commit: bu.breaking_commit.to_string(),
                reason: format!("clone-and-fetch exited with {exit}"),
            });
        }
        self.runner
            .commit(
                &id,
                &format!("{}:base", bu.breaking_commit),
                &CommitOptions::default(),
            )
            .await?;
        self.runner.remove(&id).await?;
        Ok(())
    }

    /// Creates, starts and waits out one build container.
    async fn run_build(
        &self,
        base_image: &str,
        workdir: &str,
        cmd: &str,
    ) -> Result<(String, i64), ReproduceError> {
        let id = self
            .runner
            .create(base_image, Some(workdir), &["bash", "-c", cmd])
            .await?;
        self.runner.start(&id).await?;
        let exit = self.runner.wait(&id).await?;
        Ok((id, exit))
    }

    /// Removes everything this candidate created. Push failures left the
    /// final images in place on purpose; only the intermediates go.
    async fn cleanup(&self, bu: &BreakingUpdate, containers: &[String], images: &[String]) {
        tracing::info!(breaking_commit = %bu.breaking_commit, "removing containers");
        for id in containers {
            if let Err(e) = self.runner.remove(id).await {
                tracing::warn!(container = %id, error = %e, "could not remove container");
            }
        }
        for image in images {
            if let Err(e) = self.runner.remove_image(image).await {
                tracing::warn!(image = %image, error = %e, "could not remove image");
            }
        }
    }
}

/// Command compiling and testing the commit preceding the breaking update.
fn pre_command(bu: &BreakingUpdate) -> String {
    format!(
        "set -o pipefail && git checkout {sha} && git checkout HEAD~1 && rm -rf .git && mvn clean test -B | tee {sha}.log",
        sha = bu.breaking_commit
    )
}

/// Command compiling and testing the breaking update itself.
fn post_command(bu: &BreakingUpdate) -> String {
    format!(
        "set -o pipefail && git checkout {sha} && rm -rf .git && mvn clean test -B | tee {sha}.log",
        sha = bu.breaking_commit
    )
}
