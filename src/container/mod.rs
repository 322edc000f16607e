//! Adapter over the local container daemon.
//!
//! The reproducer drives builds through the [`ContainerRunner`] trait, which
//! exposes exactly the operations the state machine needs. Production runs
//! use [`docker::DockerCli`]; tests drive the state machine with a scripted
//! in-memory fake.

pub mod docker;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// Registry credentials for pushing final images.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredentials {
    pub user_name: String,
    pub identity_token: String,
}

impl RegistryCredentials {
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::store::StoreError> {
        crate::store::json::read_json(path)
    }
}

/// Errors from container-daemon operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// A path does not exist inside the container file system. Callers use
    /// this to probe for optional artifacts (jars vs poms).
    #[error("not found in container: {0}")]
    NotFound(String),

    /// Any other daemon failure.
    #[error("container daemon error: {0}")]
    Daemon(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Image-level changes applied when committing a container.
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// OCI labels to attach.
    pub labels: BTreeMap<String, String>,
    /// Replacement default command, shell form.
    pub cmd: Option<String>,
    /// Replacement working directory.
    pub workdir: Option<String>,
}

/// The container-daemon operations used by the reproducer.
#[async_trait]
pub trait ContainerRunner: Send + Sync {
    /// Pulls an image. Idempotent: a present image is not pulled again.
    async fn pull(&self, image: &str) -> Result<(), ContainerError>;

    /// Creates a stopped container, returning its id.
    async fn create(
        &self,
        image: &str,
        workdir: Option<&str>,
        cmd: &[&str],
    ) -> Result<String, ContainerError>;

    async fn start(&self, id: &str) -> Result<(), ContainerError>;

    /// Blocks until the container exits and returns its exit code.
    async fn wait(&self, id: &str) -> Result<i64, ContainerError>;

    /// Copies one file out of a (possibly stopped) container.
    ///
    /// Fails with [`ContainerError::NotFound`] when the path does not exist
    /// in the container file system.
    async fn copy_out(&self, id: &str, path: &str) -> Result<Vec<u8>, ContainerError>;

    /// Snapshots the container as `reference` (a `repo:tag` image name),
    /// applying the given labels and config changes.
    async fn commit(
        &self,
        id: &str,
        reference: &str,
        options: &CommitOptions,
    ) -> Result<(), ContainerError>;

    /// Pushes `repo:tag` to its registry.
    async fn push(
        &self,
        repo: &str,
        tag: &str,
        credentials: &RegistryCredentials,
    ) -> Result<(), ContainerError>;

    /// Runs a command in a running container, returning its stdout.
    async fn exec(&self, id: &str, cmd: &[&str]) -> Result<Vec<u8>, ContainerError>;

    async fn remove(&self, id: &str) -> Result<(), ContainerError>;

    async fn remove_image(&self, reference: &str) -> Result<(), ContainerError>;

    async fn image_exists(&self, reference: &str) -> Result<bool, ContainerError>;
}
