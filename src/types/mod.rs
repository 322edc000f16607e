//! Core domain types for the breaking-update benchmark.

mod breaking_update;
mod ids;
mod version;

pub use breaking_update::{
    AuthorType, BreakingUpdate, DependencyScope, DependencySection, FailureCategory,
    UpdatedDependency, UpdatedFileType, DEFAULT_JAVA_VERSION,
};
pub use ids::{InvalidSha, RepoId, Sha};
pub use version::VersionUpdateType;
