//! On-disk persistence: JSON documents and the repository index.

pub mod json;
pub mod repo_index;

pub use json::{StoreError, JSON_FILE_ENDING};
pub use repo_index::{RepositoryData, RepositoryIndex};
