//! Forge access: credential pool, typed API operations, diff cache, and the
//! retry/back-off layer shared by both tools.

pub mod client;
pub mod error;
pub mod patch_cache;
pub mod retry;
pub mod token_pool;

pub use client::{
    Account, CommitInfo, GithubClient, PullRequest, PullRequestSummary, Repository, Tag,
    WorkflowRuns,
};
pub use error::{ForgeError, ForgeErrorKind};
pub use patch_cache::PatchCache;
pub use retry::{retry_forge_call, RetryConfig, ABUSE_LIMIT_BACKOFF};
pub use token_pool::{Credential, TokenPool, REMAINING_CALLS_CUTOFF};
