//! A round-robin pool of Forge credentials.
//!
//! The Forge limits each token to a fixed number of requests per hour, and
//! counts concurrent request streams against an abuse budget keyed by
//! credential. Rotating a pool of tokens raises aggregate throughput, and
//! sizing the worker count to the pool keeps one concurrency unit per
//! credential.
//!
//! `acquire` is non-blocking and guarantees the least-recently-used
//! credential is handed out next (dequeue, clone, enqueue).

use std::collections::VecDeque;

use chrono::{DateTime, TimeZone, Utc};
use octocrab::Octocrab;
use parking_lot::Mutex;
use serde::Deserialize;

use super::error::ForgeError;

/// When the remaining call budget of a credential falls below this cutoff,
/// the budget hook sleeps until the reset instant reported by the Forge.
pub const REMAINING_CALLS_CUTOFF: u64 = 5;

/// A Forge credential paired with its authenticated API client.
#[derive(Clone)]
pub struct Credential {
    token: String,
    octocrab: Octocrab,
}

impl Credential {
    fn build(token: String) -> Result<Self, ForgeError> {
        let octocrab = Octocrab::builder()
            .personal_token(token.clone())
            .build()
            .map_err(ForgeError::from_octocrab)?;
        Ok(Credential { token, octocrab })
    }

    /// The raw token, used for authenticated plain-HTTP fetches (diffs).
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The authenticated API client for this credential.
    pub fn octocrab(&self) -> &Octocrab {
        &self.octocrab
    }

    /// A redacted form of the token, safe for log output.
    pub fn redacted(&self) -> String {
        let tail: String = self
            .token
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("…{tail}")
    }

    /// The rate-limit hook: queries the Forge for this credential's
    /// remaining core-API budget and, when it has fallen below
    /// [`REMAINING_CALLS_CUTOFF`], sleeps until the reported reset instant.
    ///
    /// Returns `true` when a sleep happened (a retry of budget-sensitive
    /// work is warranted).
    pub async fn ensure_budget(&self) -> Result<bool, ForgeError> {
        let overview: RateLimitOverview = self
            .octocrab
            .get("/rate_limit", None::<&()>)
            .await
            .map_err(ForgeError::from_octocrab)?;
        let core = overview.resources.core;

        if core.remaining < REMAINING_CALLS_CUTOFF {
            let reset_at = Utc
                .timestamp_opt(core.reset as i64, 0)
                .single()
                .unwrap_or_else(Utc::now);
            let sleep = (reset_at - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tracing::info!(
                token = %self.redacted(),
                sleep_secs = sleep.as_secs(),
                %reset_at,
                "rate limit nearly exhausted, sleeping until reset"
            );
            tokio::time::sleep(sleep).await;
            return Ok(true);
        }
        Ok(false)
    }

    /// The instant this credential's core budget resets, as reported by the
    /// Forge.
    pub async fn reset_instant(&self) -> Result<DateTime<Utc>, ForgeError> {
        let overview: RateLimitOverview = self
            .octocrab
            .get("/rate_limit", None::<&()>)
            .await
            .map_err(ForgeError::from_octocrab)?;
        Ok(Utc
            .timestamp_opt(overview.resources.core.reset as i64, 0)
            .single()
            .unwrap_or_else(Utc::now))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &self.redacted())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct RateLimitOverview {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitRecord,
}

#[derive(Debug, Deserialize)]
struct RateLimitRecord {
    remaining: u64,
    reset: u64,
}

/// A round-robin pool of validated credentials.
pub struct TokenPool {
    queue: Mutex<VecDeque<Credential>>,
}

impl TokenPool {
    /// Builds a pool from raw tokens, probing each against the Forge and
    /// dropping the ones it rejects. Tokens expire, so a stale entry in the
    /// token file must not poison the pool.
    ///
    /// Fails with a configuration error when no valid credential remains.
    pub async fn new(tokens: Vec<String>) -> Result<Self, ForgeError> {
        let mut valid = VecDeque::new();
        for token in tokens {
            let credential = Credential::build(token)?;
            match credential.octocrab.current().user().await {
                Ok(_) => valid.push_back(credential),
                Err(e) => {
                    tracing::warn!(
                        token = %credential.redacted(),
                        error = %e,
                        "dropping invalid API token"
                    );
                }
            }
        }
        if valid.is_empty() {
            return Err(ForgeError::permanent("no valid API tokens provided"));
        }
        Ok(TokenPool {
            queue: Mutex::new(valid),
        })
    }

    /// Builds a pool without probing token validity. Used by tests and by
    /// callers that have validated the tokens out of band.
    pub fn from_unchecked(tokens: Vec<String>) -> Result<Self, ForgeError> {
        if tokens.is_empty() {
            return Err(ForgeError::permanent("no API tokens provided"));
        }
        let queue = tokens
            .into_iter()
            .map(Credential::build)
            .collect::<Result<VecDeque<_>, _>>()?;
        Ok(TokenPool {
            queue: Mutex::new(queue),
        })
    }

    /// Hands out the least-recently-used credential. Never blocks.
    pub fn acquire(&self) -> Credential {
        let mut queue = self.queue.lock();
        let credential = queue
            .pop_front()
            .expect("pool construction guarantees at least one credential");
        queue.push_back(credential.clone());
        credential
    }

    /// The number of credentials in the pool; also the worker parallelism.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_tokens_fails_construction() {
        assert!(TokenPool::from_unchecked(vec![]).is_err());
    }

    #[tokio::test]
    async fn single_credential_always_returned() {
        let pool = TokenPool::from_unchecked(vec!["ghp_only".to_string()]).unwrap();
        for _ in 0..5 {
            assert_eq!(pool.acquire().token(), "ghp_only");
        }
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn acquire_rotates_round_robin() {
        let pool = TokenPool::from_unchecked(vec![
            "ghp_a".to_string(),
            "ghp_b".to_string(),
            "ghp_c".to_string(),
        ])
        .unwrap();

        let order: Vec<String> = (0..6).map(|_| pool.acquire().token().to_string()).collect();
        assert_eq!(order, vec!["ghp_a", "ghp_b", "ghp_c", "ghp_a", "ghp_b", "ghp_c"]);
    }

    #[tokio::test]
    async fn redacted_token_keeps_only_tail() {
        let pool = TokenPool::from_unchecked(vec!["ghp_secret1234".to_string()]).unwrap();
        let redacted = pool.acquire().redacted();
        assert_eq!(redacted, "…1234");
        assert!(!redacted.contains("secret"));
    }
}
