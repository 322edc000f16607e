//! Forge API error types.
//!
//! This module defines error types that distinguish between transient and
//! permanent Forge API failures. The distinction is critical for retry logic:
//!
//! - **Transient** errors are retriable (5xx, network timeouts)
//! - **Rate-limited** errors sleep until the budget resets
//! - **Abuse-limited** errors back off a fixed interval
//! - **Permanent** errors are surfaced to the caller immediately
//!
//! Rate-limit handling never fails a unit of work; the miner and reproducer
//! loops only ever see transient-exhausted or permanent errors.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// The kind of Forge API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgeErrorKind {
    /// Transient error - safe to retry with backoff.
    ///
    /// Examples: HTTP 5xx, network timeouts, connection resets.
    Transient,

    /// The hourly call budget of the credential is exhausted (HTTP 429, or
    /// 403 with rate-limit markers). The handler sleeps until the reset
    /// instant and retries.
    RateLimited,

    /// The Forge's secondary abuse-detection limit triggered. The handler
    /// sleeps a fixed back-off and retries.
    AbuseLimited,

    /// Permanent error - retrying will not help.
    ///
    /// Examples: 404s, invalid credentials, validation failures.
    Permanent,
}

impl ForgeErrorKind {
    /// Returns true if the retry layer absorbs this error.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, ForgeErrorKind::Permanent)
    }
}

/// A Forge API error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct ForgeError {
    /// The kind of error (drives retry behavior).
    pub kind: ForgeErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// When a rate-limited credential's budget resets, if the Forge said.
    pub reset_at: Option<DateTime<Utc>>,

    /// A human-readable description of the error.
    pub message: String,
}

impl fmt::Display for ForgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "Forge API error (HTTP {}): {}", code, self.message),
            None => write!(f, "Forge API error: {}", self.message),
        }
    }
}

impl ForgeError {
    pub fn transient(message: impl Into<String>) -> Self {
        ForgeError {
            kind: ForgeErrorKind::Transient,
            status_code: None,
            reset_at: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ForgeError {
            kind: ForgeErrorKind::Permanent,
            status_code: None,
            reset_at: None,
            message: message.into(),
        }
    }

    pub fn rate_limited(reset_at: Option<DateTime<Utc>>) -> Self {
        ForgeError {
            kind: ForgeErrorKind::RateLimited,
            status_code: Some(403),
            reset_at,
            message: "API rate limit exceeded".to_string(),
        }
    }

    /// Categorizes an octocrab error.
    ///
    /// octocrab's `Error` does not expose a stable status-code accessor
    /// across all of its variants, so this falls back to well-established
    /// message patterns. The fallback behavior (no status code) is safe: it
    /// results in conservative categorization.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let message = err.to_string();
        let status_code = extract_status_code(&message);
        Self::categorize(status_code, message)
    }

    /// Categorizes a reqwest error.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let status_code = err.status().map(|s| s.as_u16());
        Self::categorize(status_code, err.to_string())
    }

    fn categorize(status_code: Option<u16>, message: String) -> Self {
        let kind = if is_abuse_limit_message(&message) {
            ForgeErrorKind::AbuseLimited
        } else if status_code == Some(429)
            || (status_code == Some(403) && is_rate_limit_message(&message))
        {
            ForgeErrorKind::RateLimited
        } else {
            match status_code {
                Some(code) if (500..600).contains(&code) => ForgeErrorKind::Transient,
                Some(_) => ForgeErrorKind::Permanent,
                None => {
                    if is_network_error(&message) {
                        ForgeErrorKind::Transient
                    } else {
                        ForgeErrorKind::Permanent
                    }
                }
            }
        };

        ForgeError {
            kind,
            status_code,
            reset_at: None,
            message,
        }
    }
}

/// Extracts an HTTP status code from common error message patterns.
fn extract_status_code(message: &str) -> Option<u16> {
    if let Some(idx) = message.find("status: ") {
        let rest = &message[idx + 8..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(code) = digits.parse() {
            return Some(code);
        }
    }

    let lower = message.to_lowercase();
    for (needle, code) in [
        ("404", 404u16),
        ("403", 403),
        ("401", 401),
        ("422", 422),
        ("429", 429),
        ("500", 500),
        ("502", 502),
        ("503", 503),
    ] {
        if message.contains(needle) {
            // "404" alone is too loose; require a corroborating phrase for it.
            if code == 404 && !lower.contains("not found") {
                continue;
            }
            return Some(code);
        }
    }
    None
}

/// Checks if an error message indicates the primary rate limit.
fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("api rate")
}

/// Checks if an error message indicates the secondary abuse-detection limit.
fn is_abuse_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("secondary rate") || lower.contains("abuse detection")
}

/// Checks if an error message indicates a network-level error.
fn is_network_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("network")
        || lower.contains("dns")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_detection() {
        assert!(is_rate_limit_message("API rate limit exceeded"));
        assert!(!is_rate_limit_message("Permission denied"));
        assert!(is_abuse_limit_message("secondary rate limit hit"));
        assert!(is_abuse_limit_message("abuse detection mechanism triggered"));
        assert!(!is_abuse_limit_message("rate limit exceeded"));
    }

    #[test]
    fn network_error_detection() {
        assert!(is_network_error("connection timeout"));
        assert!(is_network_error("DNS resolution failed"));
        assert!(is_network_error("request timed out"));
        assert!(!is_network_error("Not found"));
    }

    #[test]
    fn status_code_extraction() {
        assert_eq!(extract_status_code("GitHub error, status: 502"), Some(502));
        assert_eq!(extract_status_code("resource not found (404)"), Some(404));
        assert_eq!(extract_status_code("a 404 without the phrase"), None);
        assert_eq!(extract_status_code("nothing here"), None);
    }

    #[test]
    fn categorization() {
        let e = ForgeError::categorize(Some(503), "upstream flaked".to_string());
        assert_eq!(e.kind, ForgeErrorKind::Transient);

        let e = ForgeError::categorize(Some(404), "not found".to_string());
        assert_eq!(e.kind, ForgeErrorKind::Permanent);

        let e = ForgeError::categorize(Some(403), "API rate limit exceeded".to_string());
        assert_eq!(e.kind, ForgeErrorKind::RateLimited);

        let e = ForgeError::categorize(Some(403), "abuse detection mechanism".to_string());
        assert_eq!(e.kind, ForgeErrorKind::AbuseLimited);

        let e = ForgeError::categorize(None, "connection reset by peer".to_string());
        assert_eq!(e.kind, ForgeErrorKind::Transient);
    }

    #[test]
    fn kind_retriability() {
        assert!(ForgeErrorKind::Transient.is_retriable());
        assert!(ForgeErrorKind::RateLimited.is_retriable());
        assert!(ForgeErrorKind::AbuseLimited.is_retriable());
        assert!(!ForgeErrorKind::Permanent.is_retriable());
    }
}
