//! Failure-reason classification for opaque provider errors.
//!
//! Provider error shapes vary wildly; at this boundary the raw error text
//! is matched against ordered, case-insensitive substring lists. The first
//! matching category wins; unmatched errors are [`FailoverReason::Unknown`].

use serde::{Deserialize, Serialize};

/// Why a provider call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    Auth,
    RateLimit,
    Timeout,
    Billing,
    ContextOverflow,
    Unknown,
}

impl FailoverReason {
    /// Whether the default retry policy retries this reason.
    ///
    /// Auth failures retry because several gateways surface transient
    /// token-refresh races as 401s.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailoverReason::Auth | FailoverReason::RateLimit | FailoverReason::Timeout
        )
    }
}

impl std::fmt::Display for FailoverReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailoverReason::Auth => "auth",
            FailoverReason::RateLimit => "rate_limit",
            FailoverReason::Timeout => "timeout",
            FailoverReason::Billing => "billing",
            FailoverReason::ContextOverflow => "context_overflow",
            FailoverReason::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

const AUTH_PATTERNS: &[&str] = &[
    "401",
    "unauthorized",
    "invalid api key",
    "invalid_api_key",
    "authentication",
    "forbidden",
    "access denied",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "429",
    "rate limit",
    "rate_limit",
    "too many requests",
    "quota exceeded",
    "overloaded",
];

const TIMEOUT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "deadline exceeded",
    "connection reset",
    "connection refused",
    "502",
    "503",
    "504",
];

const BILLING_PATTERNS: &[&str] = &[
    "billing",
    "payment",
    "insufficient credit",
    "insufficient_quota",
    "spending limit",
    "balance",
];

const CONTEXT_OVERFLOW_PATTERNS: &[&str] = &[
    "context length",
    "context_length",
    "context window",
    "maximum context",
    "input is too long",
    "prompt is too long",
    "token limit",
];

/// Classify an error message into a [`FailoverReason`].
///
/// Ordered category checks, first substring match wins. Matching is
/// case-insensitive.
pub fn classify_error(message: &str) -> FailoverReason {
    let lower = message.to_lowercase();
    let categories: [(&[&str], FailoverReason); 5] = [
        (AUTH_PATTERNS, FailoverReason::Auth),
        (RATE_LIMIT_PATTERNS, FailoverReason::RateLimit),
        (TIMEOUT_PATTERNS, FailoverReason::Timeout),
        (BILLING_PATTERNS, FailoverReason::Billing),
        (CONTEXT_OVERFLOW_PATTERNS, FailoverReason::ContextOverflow),
    ];

    for (patterns, reason) in categories {
        if patterns.iter().any(|p| lower.contains(p)) {
            return reason;
        }
    }
    FailoverReason::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_matches() {
        assert_eq!(classify_error("HTTP 401 Unauthorized"), FailoverReason::Auth);
        assert_eq!(classify_error("Invalid API Key"), FailoverReason::Auth);
    }

    #[test]
    fn rate_limit_matches() {
        assert_eq!(
            classify_error("429 Too Many Requests"),
            FailoverReason::RateLimit
        );
        assert_eq!(classify_error("Rate limit hit"), FailoverReason::RateLimit);
    }

    #[test]
    fn timeout_matches() {
        assert_eq!(classify_error("request timed out"), FailoverReason::Timeout);
        assert_eq!(classify_error("HTTP 503 unavailable"), FailoverReason::Timeout);
    }

    #[test]
    fn billing_matches() {
        assert_eq!(
            classify_error("insufficient credit balance"),
            FailoverReason::Billing
        );
    }

    #[test]
    fn context_overflow_matches() {
        assert_eq!(
            classify_error("maximum context length is 128000 tokens"),
            FailoverReason::ContextOverflow
        );
        assert_eq!(
            classify_error("Your prompt is too long"),
            FailoverReason::ContextOverflow
        );
    }

    #[test]
    fn first_category_wins() {
        // "401" (auth) appears before "rate limit" in category order.
        assert_eq!(
            classify_error("401 rate limit exceeded"),
            FailoverReason::Auth
        );
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(classify_error("TIMED OUT"), FailoverReason::Timeout);
    }

    #[test]
    fn unknown_fallback() {
        assert_eq!(
            classify_error("something strange happened"),
            FailoverReason::Unknown
        );
    }

    #[test]
    fn retryable_reasons() {
        assert!(FailoverReason::Auth.is_retryable());
        assert!(FailoverReason::RateLimit.is_retryable());
        assert!(FailoverReason::Timeout.is_retryable());
        assert!(!FailoverReason::Billing.is_retryable());
        assert!(!FailoverReason::ContextOverflow.is_retryable());
        assert!(!FailoverReason::Unknown.is_retryable());
    }
}
