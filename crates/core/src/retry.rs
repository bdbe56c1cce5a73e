//! Retry driver: classifies transport errors as retryable/non-retryable and
//! computes exponential backoff with `Retry-After` honored, per spec §4.2.

use std::time::Duration;

/// Maximum attempts for any LLM transport call (spec §4.2).
pub const MAX_ATTEMPTS: u32 = 5;

/// Classification of a failed attempt, as reported by a transport client.
#[derive(Debug, Clone)]
pub enum Failure {
    /// HTTP 429, with the raw `Retry-After` header value if present
    /// (seconds, per HTTP semantics).
    RateLimited { retry_after_secs: Option<u64> },
    /// HTTP 5xx or a transport-level error (connection reset, DNS, etc).
    ServerOrTransport,
    /// Any other 4xx (auth, bad request, not found, permission) — terminal.
    NonRetryable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    GiveUp,
}

/// Decide whether `attempt` (0-indexed: 0 = first failure, about to be
/// retried as attempt #2) should retry, and for how long to wait first.
///
/// Delay rule in priority order:
/// - Rate-limit (429): honor `Retry-After` exactly; else `1000 * 2^(attempt+2)` ms.
/// - 5xx / transport: `1000 * 2^attempt` ms.
/// - Other 4xx: non-retryable, immediate failure.
pub fn plan_retry(attempt: u32, failure: &Failure) -> (RetryDecision, Duration) {
    if attempt + 1 >= MAX_ATTEMPTS {
        return (RetryDecision::GiveUp, Duration::ZERO);
    }

    match failure {
        Failure::RateLimited { retry_after_secs } => {
            let delay = match retry_after_secs {
                Some(secs) => Duration::from_secs(*secs),
                None => Duration::from_millis(1000 * 2u64.pow(attempt + 2)),
            };
            (RetryDecision::Retry, delay)
        }
        Failure::ServerOrTransport => {
            let delay = Duration::from_millis(1000 * 2u64.pow(attempt));
            (RetryDecision::Retry, delay)
        }
        Failure::NonRetryable => (RetryDecision::GiveUp, Duration::ZERO),
    }
}

/// Classify an HTTP status code into a `Failure`, given the raw
/// `Retry-After` header value (if the response carried one).
pub fn classify_status(status: u16, retry_after_header: Option<&str>) -> Option<Failure> {
    if (200..300).contains(&status) {
        return None;
    }
    if status == 429 {
        let retry_after_secs = retry_after_header.and_then(|v| v.trim().parse::<u64>().ok());
        return Some(Failure::RateLimited { retry_after_secs });
    }
    if status >= 500 {
        return Some(Failure::ServerOrTransport);
    }
    Some(Failure::NonRetryable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_honors_retry_after_header() {
        let failure = Failure::RateLimited {
            retry_after_secs: Some(2),
        };
        let (decision, delay) = plan_retry(0, &failure);
        assert_eq!(decision, RetryDecision::Retry);
        assert_eq!(delay, Duration::from_secs(2));
    }

    #[test]
    fn rate_limit_without_header_uses_exponential_formula() {
        let failure = Failure::RateLimited {
            retry_after_secs: None,
        };
        let (_, delay) = plan_retry(1, &failure);
        assert_eq!(delay, Duration::from_millis(8000));
    }

    #[test]
    fn server_error_backs_off_without_the_plus_two_offset() {
        let failure = Failure::ServerOrTransport;
        let (_, delay) = plan_retry(2, &failure);
        assert_eq!(delay, Duration::from_millis(4000));
    }

    #[test]
    fn non_retryable_4xx_gives_up_immediately() {
        let failure = classify_status(401, None).unwrap();
        let (decision, _) = plan_retry(0, &failure);
        assert_eq!(decision, RetryDecision::GiveUp);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let failure = Failure::ServerOrTransport;
        let (decision, _) = plan_retry(MAX_ATTEMPTS - 1, &failure);
        assert_eq!(decision, RetryDecision::GiveUp);
    }

    #[test]
    fn classify_status_recognizes_success_as_non_failure() {
        assert!(classify_status(200, None).is_none());
    }
}
