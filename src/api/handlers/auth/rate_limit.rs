//! Rate limiting for auth endpoints.
//!
//! Three named limiters: login (5/min, keyed by folded email + client IP),
//! two-factor (5/min, keyed by challenge session id), email verification
//! (3/min, keyed by user id with an IP fallback). Enforcement is a sliding
//! window over per-key timestamps; the trait seam lets tests swap in a no-op.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::utils::fold_ascii_lowercase;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RateLimitAction {
    Login,
    TwoFactor,
    EmailVerification,
}

impl RateLimitAction {
    fn limit(self) -> usize {
        match self {
            Self::Login | Self::TwoFactor => 5,
            Self::EmailVerification => 3,
        }
    }

    fn window(self) -> Duration {
        Duration::from_secs(60)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_seconds: u64 },
}

/// Decision seam so handlers never depend on the concrete limiter.
pub trait RateLimiter: Send + Sync {
    fn check(&self, action: RateLimitAction, key: &str) -> RateLimitDecision;
}

/// Limiter that always allows; used in tests and single-user setups.
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _action: RateLimitAction, _key: &str) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// In-memory sliding-window limiter shared across worker threads.
pub struct SlidingWindowRateLimiter {
    windows: Mutex<HashMap<(RateLimitAction, String), VecDeque<Instant>>>,
}

impl Default for SlidingWindowRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl SlidingWindowRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Internal: check + record with explicit timestamp (for testing).
    fn check_and_record_at(
        &self,
        action: RateLimitAction,
        key: &str,
        now: Instant,
    ) -> RateLimitDecision {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let window = action.window();
        let entry = windows
            .entry((action, key.to_string()))
            .or_insert_with(VecDeque::new);

        while entry
            .front()
            .is_some_and(|first| now.duration_since(*first) >= window)
        {
            entry.pop_front();
        }

        if entry.len() >= action.limit() {
            let retry_after_seconds = entry
                .front()
                .map(|first| window.saturating_sub(now.duration_since(*first)))
                .map_or(window.as_secs(), |remaining| remaining.as_secs().max(1));
            return RateLimitDecision::Limited {
                retry_after_seconds,
            };
        }

        entry.push_back(now);
        RateLimitDecision::Allowed
    }
}

impl RateLimiter for SlidingWindowRateLimiter {
    fn check(&self, action: RateLimitAction, key: &str) -> RateLimitDecision {
        self.check_and_record_at(action, key, Instant::now())
    }
}

/// Bucket key for login attempts: folded email plus client IP.
pub(super) fn login_key(email: &str, client_ip: Option<&str>) -> String {
    format!(
        "{}|{}",
        fold_ascii_lowercase(email),
        client_ip.unwrap_or("unknown")
    )
}

/// Bucket key for two-factor challenges: the pending session id.
pub(super) fn two_factor_key(challenge_session_id: Uuid) -> String {
    challenge_session_id.to_string()
}

/// Bucket key for verification email traffic: user id, else client IP.
pub(super) fn verification_key(user_id: Option<i64>, client_ip: Option<&str>) -> String {
    match user_id {
        Some(id) => format!("user:{id}"),
        None => format!("ip:{}", client_ip.unwrap_or("unknown")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_key_is_case_insensitive_and_transliterated() {
        let a = login_key("USER@x.com", Some("1.2.3.4"));
        let b = login_key("user@x.com", Some("1.2.3.4"));
        let c = login_key("josé@x.com", Some("1.2.3.4"));
        let d = login_key("jose@x.com", Some("1.2.3.4"));
        assert_eq!(a, b);
        assert_eq!(c, d);
        assert_eq!(a, "user@x.com|1.2.3.4");
    }

    #[test]
    fn login_key_differs_per_ip() {
        let a = login_key("user@x.com", Some("1.2.3.4"));
        let b = login_key("user@x.com", Some("5.6.7.8"));
        let c = login_key("user@x.com", None);
        assert_ne!(a, b);
        assert_eq!(c, "user@x.com|unknown");
    }

    #[test]
    fn verification_key_prefers_user_id() {
        assert_eq!(verification_key(Some(7), Some("1.2.3.4")), "user:7");
        assert_eq!(verification_key(None, Some("1.2.3.4")), "ip:1.2.3.4");
        assert_eq!(verification_key(None, None), "ip:unknown");
    }

    #[test]
    fn sliding_window_allows_up_to_limit() {
        let limiter = SlidingWindowRateLimiter::new();
        let now = Instant::now();
        for _ in 0..5 {
            assert_eq!(
                limiter.check_and_record_at(RateLimitAction::Login, "k", now),
                RateLimitDecision::Allowed
            );
        }
        assert!(matches!(
            limiter.check_and_record_at(RateLimitAction::Login, "k", now),
            RateLimitDecision::Limited { .. }
        ));
    }

    #[test]
    fn sliding_window_resets_after_window() {
        let limiter = SlidingWindowRateLimiter::new();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.check_and_record_at(RateLimitAction::Login, "k", start);
        }
        let later = start + Duration::from_secs(61);
        assert_eq!(
            limiter.check_and_record_at(RateLimitAction::Login, "k", later),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn verification_limit_is_three() {
        let limiter = SlidingWindowRateLimiter::new();
        let now = Instant::now();
        for _ in 0..3 {
            assert_eq!(
                limiter.check_and_record_at(RateLimitAction::EmailVerification, "user:1", now),
                RateLimitDecision::Allowed
            );
        }
        let decision =
            limiter.check_and_record_at(RateLimitAction::EmailVerification, "user:1", now);
        match decision {
            RateLimitDecision::Limited {
                retry_after_seconds,
            } => assert!((1..=60).contains(&retry_after_seconds)),
            RateLimitDecision::Allowed => panic!("expected limited decision"),
        }
    }

    #[test]
    fn buckets_are_isolated_by_key_and_action() {
        let limiter = SlidingWindowRateLimiter::new();
        let now = Instant::now();
        for _ in 0..5 {
            limiter.check_and_record_at(RateLimitAction::Login, "a", now);
        }
        assert_eq!(
            limiter.check_and_record_at(RateLimitAction::Login, "b", now),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_and_record_at(RateLimitAction::TwoFactor, "a", now),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn noop_always_allows() {
        let limiter = NoopRateLimiter;
        for _ in 0..100 {
            assert_eq!(
                limiter.check(RateLimitAction::Login, "k"),
                RateLimitDecision::Allowed
            );
        }
    }
}
