//! Bearer token cache with proactive refresh.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Tokens with less than this much lifetime left are refreshed before use.
pub const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// A bearer token and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub value: String,
    pub expires_at: Instant,
}

impl CachedToken {
    pub fn new(value: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            value: value.into(),
            expires_at: Instant::now() + expires_in,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// True when the token expires within `margin` (or already has).
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.remaining() <= margin
    }
}

/// Tokens keyed by credential identity (e.g. OAuth client id).
#[derive(Debug)]
pub struct TokenCache {
    tokens: DashMap<String, CachedToken>,
    margin: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(TOKEN_REFRESH_MARGIN)
    }
}

impl TokenCache {
    pub fn new(margin: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            margin,
        }
    }

    /// A token that is still comfortably valid, if any.
    pub fn fresh(&self, key: &str) -> Option<String> {
        let entry = self.tokens.get(key)?;
        if entry.expires_within(self.margin) {
            tracing::debug!(
                "token for {key} expiring in {:?}, refresh needed",
                entry.remaining()
            );
            None
        } else {
            Some(entry.value.clone())
        }
    }

    pub fn store(&self, key: &str, token: CachedToken) {
        self.tokens.insert(key.to_string(), token);
    }

    pub fn invalidate(&self, key: &str) {
        self.tokens.remove(key);
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_margin_is_at_most_a_minute() {
        assert!(TOKEN_REFRESH_MARGIN <= Duration::from_secs(60));
    }

    #[test]
    fn test_thirty_seconds_left_is_expiring() {
        let cache = TokenCache::default();
        cache.store("client", CachedToken::new("abc", Duration::from_secs(30)));
        assert_eq!(cache.fresh("client"), None);
    }

    #[test]
    fn test_long_lived_token_is_reused() {
        let cache = TokenCache::default();
        cache.store("client", CachedToken::new("abc", Duration::from_secs(7200)));
        assert_eq!(cache.fresh("client").as_deref(), Some("abc"));
    }

    #[test]
    fn test_last_writer_wins() {
        let cache = TokenCache::default();
        cache.store("client", CachedToken::new("first", Duration::from_secs(7200)));
        cache.store("client", CachedToken::new("second", Duration::from_secs(7200)));
        assert_eq!(cache.fresh("client").as_deref(), Some("second"));
        cache.invalidate("client");
        assert_eq!(cache.fresh("client"), None);
    }

    #[test]
    fn test_expired_token_has_zero_remaining() {
        let token = CachedToken {
            value: "old".to_string(),
            expires_at: Instant::now() - Duration::from_secs(1),
        };
        assert_eq!(token.remaining(), Duration::ZERO);
        assert!(token.expires_within(Duration::ZERO));
    }
}
