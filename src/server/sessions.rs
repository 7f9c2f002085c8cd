//! Session tokens handed out by the account API.
//!
//! A token names the user that signed in. The realtime endpoint resolves it
//! to decide which presence record the socket may write. Tokens live in
//! memory only, so a server restart signs every client out of the socket.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use grocr_core::User;
use rand::Rng;

/// How long a session token stays valid.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct SessionData {
    user: User,
    expires_at: Instant,
}

/// In-memory session tokens with expiry.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionData>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Issues a new token for `user`.
    ///
    /// Returns the token string (32 bytes, base64url encoded).
    pub fn create(&self, user: &User) -> String {
        let token = generate_token();
        let data = SessionData {
            user: user.clone(),
            expires_at: Instant::now() + self.ttl,
        };

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|_, data| data.expires_at > Instant::now());
        sessions.insert(token.clone(), data);

        token
    }

    /// The user a token was issued for, unless it is unknown or expired.
    ///
    /// Unlike a login token, a session token can be resolved many times.
    pub fn user(&self, token: &str) -> Option<User> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(token)
            .filter(|data| Instant::now() <= data.expires_at)
            .map(|data| data.user.clone())
    }

    /// Returns the number of tokens currently stored.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

/// Returns 32 random bytes encoded as base64url (no padding).
fn generate_token() -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_create_returns_unique_tokens() {
        let store = SessionStore::default();

        let token1 = store.create(&User::new("u1", "a@x.com"));
        let token2 = store.create(&User::new("u1", "a@x.com"));

        assert_ne!(token1, token2);
        assert_eq!(token1.len(), 43);
        assert!(token1
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_token_resolves_to_user_repeatedly() {
        let store = SessionStore::default();
        let token = store.create(&User::new("u1", "a@x.com"));

        assert_eq!(store.user(&token), Some(User::new("u1", "a@x.com")));
        assert_eq!(store.user(&token), Some(User::new("u1", "a@x.com")));
        assert_eq!(store.user("nonexistent-token"), None);
    }

    #[test]
    fn test_expired_token_is_rejected_and_pruned() {
        let store = SessionStore::new(Duration::from_secs(0));
        let token = store.create(&User::new("u1", "a@x.com"));
        thread::sleep(Duration::from_millis(10));

        assert_eq!(store.user(&token), None);

        store.create(&User::new("u2", "b@x.com"));
        assert_eq!(store.len(), 1);
    }
}
