use serde::{Deserialize, Serialize};
use std::fmt;

/// A signed-in user as resolved by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    /// Stable identity, used as the presence key.
    pub uid: String,
    /// Contact handle, recorded as `addedByUser` on new items.
    pub email: String,
}

impl User {
    pub fn new(uid: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.email, self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_display() {
        let user = User::new("u1", "a@x.com");
        assert_eq!(user.to_string(), "a@x.com (u1)");
    }

    #[test]
    fn test_user_json_roundtrip() {
        let user = User::new("u1", "a@x.com");
        let json = serde_json::to_string(&user).unwrap();
        assert_eq!(json, r#"{"uid":"u1","email":"a@x.com"}"#);
        let parsed: User = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, user);
    }
}
