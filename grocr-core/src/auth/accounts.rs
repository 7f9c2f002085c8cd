//! Credential registry.
//!
//! Accounts are keyed by normalized (trimmed, lower-cased) email. Passwords
//! are stored as SHA-256 over a random per-account salt followed by the
//! password. The registry is plain serde data so a server can persist it.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::validate_credentials;
use crate::error::{AuthError, Result};
use crate::models::User;

/// Shortest accepted password.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    uid: String,
    email: String,
    salt: String,
    password_hash: String,
}

impl Account {
    fn user(&self) -> User {
        User::new(self.uid.clone(), self.email.clone())
    }
}

/// Email/password accounts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountStore {
    accounts: HashMap<String, Account>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an account with a fresh uid.
    pub fn create(&mut self, email: &str, password: &str) -> Result<User> {
        validate_credentials(email, password)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword(MIN_PASSWORD_LEN).into());
        }

        let email = email.trim();
        let key = normalize_email(email);
        if self.accounts.contains_key(&key) {
            return Err(AuthError::AccountExists(email.to_string()).into());
        }

        let mut salt = [0u8; 16];
        rand::rng().fill(&mut salt);
        let salt = STANDARD.encode(salt);

        let account = Account {
            uid: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: hash_password(&salt, password),
            salt,
        };
        let user = account.user();
        self.accounts.insert(key, account);
        Ok(user)
    }

    /// Checks credentials and returns the account's user.
    pub fn verify(&self, email: &str, password: &str) -> Result<User> {
        validate_credentials(email, password)?;
        let account = self
            .accounts
            .get(&normalize_email(email))
            .ok_or(AuthError::InvalidCredentials)?;

        if hash_password(&account.salt, password) != account.password_hash {
            return Err(AuthError::InvalidCredentials.into());
        }
        Ok(account.user())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}
