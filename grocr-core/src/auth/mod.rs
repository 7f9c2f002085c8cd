//! Identity providers.
//!
//! The sync components only need a resolved [`User`]; how it is obtained is
//! behind [`IdentityProvider`]. Two providers are bundled:
//! - [`LocalAuth`] keeps accounts in-process (tests, embedded use)
//! - [`HttpAuth`] talks to the account API of `grocr-server`

mod accounts;
mod http;
mod local;

use std::future::Future;

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::models::User;

pub use accounts::{AccountStore, MIN_PASSWORD_LEN};
pub use http::HttpAuth;
pub use local::LocalAuth;

/// Resolves users from email/password credentials.
pub trait IdentityProvider: Send + Sync {
    /// Signs in an existing account.
    fn sign_in(&self, email: &str, password: &str) -> impl Future<Output = Result<User>> + Send;

    /// Creates an account and signs it in.
    fn create_account(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<User>> + Send;

    fn sign_out(&self);

    /// Current user, updated on every sign-in and sign-out.
    fn auth_state(&self) -> watch::Receiver<Option<User>>;
}

/// Rejects empty or malformed credentials before any provider call.
pub fn validate_credentials(email: &str, password: &str) -> Result<()> {
    let email = email.trim();
    if email.is_empty() {
        return Err(Error::invalid_input("email must not be empty"));
    }
    if !email.contains('@') {
        return Err(Error::invalid_input(format!(
            "'{}' is not an email address",
            email
        )));
    }
    if password.is_empty() {
        return Err(Error::invalid_input("password must not be empty"));
    }
    Ok(())
}
