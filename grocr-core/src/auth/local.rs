use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

use super::{AccountStore, IdentityProvider};
use crate::error::Result;
use crate::models::User;

/// In-process identity provider over an [`AccountStore`].
#[derive(Debug)]
pub struct LocalAuth {
    accounts: Mutex<AccountStore>,
    state: watch::Sender<Option<User>>,
}

impl LocalAuth {
    pub fn new() -> Self {
        Self::with_accounts(AccountStore::new())
    }

    pub fn with_accounts(accounts: AccountStore) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(accounts),
            state,
        }
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().clone()
    }

    fn resolve(&self, user: User) -> User {
        tracing::info!("Signed in as {}", user.email);
        self.state.send_replace(Some(user.clone()));
        user
    }
}

impl Default for LocalAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for LocalAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        let user = self
            .accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .verify(email, password)?;
        Ok(self.resolve(user))
    }

    async fn create_account(&self, email: &str, password: &str) -> Result<User> {
        let user = self
            .accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .create(email, password)?;
        Ok(self.resolve(user))
    }

    fn sign_out(&self) {
        self.state.send_replace(None);
    }

    fn auth_state(&self) -> watch::Receiver<Option<User>> {
        self.state.subscribe()
    }
}
