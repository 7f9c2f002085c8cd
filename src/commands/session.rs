use std::sync::Arc;

use grocr_core::{HttpAuth, IdentityProvider, User, WsStore};

use crate::config::Config;

const MISSING_CREDENTIALS: &str = "No credentials configured. Set email and password in the \
config file, via GROCR_EMAIL/GROCR_PASSWORD, or with --email/--password";

/// A signed-in user with an open realtime connection.
pub struct Session {
    pub user: User,
    pub auth: HttpAuth,
    pub store: Arc<WsStore>,
}

impl Session {
    /// Signs in with the configured credentials and connects to the server.
    pub async fn open(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let (email, password) = config.credentials().ok_or(MISSING_CREDENTIALS)?;
        let auth = HttpAuth::new(config.server_url.value.clone());
        let user = auth.sign_in(email, password).await?;
        let token = auth.token();
        let store =
            Arc::new(WsStore::connect_with_token(&config.server_url.value, token.as_deref()).await?);
        Ok(Self { user, auth, store })
    }

    /// Closes the realtime connection.
    pub fn close(&self) {
        self.store.close();
    }
}

/// Creates an account with the configured credentials.
pub async fn signup(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let (email, password) = config.credentials().ok_or(MISSING_CREDENTIALS)?;
    let auth = HttpAuth::new(config.server_url.value.clone());
    let user = auth.create_account(email, password).await?;
    println!("Created account: {}", user);
    Ok(())
}

/// Signs in with the configured credentials.
pub async fn login(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let (email, password) = config.credentials().ok_or(MISSING_CREDENTIALS)?;
    let auth = HttpAuth::new(config.server_url.value.clone());
    let user = auth.sign_in(email, password).await?;
    println!("Signed in as {}", user);
    Ok(())
}
