//! Identity provider backed by the `grocr-server` account API.

use std::sync::{Mutex, PoisonError};

use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::watch;

use super::{validate_credentials, IdentityProvider, MIN_PASSWORD_LEN};
use crate::endpoint::http_url;
use crate::error::{AuthError, Error, Result};
use crate::models::User;

/// Error body returned by the account API.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Success body: the user plus the session token for the realtime socket.
#[derive(Debug, Deserialize)]
struct SessionBody {
    #[serde(flatten)]
    user: User,
    #[serde(default)]
    token: Option<String>,
}

/// Signs in against `POST /sessions` and creates accounts with
/// `POST /accounts`.
#[derive(Debug)]
pub struct HttpAuth {
    client: reqwest::Client,
    server_url: String,
    state: watch::Sender<Option<User>>,
    token: Mutex<Option<String>>,
}

impl HttpAuth {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.into(),
            state,
            token: Mutex::new(None),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().clone()
    }

    /// Session token from the last sign-in, for
    /// [`WsStore::connect_with_token`](crate::WsStore::connect_with_token).
    pub fn token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn post_credentials(&self, path: &str, email: &str, password: &str) -> Result<User> {
        validate_credentials(email, password)?;
        let url = http_url(&self.server_url, path);
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "email": email.trim(),
                "password": password,
            }))
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let SessionBody { user, token } = response
                .json()
                .await
                .map_err(|e| AuthError::Transport(e.to_string()))?;
            tracing::info!("Signed in as {}", user.email);
            *self.token.lock().unwrap_or_else(PoisonError::into_inner) = token;
            self.state.send_replace(Some(user.clone()));
            return Ok(user);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.message)
            .unwrap_or_default();
        Err(error_for_status(status, email.trim(), message))
    }
}

fn error_for_status(status: StatusCode, email: &str, message: String) -> Error {
    match status {
        StatusCode::UNAUTHORIZED => AuthError::InvalidCredentials.into(),
        StatusCode::CONFLICT => AuthError::AccountExists(email.to_string()).into(),
        StatusCode::UNPROCESSABLE_ENTITY => AuthError::WeakPassword(MIN_PASSWORD_LEN).into(),
        StatusCode::BAD_REQUEST => Error::InvalidInput(message),
        _ => AuthError::Transport(format!("{}: {}", status, message)).into(),
    }
}

impl IdentityProvider for HttpAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        self.post_credentials("/sessions", email, password).await
    }

    async fn create_account(&self, email: &str, password: &str) -> Result<User> {
        self.post_credentials("/accounts", email, password).await
    }

    fn sign_out(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.state.send_replace(None);
    }

    fn auth_state(&self) -> watch::Receiver<Option<User>> {
        self.state.subscribe()
    }
}
