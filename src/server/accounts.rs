//! Account API.
//!
//! - `POST /accounts` creates an account and returns the new user
//! - `POST /sessions` checks credentials and returns the user
//!
//! Both answer with a session token next to the user. Clients pass it to
//! `GET /realtime` so the socket knows who is writing.
//!
//! Credentials live in an [`AccountStore`](grocr_core::AccountStore) shared
//! through [`AppState`]; every new account is persisted right away.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use grocr_core::{AuthError, Error, User};
use serde::{Deserialize, Serialize};

use super::AppState;

/// Request body for both endpoints.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Response body for both endpoints.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub user: User,
    pub token: String,
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ApiError {
    error: &'static str,
    message: String,
}

/// Create an account (no auth required).
pub async fn create_account(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Response {
    let mut accounts = state.accounts.write().await;

    match accounts.create(&credentials.email, &credentials.password) {
        Ok(user) => {
            tracing::info!("Created account {}", user);
            if let Some(storage) = &state.storage {
                if let Err(e) = storage.save_accounts(&accounts) {
                    tracing::warn!("Failed to persist accounts: {}", e);
                }
            }
            let token = state.sessions.create(&user);
            (StatusCode::CREATED, Json(SessionResponse { user, token })).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Sign in with email and password.
pub async fn create_session(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Response {
    let accounts = state.accounts.read().await;

    match accounts.verify(&credentials.email, &credentials.password) {
        Ok(user) => {
            tracing::debug!("Session for {}", user);
            let token = state.sessions.create(&user);
            Json(SessionResponse { user, token }).into_response()
        }
        Err(e) => error_response(e),
    }
}

fn error_response(err: Error) -> Response {
    let (status, error) = match &err {
        Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
        Error::Auth(AuthError::InvalidCredentials) => {
            (StatusCode::UNAUTHORIZED, "invalid_credentials")
        }
        Error::Auth(AuthError::AccountExists(_)) => (StatusCode::CONFLICT, "account_exists"),
        Error::Auth(AuthError::WeakPassword(_)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "weak_password")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };

    (
        status,
        Json(ApiError {
            error,
            message: err.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use grocr_core::StoreError;

    #[test]
    fn test_error_response_status() {
        let cases = [
            (Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (AuthError::InvalidCredentials.into(), StatusCode::UNAUTHORIZED),
            (
                AuthError::AccountExists("a@x.com".into()).into(),
                StatusCode::CONFLICT,
            ),
            (
                AuthError::WeakPassword(6).into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                StoreError::Closed.into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(error_response(err).status(), status);
        }
    }
}
