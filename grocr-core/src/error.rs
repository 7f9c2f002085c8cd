//! Error types shared by the store, the identity providers and the sync components.

use thiserror::Error;

/// Top-level error returned by the List Synchronizer, Presence Tracker and
/// identity providers.
#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected before any remote call was attempted.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// The remote store failed to apply a write or register a subscription.
    #[error(transparent)]
    RemoteStore(#[from] StoreError),
    /// The identity provider rejected the request.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl Error {
    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }
}

/// Errors reported by a [`RemoteStore`](crate::store::RemoteStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Failed to reach the store (connect, socket or send failure).
    #[error("Connection error: {0}")]
    Connection(String),
    /// The store refused the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// The store rejected a path.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    /// Malformed or unexpected frame on the wire.
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// The connection was closed before the operation completed.
    #[error("Connection closed")]
    Closed,
    /// The store reported an internal failure.
    #[error("Store error: {0}")]
    Internal(String),
}

/// Errors reported by an [`IdentityProvider`](crate::auth::IdentityProvider).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("An account already exists for {0}")]
    AccountExists(String),
    #[error("Password must be at least {0} characters")]
    WeakPassword(usize),
    /// Failed to reach the identity service.
    #[error("Auth service error: {0}")]
    Transport(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
