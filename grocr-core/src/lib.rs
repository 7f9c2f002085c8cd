//! Grocr Core Library
//!
//! Realtime shared grocery list: a store abstraction with listeners and
//! on-disconnect directives, the list synchronizer, the presence tracker and
//! identity providers.

pub mod auth;
pub mod endpoint;
pub mod error;
pub mod models;
pub mod path;
pub mod protocol;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod tree;

pub use auth::{AccountStore, HttpAuth, IdentityProvider, LocalAuth, MIN_PASSWORD_LEN};
pub use error::{AuthError, Error, Result, StoreError};
pub use models::{item_key, GroceryItem, User};
pub use path::StorePath;
pub use protocol::{ClientMessage, ErrorCode, ServerMessage};
pub use snapshot::{OrderBy, Query, Snapshot};
pub use store::{MemoryConnection, MemoryStore, RemoteStore, Subscription, WsStore};
pub use sync::{
    items_root, presence_root, ListSynchronizer, ListenerHandle, PresenceState, PresenceTracker,
    ITEMS_PATH, PRESENCE_PATH,
};
pub use tree::Tree;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
