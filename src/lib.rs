//! Grocr realtime server.
//!
//! Shared by the `grocr-server` binary; the list and presence logic itself
//! lives in `grocr-core`.

pub mod server;
