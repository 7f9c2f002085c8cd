//! The two realtime components built on [`RemoteStore`](crate::store::RemoteStore):
//! the [`ListSynchronizer`] for the shared grocery list and the
//! [`PresenceTracker`] for connected users.

mod handle;
mod list;
mod presence;

pub use handle::ListenerHandle;
pub use list::{items_root, rebuild_items, ListSynchronizer, ITEMS_PATH};
pub use presence::{presence_root, PresenceState, PresenceTracker, PRESENCE_PATH};
