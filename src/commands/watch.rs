use grocr_core::{GroceryItem, IdentityProvider, ListSynchronizer, PresenceTracker};

use super::item::format_table;
use super::Session;

/// Records presence and prints every list and online-count change until
/// Ctrl-C.
pub async fn watch(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
    let presence = PresenceTracker::new(session.store.clone());
    let _count_handle = presence
        .subscribe_count(|count| {
            println!("[{}] {} user(s) online", timestamp(), count);
        })
        .await?;
    let _presence_handle = presence.follow(session.auth.auth_state());

    let list = ListSynchronizer::new(session.store.clone());
    let _list_handle = list
        .subscribe(|items: Vec<GroceryItem>| {
            println!("[{}] List updated", timestamp());
            print!("{}", format_table(&items));
        })
        .await?;

    println!("Watching as {}. Press Ctrl-C to stop.", session.user.email);
    tokio::signal::ctrl_c().await?;
    Ok(())
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
