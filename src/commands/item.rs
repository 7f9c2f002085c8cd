use std::time::Duration;

use clap::ValueEnum;
use grocr_core::{item_key, GroceryItem, ListSynchronizer, WsStore};
use tokio::sync::mpsc;

use super::Session;

/// How long to wait for the first list delivery.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Prints the current list once.
pub async fn list(
    session: &Session,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let items = fetch_items(session).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items_json(&items))?);
        }
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No items on the list");
            } else {
                print!("{}", format_table(&items));
            }
        }
    }
    Ok(())
}

pub async fn add(session: &Session, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let list = ListSynchronizer::new(session.store.clone());
    let item = list.add_item(name, &session.user).await?;
    println!("Added: {}", item);
    Ok(())
}

pub async fn toggle(session: &Session, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let list = ListSynchronizer::new(session.store.clone());
    let items = fetch_from(&list).await?;
    let item = find_item(&items, name).ok_or_else(|| format!("Item not found: {}", name))?;

    list.toggle_completed(item).await?;
    if item.completed {
        println!("Marked '{}' as not completed", item.name);
    } else {
        println!("Marked '{}' as completed", item.name);
    }
    Ok(())
}

pub async fn remove(session: &Session, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let list = ListSynchronizer::new(session.store.clone());
    let items = fetch_from(&list).await?;
    let item = find_item(&items, name).ok_or_else(|| format!("Item not found: {}", name))?;

    list.remove_item(item).await?;
    println!("Removed '{}'", item.name);
    Ok(())
}

async fn fetch_items(session: &Session) -> Result<Vec<GroceryItem>, Box<dyn std::error::Error>> {
    let list = ListSynchronizer::new(session.store.clone());
    fetch_from(&list).await
}

/// Waits for the first delivery of `list`'s subscription.
async fn fetch_from(
    list: &ListSynchronizer<WsStore>,
) -> Result<Vec<GroceryItem>, Box<dyn std::error::Error>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = list
        .subscribe(move |items| {
            let _ = tx.send(items);
        })
        .await?;

    let items = tokio::time::timeout(FETCH_TIMEOUT, rx.recv())
        .await
        .map_err(|_| "Timed out waiting for the list")?
        .ok_or("Connection closed before the list arrived")?;
    handle.cancel();
    Ok(items)
}

/// Finds an item by the key its name maps to.
pub fn find_item<'a>(items: &'a [GroceryItem], name: &str) -> Option<&'a GroceryItem> {
    let key = item_key(name);
    items.iter().find(|item| item.key == key)
}

/// Items with their keys, in list order.
fn items_json(items: &[GroceryItem]) -> Vec<serde_json::Value> {
    items
        .iter()
        .map(|item| {
            let mut value = item.to_value();
            if let Some(fields) = value.as_object_mut() {
                fields.insert("key".to_string(), item.key.clone().into());
            }
            value
        })
        .collect()
}

pub fn format_table(items: &[GroceryItem]) -> String {
    let mut out = format!("{:<4}  {:<30}  ADDED BY\n", "DONE", "NAME");
    out.push_str(&"-".repeat(60));
    out.push('\n');
    for item in items {
        let done = if item.completed { "[x]" } else { "[ ]" };
        let name = if item.name.chars().count() > 30 {
            format!("{}...", item.name.chars().take(27).collect::<String>())
        } else {
            item.name.clone()
        };
        out.push_str(&format!("{:<4}  {:<30}  {}\n", done, name, item.added_by_user));
    }
    out.push_str(&format!("\nTotal: {} item(s)\n", items.len()));
    out
}
