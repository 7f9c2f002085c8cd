mod item;
mod user;

pub use item::{item_key, GroceryItem};
pub use user::User;
