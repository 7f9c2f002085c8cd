mod config_cmd;
mod item;
mod session;
mod watch;

pub use config_cmd::ConfigCommand;
pub use item::{add, list, remove, toggle, OutputFormat};
pub use session::{login, signup, Session};
pub use watch::watch;
