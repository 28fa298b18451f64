//! PAC document serving and backing-file watching.

pub mod server;
pub mod template;
pub mod watcher;

pub use server::{BindError, PacDocumentServer};
pub use watcher::ChangeNotifier;
