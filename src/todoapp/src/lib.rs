pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod store;
pub mod templates;

pub use config::AppConfig;
pub use error::{Result, TodoError};
pub use http::AppState;
pub use model::TodoItem;
pub use store::{FileStore, MemoryStore, TodoStore};
pub use templates::Templates;
