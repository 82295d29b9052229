//! Persistent chat history

mod session;
mod store;

pub use session::{ChatSession, SESSIONS_KEY, SessionStore};
pub use store::{FileStore, KeyValueStore, MemoryStore};
