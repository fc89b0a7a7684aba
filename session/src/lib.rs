//! SQLite persistence for HTTP session middleware.
//!
//! Sessions are stored one row per session id with an absolute expiry, read
//! back only while live, and removed by a periodic background sweep.
pub mod config;
pub mod error;
pub mod model;
pub mod store;
pub mod time;

pub use config::{DatabaseTarget, OpenMode, StoreConfig};
pub use error::StoreError;
pub use model::{SessionData, SessionId, SessionPayload};
pub use store::SessionStore;
pub use store::sqlite_store::{SQLiteSessionStore, SessionStoreBuilder};
