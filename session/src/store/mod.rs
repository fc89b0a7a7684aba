pub mod sqlite_store;
mod sweeper;

use crate::error::StoreError;
use crate::model::SessionId;

/// Capability set a session middleware needs from its backing store.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    type Session: Send + Sync;

    /// Live session for `sid`, or `None` when absent or expired.
    async fn get(&self, sid: &str) -> Result<Option<Self::Session>, StoreError>;

    /// Insert or replace the session for `sid`.
    async fn set(&self, sid: &str, session: &Self::Session) -> Result<(), StoreError>;

    async fn destroy(&self, sid: &str) -> Result<(), StoreError>;

    /// Push the expiry of a still-live session forward.
    async fn touch(&self, sid: &str, session: &Self::Session) -> Result<(), StoreError>;

    /// Number of stored rows, live or not.
    async fn length(&self) -> Result<u64, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;

    /// Every live session.
    async fn all(&self) -> Result<Vec<(SessionId, Self::Session)>, StoreError>;
}
