use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use session::model::{SessionData, SessionId, SessionPayload, expiry_for_write};
use session::store::SessionStore;
use session::time::{Clock, ManualClock};
use session::StoreError;

/// HashMap-backed store with the same expiry rules as the SQLite one.
#[derive(Clone)]
pub struct InMemorySessionStore {
    pub map: Arc<Mutex<HashMap<SessionId, (i64, SessionData)>>>,
    clock: ManualClock,
}

impl InMemorySessionStore {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            map: Arc::default(),
            clock,
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    type Session = SessionData;

    async fn get(&self, sid: &str) -> Result<Option<SessionData>, StoreError> {
        let now = self.clock.now_ms();
        Ok(self
            .map
            .lock()
            .await
            .get(sid)
            .filter(|(expired, _)| now <= *expired)
            .map(|(_, s)| s.clone()))
    }

    async fn set(&self, sid: &str, session: &SessionData) -> Result<(), StoreError> {
        let expired = expiry_for_write(session.cookie_max_age(), self.clock.now_ms());
        self.map
            .lock()
            .await
            .insert(sid.to_string(), (expired, session.clone()));
        Ok(())
    }

    async fn destroy(&self, sid: &str) -> Result<(), StoreError> {
        self.map.lock().await.remove(sid);
        Ok(())
    }

    async fn touch(&self, sid: &str, session: &SessionData) -> Result<(), StoreError> {
        let Some(expires) = session.cookie_expires()? else {
            return Ok(());
        };
        let now = self.clock.now_ms();

        if let Some((expired, _)) = self.map.lock().await.get_mut(sid) {
            if now <= *expired {
                *expired = expires.timestamp_millis();
            }
        }
        Ok(())
    }

    async fn length(&self) -> Result<u64, StoreError> {
        Ok(self.map.lock().await.len() as u64)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.map.lock().await.clear();
        Ok(())
    }

    async fn all(&self) -> Result<Vec<(SessionId, SessionData)>, StoreError> {
        let now = self.clock.now_ms();
        Ok(self
            .map
            .lock()
            .await
            .iter()
            .filter(|(_, (expired, _))| now <= *expired)
            .map(|(sid, (_, s))| (sid.clone(), s.clone()))
            .collect())
    }
}
