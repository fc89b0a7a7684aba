use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::time::ONE_DAY_MS;

pub type SessionId = String;

/// What the store needs to know about a session payload.
///
/// The store persists the payload as opaque JSON and only ever looks at the
/// two cookie fields below to compute row expiry.
pub trait SessionPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// `cookie.maxAge` in milliseconds, if the payload carries one.
    fn cookie_max_age(&self) -> Option<i64>;

    /// `cookie.expires` as an absolute instant, if the payload carries one.
    fn cookie_expires(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// Absolute expiry (epoch ms) for a write happening at `now_ms`.
///
/// A missing or zero `max_age` falls back to one day.
pub fn expiry_for_write(max_age: Option<i64>, now_ms: i64) -> i64 {
    match max_age {
        Some(max_age) if max_age != 0 => now_ms.saturating_add(max_age),
        _ => now_ms.saturating_add(ONE_DAY_MS),
    }
}

/// Parse an ISO-8601 / RFC 3339 cookie expiry such as `2026-10-19T12:00:00.000Z`.
pub fn parse_cookie_expires(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidCookie(format!("'{raw}': {e}")))
}

/// Untyped session payload: a JSON object as produced by a session middleware.
///
/// Serialized transparently, so the stored `sess` column is exactly the
/// object the caller handed in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionData(Map<String, Value>);

impl SessionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    fn cookie(&self) -> Option<&Map<String, Value>> {
        self.0.get("cookie").and_then(Value::as_object)
    }
}

impl From<Map<String, Value>> for SessionData {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for SessionData {
    type Error = StoreError;

    /// Only JSON objects are valid sessions.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(serde_json::from_value(value)?)
    }
}

impl SessionPayload for SessionData {
    fn cookie_max_age(&self) -> Option<i64> {
        let max_age = self.cookie()?.get("maxAge")?;

        max_age.as_i64().or_else(|| {
            max_age
                .as_f64()
                .filter(|v| v.is_finite())
                .map(|v| v as i64)
        })
    }

    fn cookie_expires(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let Some(cookie) = self.cookie() else {
            return Ok(None);
        };

        match cookie.get("expires") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(raw)) => parse_cookie_expires(raw).map(Some),
            Some(other) => Err(StoreError::InvalidCookie(format!(
                "expires must be a timestamp string, got {other}"
            ))),
        }
    }
}
