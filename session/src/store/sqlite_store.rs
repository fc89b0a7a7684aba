//! SQLiteSessionStore
//! --------------------
//! SQLite-backed implementation of the `SessionStore` trait. It persists
//! session payloads for an HTTP session middleware so that:
//!
//!  - sessions survive restarts (file databases)
//!  - expired sessions are never handed back to callers
//!  - expired rows are physically removed by a background sweep
//!
//! Each row is `(sid, expired, sess)`: the session id, the absolute expiry in
//! epoch milliseconds and the JSON-encoded payload.
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::logger::warn_if_slow;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, instrument, warn};

use super::SessionStore;
use super::sweeper::{SweepTask, Sweeper};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::model::{SessionData, SessionId, SessionPayload, expiry_for_write};
use crate::time::{Clock, SystemClock};

/// Budget for a single foreground statement before it is logged as slow.
const SLOW_QUERY: Duration = Duration::from_millis(100);

/// SQL for one table, rendered once at open time.
pub(crate) struct Statements {
    create_table: String,
    create_index: String,
    get: String,
    upsert: String,
    destroy: String,
    count: String,
    clear: String,
    touch: String,
    all: String,
    pub(crate) sweep: String,
}

impl Statements {
    /// `table` must already be validated as a plain identifier.
    fn new(table: &str) -> Self {
        let t = format!("\"{table}\"");

        Self {
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS {t} (sid PRIMARY KEY, expired INTEGER, sess)"
            ),
            create_index: format!("CREATE INDEX IF NOT EXISTS expired ON {t} (expired)"),
            get: format!("SELECT sess FROM {t} WHERE sid = ? AND ? <= expired"),
            upsert: format!(
                "INSERT INTO {t} (sid, expired, sess) VALUES (?, ?, ?) \
                 ON CONFLICT(sid) DO UPDATE SET expired = excluded.expired, sess = excluded.sess"
            ),
            destroy: format!("DELETE FROM {t} WHERE sid = ?"),
            count: format!("SELECT COUNT(*) FROM {t}"),
            clear: format!("DELETE FROM {t}"),
            touch: format!("UPDATE {t} SET expired = ? WHERE sid = ? AND ? <= expired"),
            all: format!("SELECT sid, sess FROM {t} WHERE ? <= expired"),
            sweep: format!("DELETE FROM {t} WHERE expired <= ?"),
        }
    }
}

/// Configures and opens a [`SQLiteSessionStore`].
pub struct SessionStoreBuilder<S = SessionData> {
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    on_connect: Option<Box<dyn FnOnce() + Send>>,
    _payload: PhantomData<fn() -> S>,
}

impl<S: SessionPayload> SessionStoreBuilder<S> {
    /// Replace the wall clock used for every expiry decision.
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Called exactly once, after the schema is in place and before the first sweep.
    pub fn on_connect(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_connect = Some(Box::new(f));
        self
    }

    /// Open the database, create the schema, sweep once and start the
    /// periodic sweep.
    ///
    /// Any failure up to and including schema creation is returned as
    /// [`StoreError::Init`]; the store is unusable without its table.
    pub async fn open(self) -> Result<SQLiteSessionStore<S>, StoreError> {
        let SessionStoreBuilder {
            config,
            clock,
            on_connect,
            ..
        } = self;

        config.validate()?;
        let options = config.connect_options()?;

        // One connection, never recycled: an in-memory database lives exactly
        // as long as this pool does.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StoreError::Init)?;

        let sql = Arc::new(Statements::new(&config.table));
        init_schema(&pool, &sql).await.map_err(StoreError::Init)?;

        info!(
            target: "session_store",
            table = %config.table,
            target_db = ?config.target(),
            wal = config.wal,
            mode = %config.mode,
            "session store connected"
        );

        if let Some(notify) = on_connect {
            notify();
        }

        let sweeper = Sweeper::new(pool.clone(), sql.clone(), clock.clone());
        sweeper.sweep_logged().await;
        let sweep_task = sweeper.clone().spawn(config.sweep_interval());

        Ok(SQLiteSessionStore {
            pool,
            table: config.table,
            sql,
            clock,
            sweeper,
            sweep_task,
            _payload: PhantomData,
        })
    }
}

/// Table and index are created together or not at all.
async fn init_schema(pool: &SqlitePool, sql: &Statements) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(&sql.create_table).execute(&mut *tx).await?;
    sqlx::query(&sql.create_index).execute(&mut *tx).await?;

    tx.commit().await
}

/// SQLite-based persistence backend for sessions.
///
/// Generic over the payload type; [`SessionData`] (an untyped JSON object)
/// is the default. Dropping the store stops its background sweep.
pub struct SQLiteSessionStore<S = SessionData> {
    pool: SqlitePool,
    table: String,
    sql: Arc<Statements>,
    clock: Arc<dyn Clock>,
    sweeper: Sweeper,
    sweep_task: SweepTask,
    _payload: PhantomData<fn() -> S>,
}

impl<S: SessionPayload> SQLiteSessionStore<S> {
    pub fn builder(config: StoreConfig) -> SessionStoreBuilder<S> {
        SessionStoreBuilder {
            config,
            clock: Arc::new(SystemClock),
            on_connect: None,
            _payload: PhantomData,
        }
    }

    /// Open with the system clock and no readiness callback.
    pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
        Self::builder(config).open().await
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// The underlying pool, for inspection and maintenance.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Delete every row whose expiry is at or before now. Returns the number
    /// of rows removed.
    #[instrument(skip(self), target = "session_store")]
    pub async fn sweep_expired(&self) -> Result<u64, StoreError> {
        self.sweeper.sweep().await
    }

    /// Stop the background sweep and close the connection.
    pub async fn close(self) {
        self.sweep_task.abort();
        self.pool.close().await;
        debug!(target: "session_store", table = %self.table, "session store closed");
    }
}

#[async_trait]
impl<S: SessionPayload> SessionStore for SQLiteSessionStore<S> {
    type Session = S;

    #[instrument(skip(self), target = "session_store", fields(sid = %sid))]
    async fn get(&self, sid: &str) -> Result<Option<S>, StoreError> {
        let now = self.clock.now_ms();

        let row = warn_if_slow("db_get", SLOW_QUERY, async {
            sqlx::query(&self.sql.get)
                .bind(sid)
                .bind(now)
                .fetch_optional(&self.pool)
                .await
        })
        .await?;

        let Some(row) = row else {
            debug!("no live session");
            return Ok(None);
        };

        let raw: String = row.try_get("sess")?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Upsert the session. The payload is encoded before the database is
    /// touched, so an unencodable payload leaves the stored row as it was.
    #[instrument(skip(self, session), target = "session_store", fields(sid = %sid))]
    async fn set(&self, sid: &str, session: &S) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let expired = expiry_for_write(session.cookie_max_age(), now);
        let payload = serde_json::to_string(session)?;

        warn_if_slow("db_upsert", SLOW_QUERY, async {
            sqlx::query(&self.sql.upsert)
                .bind(sid)
                .bind(expired)
                .bind(payload)
                .execute(&self.pool)
                .await
        })
        .await?;

        debug!(expired, "session stored");
        Ok(())
    }

    #[instrument(skip(self), target = "session_store", fields(sid = %sid))]
    async fn destroy(&self, sid: &str) -> Result<(), StoreError> {
        let done = warn_if_slow("db_destroy", SLOW_QUERY, async {
            sqlx::query(&self.sql.destroy)
                .bind(sid)
                .execute(&self.pool)
                .await
        })
        .await?;

        debug!(removed = done.rows_affected(), "session destroyed");
        Ok(())
    }

    /// Only rows that are still live get the new expiry; an expired session
    /// is never brought back.
    #[instrument(skip(self, session), target = "session_store", fields(sid = %sid))]
    async fn touch(&self, sid: &str, session: &S) -> Result<(), StoreError> {
        let Some(expires) = session.cookie_expires()? else {
            debug!("cookie has no expiry; nothing to touch");
            return Ok(());
        };

        let now = self.clock.now_ms();

        let done = warn_if_slow("db_touch", SLOW_QUERY, async {
            sqlx::query(&self.sql.touch)
                .bind(expires.timestamp_millis())
                .bind(sid)
                .bind(now)
                .execute(&self.pool)
                .await
        })
        .await?;

        debug!(updated = done.rows_affected(), "session touched");
        Ok(())
    }

    /// Physical row count. Expired rows that have not been swept yet are
    /// included.
    #[instrument(skip(self), target = "session_store")]
    async fn length(&self) -> Result<u64, StoreError> {
        let count: i64 = warn_if_slow("db_count", SLOW_QUERY, async {
            sqlx::query_scalar::<_, i64>(&self.sql.count)
                .fetch_one(&self.pool)
                .await
        })
        .await?;

        Ok(count as u64)
    }

    #[instrument(skip(self), target = "session_store")]
    async fn clear(&self) -> Result<(), StoreError> {
        let done = warn_if_slow("db_clear", SLOW_QUERY, async {
            sqlx::query(&self.sql.clear).execute(&self.pool).await
        })
        .await?;

        info!(removed = done.rows_affected(), "all sessions cleared");
        Ok(())
    }

    #[instrument(skip(self), target = "session_store")]
    async fn all(&self) -> Result<Vec<(SessionId, S)>, StoreError> {
        let now = self.clock.now_ms();

        let rows = warn_if_slow("db_all", SLOW_QUERY, async {
            sqlx::query(&self.sql.all)
                .bind(now)
                .fetch_all(&self.pool)
                .await
        })
        .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let sid: String = row.try_get("sid")?;
            let raw: String = row.try_get("sess")?;

            match serde_json::from_str(&raw) {
                Ok(session) => sessions.push((sid, session)),
                Err(e) => {
                    // one corrupt payload must not hide every other session
                    warn!(sid = %sid, error = %e, "skipping malformed session row");
                }
            }
        }

        Ok(sessions)
    }
}
