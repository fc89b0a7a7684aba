use std::sync::Arc;
use std::time::Duration;

use common::logger::warn_if_slow;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::sqlite_store::Statements;
use crate::error::StoreError;
use crate::time::Clock;

/// Deletes rows whose expiry has passed.
///
/// Holds its own pool handle so the periodic task never keeps the store
/// itself alive.
#[derive(Clone)]
pub(crate) struct Sweeper {
    pool: SqlitePool,
    sql: Arc<Statements>,
    clock: Arc<dyn Clock>,
}

impl Sweeper {
    pub(crate) fn new(pool: SqlitePool, sql: Arc<Statements>, clock: Arc<dyn Clock>) -> Self {
        Self { pool, sql, clock }
    }

    /// One pass; returns the number of rows removed.
    pub(crate) async fn sweep(&self) -> Result<u64, StoreError> {
        let now = self.clock.now_ms();

        let done = warn_if_slow("db_sweep_expired", Duration::from_millis(500), async {
            sqlx::query(&self.sql.sweep)
                .bind(now)
                .execute(&self.pool)
                .await
        })
        .await?;

        Ok(done.rows_affected())
    }

    /// One pass with the outcome logged instead of returned.
    pub(crate) async fn sweep_logged(&self) {
        match self.sweep().await {
            Ok(0) => debug!(target: "session_store", "no expired sessions to sweep"),
            Ok(removed) => info!(target: "session_store", removed, "expired sessions swept"),
            Err(e) => error!(target: "session_store", error = %e, "session sweep failed"),
        }
    }

    /// Run a sweep every `period`, starting one period from now.
    pub(crate) fn spawn(self, period: Duration) -> SweepTask {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                self.sweep_logged().await;
            }
        });

        SweepTask(handle)
    }
}

/// Owned handle to the periodic sweep; aborts the task when dropped.
pub(crate) struct SweepTask(JoinHandle<()>);

impl SweepTask {
    pub(crate) fn abort(&self) {
        self.0.abort();
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        !self.0.is_finished()
    }
}

impl Drop for SweepTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}
