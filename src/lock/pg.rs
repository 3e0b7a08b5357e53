use super::{AdvisoryLease, AdvisoryLockStore};
use crate::error::LockStoreError;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, pool::PoolConnection, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::debug;

/// [`AdvisoryLockStore`] backed by PostgreSQL session advisory locks.
#[derive(Debug, Clone)]
pub struct PgAdvisoryLockStore {
    pool: PgPool,
}

impl PgAdvisoryLockStore {
    /// Creates a new lock store on an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a lock store for the database at `url`.
    ///
    /// Connections are opened on first use, so an unreachable database surfaces as a failed
    /// acquisition instead of a startup error.
    pub fn connect_lazy(url: &str) -> Result<Self, LockStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(2))
            .connect_lazy(url)?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl AdvisoryLockStore for PgAdvisoryLockStore {
    async fn acquire(&self, key: i64) -> Result<Box<dyn AdvisoryLease>, LockStoreError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)").bind(key).execute(&mut *conn).await?;
        debug!(key, "Acquired advisory lock");
        Ok(Box::new(PgLease { key, conn, released: false }))
    }
}

/// Session advisory locks belong to the connection, so the lease keeps it checked out.
#[derive(Debug)]
struct PgLease {
    key: i64,
    conn: PoolConnection<Postgres>,
    released: bool,
}

#[async_trait]
impl AdvisoryLease for PgLease {
    fn key(&self) -> i64 {
        self.key
    }

    async fn release(self: Box<Self>) -> Result<(), LockStoreError> {
        let mut lease = self;
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(lease.key)
            .execute(&mut *lease.conn)
            .await?;
        lease.released = true;
        Ok(())
    }
}

impl Drop for PgLease {
    fn drop(&mut self) {
        // closing the session is the only synchronous way to drop the lock
        if !self.released {
            self.conn.close_on_drop();
        }
    }
}
