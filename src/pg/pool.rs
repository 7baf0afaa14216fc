//! Bounded connection pool.
//!
//! # Responsibilities
//! - Cap concurrent connections per target
//! - Hand out one connection per round trip and take it back afterwards
//! - Drop connections that failed, timed out, or were closed by the server
//! - Close connections left idle longer than the idle timeout
//!
//! # Design Decisions
//! - A semaphore permit is held for the lifetime of each [`Pooled`] guard
//! - Connections are created lazily, under a connect deadline
//! - Return to the pool happens in `Drop`, so early returns cannot leak
//! - A guard marked with [`Pooled::discard`] stays discarded until [`Pooled::keep`],
//!   so a future dropped mid-transaction never hands its session back

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_postgres::{CancelToken, Client, NoTls};

use crate::pg::{ConnectionConfig, DbError};
use crate::resilience::with_deadline;

/// Limits shared by every pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: usize,
    pub connect_timeout: Duration,
    pub acquire_timeout: Duration,
    pub query_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 8,
            connect_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Anything the pool can hold.
pub trait Connection: Send + Sync + 'static {
    fn is_closed(&self) -> bool;
}

/// An open PostgreSQL session.
pub struct PgConn {
    client: Client,
    cancel_token: CancelToken,
}

impl PgConn {
    pub async fn connect(config: &ConnectionConfig, timeout: Duration) -> Result<Self, DbError> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .user(&config.user)
            .dbname(&config.database)
            .application_name("sysadmin")
            .connect_timeout(timeout);
        if let Some(password) = &config.password {
            pg_config.password(password);
        }

        let connect = async {
            pg_config
                .connect(NoTls)
                .await
                .map_err(|source| DbError::Connect {
                    target: config.to_string(),
                    source,
                })
        };
        let (client, connection) = with_deadline("connect", timeout, connect).await?;

        let target = config.to_string();
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::warn!(target = %target, error = %error, "Postgres connection closed with error");
            }
        });

        tracing::debug!(target = %config, "Postgres connection established");
        let cancel_token = client.cancel_token();
        Ok(Self {
            client,
            cancel_token,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Ask the server to abandon whatever this session is running.
    pub fn cancel(&self) {
        let token = self.cancel_token.clone();
        tokio::spawn(async move {
            if let Err(error) = token.cancel_query(NoTls).await {
                tracing::debug!(error = %error, "Cancel request failed");
            }
        });
    }
}

impl Connection for PgConn {
    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

/// Connections to one target.
pub struct Pool<C> {
    idle: Mutex<Vec<Idle<C>>>,
    permits: Arc<Semaphore>,
    max_connections: usize,
    acquire_timeout: Duration,
    idle_timeout: Duration,
}

struct Idle<C> {
    conn: Arc<C>,
    since: Instant,
}

impl<C: Connection> Pool<C> {
    pub fn new(max_connections: usize, acquire_timeout: Duration, idle_timeout: Duration) -> Arc<Self> {
        let max_connections = max_connections.max(1);
        Arc::new(Self {
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            acquire_timeout,
            idle_timeout,
        })
    }

    /// Reuse an idle connection or open one with `connect`.
    pub async fn acquire<F, Fut>(self: &Arc<Self>, connect: F) -> Result<Pooled<C>, DbError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, DbError>>,
    {
        let permits = Arc::clone(&self.permits);
        let permit = with_deadline("acquire connection", self.acquire_timeout, async move {
            permits.acquire_owned().await.map_err(|_| DbError::PoolClosed)
        })
        .await?;

        let conn = match self.pop_idle() {
            Some(conn) => conn,
            None => Arc::new(connect().await?),
        };

        Ok(Pooled {
            pool: Arc::clone(self),
            conn,
            discard: false,
            _permit: permit,
        })
    }

    fn pop_idle(&self) -> Option<Arc<C>> {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(entry) = idle.pop() {
            if !entry.conn.is_closed() && entry.since.elapsed() < self.idle_timeout {
                return Some(entry.conn);
            }
        }
        None
    }

    /// Close idle connections past the idle timeout. Returns how many went.
    pub fn evict_idle(&self) -> usize {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        let before = idle.len();
        idle.retain(|entry| !entry.conn.is_closed() && entry.since.elapsed() < self.idle_timeout);
        before - idle.len()
    }

    /// No idle connections and none checked out.
    pub fn is_unused(&self) -> bool {
        self.idle_count() == 0 && self.available() == self.max_connections
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Permits not currently held by a guard.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// A checked-out connection. Returns to its pool on drop unless discarded.
pub struct Pooled<C: Connection> {
    pool: Arc<Pool<C>>,
    conn: Arc<C>,
    discard: bool,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connection> Pooled<C> {
    pub fn get(&self) -> &C {
        &self.conn
    }

    /// Never hand this connection out again, unless [`Pooled::keep`] follows.
    pub fn discard(&mut self) {
        self.discard = true;
    }

    /// Undo [`Pooled::discard`] once the session is clean again.
    pub fn keep(&mut self) {
        self.discard = false;
    }
}

impl<C: Connection> Drop for Pooled<C> {
    fn drop(&mut self) {
        if self.discard || self.conn.is_closed() {
            return;
        }
        self.pool
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Idle {
                conn: Arc::clone(&self.conn),
                since: Instant::now(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const IDLE: Duration = Duration::from_secs(60);

    struct FakeConn {
        id: usize,
        closed: AtomicBool,
    }

    impl Connection for FakeConn {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    fn factory(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<Result<FakeConn, DbError>> {
        let counter = Arc::clone(counter);
        move || {
            let id = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(FakeConn {
                id,
                closed: AtomicBool::new(false),
            }))
        }
    }

    #[tokio::test]
    async fn test_connections_are_reused() {
        let pool = Pool::new(2, Duration::from_millis(50), IDLE);
        let created = Arc::new(AtomicUsize::new(0));

        let first = pool.acquire(factory(&created)).await.unwrap();
        assert_eq!(pool.available(), 1);
        drop(first);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.available(), 2);

        let again = pool.acquire(factory(&created)).await.unwrap();
        assert_eq!(again.get().id, 0);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_discarded_connections_are_not_reused() {
        let pool = Pool::new(1, Duration::from_millis(50), IDLE);
        let created = Arc::new(AtomicUsize::new(0));

        let mut conn = pool.acquire(factory(&created)).await.unwrap();
        conn.discard();
        drop(conn);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.available(), 1);

        let next = pool.acquire(factory(&created)).await.unwrap();
        assert_eq!(next.get().id, 1);
    }

    #[tokio::test]
    async fn test_closed_connections_are_skipped() {
        let pool = Pool::new(1, Duration::from_millis(50), IDLE);
        let created = Arc::new(AtomicUsize::new(0));

        let conn = pool.acquire(factory(&created)).await.unwrap();
        let shared = Arc::clone(&conn.conn);
        drop(conn);
        shared.closed.store(true, Ordering::SeqCst);

        let next = pool.acquire(factory(&created)).await.unwrap();
        assert_eq!(next.get().id, 1);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let pool = Pool::new(1, Duration::from_millis(20), IDLE);
        let created = Arc::new(AtomicUsize::new(0));

        let _held = pool.acquire(factory(&created)).await.unwrap();
        let result = pool.acquire(factory(&created)).await;
        assert!(matches!(result, Err(DbError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_failed_connect_releases_permit() {
        let pool: Arc<Pool<FakeConn>> = Pool::new(1, Duration::from_millis(20), IDLE);
        let result = pool
            .acquire(|| std::future::ready(Err(DbError::PoolClosed)))
            .await;
        assert!(result.is_err());
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_keep_after_discard_returns_connection() {
        let pool = Pool::new(1, Duration::from_millis(50), IDLE);
        let created = Arc::new(AtomicUsize::new(0));

        let mut conn = pool.acquire(factory(&created)).await.unwrap();
        conn.discard();
        conn.keep();
        drop(conn);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_connection_dropped_mid_transaction_is_not_reused() {
        let pool = Pool::new(1, Duration::from_millis(50), IDLE);
        let created = Arc::new(AtomicUsize::new(0));

        let shared = Arc::clone(&pool);
        let counter = Arc::clone(&created);
        let transaction = async move {
            let mut conn = shared.acquire(factory(&counter)).await?;
            // between BEGIN and COMMIT
            conn.discard();
            std::future::pending::<()>().await;
            conn.keep();
            Ok::<_, DbError>(())
        };
        let outcome = tokio::time::timeout(Duration::from_millis(10), transaction).await;
        assert!(outcome.is_err());

        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.available(), 1);
        let next = pool.acquire(factory(&created)).await.unwrap();
        assert_eq!(next.get().id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connections_expire() {
        let pool = Pool::new(2, Duration::from_millis(50), IDLE);
        let created = Arc::new(AtomicUsize::new(0));

        drop(pool.acquire(factory(&created)).await.unwrap());
        assert_eq!(pool.evict_idle(), 0);
        assert!(!pool.is_unused());

        tokio::time::advance(IDLE + Duration::from_secs(1)).await;
        assert_eq!(pool.evict_idle(), 1);
        assert!(pool.is_unused());

        let next = pool.acquire(factory(&created)).await.unwrap();
        assert_eq!(next.get().id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_idle_connection_is_skipped_on_acquire() {
        let pool = Pool::new(1, Duration::from_millis(50), IDLE);
        let created = Arc::new(AtomicUsize::new(0));

        drop(pool.acquire(factory(&created)).await.unwrap());
        tokio::time::advance(IDLE).await;
        let next = pool.acquire(factory(&created)).await.unwrap();
        assert_eq!(next.get().id, 1);
    }
}
