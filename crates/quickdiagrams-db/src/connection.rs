use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use quickdiagrams_common::{Error, Result};
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a connection handle points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    File(PathBuf),
    /// A private in-memory store. Every handle sees its own empty database.
    Memory,
}

/// Factory for connection handles. Handles are returned closed; the caller
/// opens them and owns them until dropped.
pub trait ConnectionProvider: Send + Sync {
    fn create(&self) -> Result<StoreConnection>;
}

/// Provider for SQLite stores.
#[derive(Debug, Clone)]
pub struct SqliteConnectionProvider {
    target: StoreTarget,
    busy_timeout: Duration,
}

impl SqliteConnectionProvider {
    pub fn new(target: StoreTarget, busy_timeout: Duration) -> Self {
        Self {
            target,
            busy_timeout,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(StoreTarget::File(path.into()), DEFAULT_BUSY_TIMEOUT)
    }

    pub fn in_memory() -> Self {
        Self::new(StoreTarget::Memory, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn target(&self) -> &StoreTarget {
        &self.target
    }
}

impl ConnectionProvider for SqliteConnectionProvider {
    fn create(&self) -> Result<StoreConnection> {
        Ok(StoreConnection::new(self.target.clone(), self.busy_timeout))
    }
}

/// One logical connection to the store.
///
/// Every operation takes a cancellation token, checked before the statement
/// runs and again once it returns. The underlying SQLite connection is closed
/// by [`StoreConnection::close`] or when the handle is dropped.
pub struct StoreConnection {
    target: StoreTarget,
    busy_timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl StoreConnection {
    pub fn new(target: StoreTarget, busy_timeout: Duration) -> Self {
        Self {
            target,
            busy_timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &StoreTarget {
        &self.target
    }

    pub fn is_open(&self) -> bool {
        self.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Open the connection. A no-op when it is already open.
    pub async fn open(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_live(cancel)?;
        {
            let mut guard = self.lock()?;
            if guard.is_some() {
                return Ok(());
            }

            let conn = match &self.target {
                StoreTarget::File(path) => {
                    debug!("opening store at {}", path.display());
                    Connection::open(path)
                }
                StoreTarget::Memory => {
                    debug!("opening in-memory store");
                    Connection::open_in_memory()
                }
            }
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

            conn.busy_timeout(self.busy_timeout)
                .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
            conn.execute_batch("PRAGMA foreign_keys=ON;")
                .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

            *guard = Some(conn);
        }
        ensure_live(cancel)
    }

    /// Run `f` against the open connection. Errors from `f` become
    /// `Error::Database` prefixed with `context`.
    pub async fn with_connection<T, F>(
        &self,
        context: &str,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        ensure_live(cancel)?;
        let value = {
            let guard = self.lock()?;
            let conn = open_connection(&guard, context)?;
            f(conn).map_err(|e| Error::Database(format!("{context}: {e}")))?
        };
        ensure_live(cancel)?;
        Ok(value)
    }

    /// Execute one or more semicolon-separated statements without parameters.
    pub async fn execute_batch(&self, sql: &str, cancel: &CancellationToken) -> Result<()> {
        self.with_connection("statement failed", cancel, |conn| conn.execute_batch(sql))
            .await
    }

    /// Start a write transaction. The returned guard rolls back on drop
    /// unless committed.
    pub async fn begin(&self, cancel: &CancellationToken) -> Result<StoreTransaction<'_>> {
        self.with_connection("failed to begin transaction", cancel, |conn| {
            conn.execute_batch("BEGIN IMMEDIATE")
        })
        .await?;
        Ok(StoreTransaction {
            conn: self,
            finished: false,
        })
    }

    /// Whether an explicit transaction is currently open.
    pub fn in_transaction(&self) -> Result<bool> {
        let guard = self.lock()?;
        let conn = open_connection(&guard, "failed to inspect transaction state")?;
        Ok(!conn.is_autocommit())
    }

    /// Close the connection, reporting any error SQLite raises while doing so.
    pub fn close(&self) -> Result<()> {
        let conn = self.lock()?.take();
        if let Some(conn) = conn {
            conn.close()
                .map_err(|(_, e)| Error::Database(format!("failed to close database: {e}")))?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("connection lock poisoned".into()))
    }

    fn raw_batch(&self, sql: &str, context: &str) -> Result<()> {
        let guard = self.lock()?;
        let conn = open_connection(&guard, context)?;
        conn.execute_batch(sql)
            .map_err(|e| Error::Database(format!("{context}: {e}")))
    }

    /// Roll back if a transaction is open. SQLite may already have rolled
    /// back on its own after some errors; that is not a failure.
    fn rollback_if_active(&self) -> Result<()> {
        if !self.in_transaction()? {
            return Ok(());
        }
        self.raw_batch("ROLLBACK", "failed to roll back transaction")
    }
}

/// Scoped write transaction on a [`StoreConnection`].
///
/// Steps run against [`StoreTransaction::connection`]; only the owner of the
/// guard commits or rolls back.
pub struct StoreTransaction<'c> {
    conn: &'c StoreConnection,
    finished: bool,
}

impl<'c> StoreTransaction<'c> {
    pub fn connection(&self) -> &'c StoreConnection {
        self.conn
    }

    /// Commit. If the token has already fired nothing is committed and the
    /// transaction is rolled back when the guard drops.
    pub async fn commit(mut self, cancel: &CancellationToken) -> Result<()> {
        ensure_live(cancel)?;
        self.conn
            .raw_batch("COMMIT", "failed to commit transaction")?;
        self.finished = true;
        Ok(())
    }

    /// Roll back. Runs even when cancellation has been requested.
    pub async fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn.rollback_if_active()
    }
}

impl Drop for StoreTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished
            && let Err(e) = self.conn.rollback_if_active()
        {
            warn!("failed to roll back abandoned transaction: {e}");
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

fn open_connection<'g>(
    guard: &'g MutexGuard<'_, Option<Connection>>,
    context: &str,
) -> Result<&'g Connection> {
    guard
        .as_ref()
        .ok_or_else(|| Error::Database(format!("{context}: connection is not open")))
}
