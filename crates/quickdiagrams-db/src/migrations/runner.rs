use std::collections::{BTreeMap, BTreeSet};

use quickdiagrams_common::{Error, Result};
use rusqlite::params;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Migration;
use crate::connection::{ConnectionProvider, StoreConnection};

/// Table holding one row per committed migration version.
pub const TRACKING_TABLE: &str = "Migrations";

const CREATE_TRACKING_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS [Migrations] (
        [Version] INTEGER NOT NULL
    );
"#;
const SELECT_APPLIED: &str = "SELECT [Version] FROM [Migrations]";
const SELECT_IS_RECORDED: &str =
    "SELECT EXISTS(SELECT 1 FROM [Migrations] WHERE [Version] = ?1)";
const INSERT_RECORD: &str = "INSERT INTO [Migrations]([Version]) VALUES (?1)";
const SELECT_TRACKING_TABLE_EXISTS: &str =
    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'Migrations')";

/// Outcome of a successful [`MigrationRunner::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Versions applied by this run, ascending.
    pub applied: Vec<i64>,
    /// Registered versions that were already recorded in the store.
    pub skipped: usize,
}

/// Applied and pending versions as seen by [`MigrationRunner::status`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Registered versions recorded in the store.
    pub applied: Vec<i64>,
    /// Registered versions not yet recorded.
    pub pending: Vec<i64>,
    /// Versions recorded in the store that no registered migration claims.
    pub unknown: Vec<i64>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Brings a store's schema up to the latest registered version.
pub struct MigrationRunner<P> {
    provider: P,
}

impl<P: ConnectionProvider> MigrationRunner<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Apply every registered migration not yet recorded in the store.
    ///
    /// Versions are applied in ascending order, one transaction each. The
    /// first failure rolls back its own transaction and is returned as-is;
    /// later versions are not attempted.
    pub async fn run(
        &self,
        migrations: &[Box<dyn Migration>],
        cancel: &CancellationToken,
    ) -> Result<MigrationReport> {
        if migrations.is_empty() {
            debug!("no migrations registered");
            return Ok(MigrationReport::default());
        }
        let registered = index_by_version(migrations)?;

        let conn = self.provider.create()?;
        conn.open(cancel).await?;

        let report = apply_pending(&conn, &registered, cancel).await?;
        conn.close()?;
        Ok(report)
    }

    /// Report applied and pending versions without changing the store.
    pub async fn status(
        &self,
        migrations: &[Box<dyn Migration>],
        cancel: &CancellationToken,
    ) -> Result<MigrationStatus> {
        let registered = index_by_version(migrations)?;

        let conn = self.provider.create()?;
        conn.open(cancel).await?;

        let table_exists: bool = conn
            .with_connection("failed to inspect schema", cancel, |c| {
                c.query_row(SELECT_TRACKING_TABLE_EXISTS, [], |row| row.get(0))
            })
            .await?;
        let recorded = if table_exists {
            read_applied(&conn, cancel).await?
        } else {
            BTreeSet::new()
        };
        conn.close()?;

        let (applied, pending): (Vec<i64>, Vec<i64>) = registered
            .keys()
            .copied()
            .partition(|version| recorded.contains(version));
        let unknown: Vec<i64> = recorded
            .iter()
            .copied()
            .filter(|version| !registered.contains_key(version))
            .collect();

        Ok(MigrationStatus {
            applied,
            pending,
            unknown,
        })
    }
}

fn index_by_version(migrations: &[Box<dyn Migration>]) -> Result<BTreeMap<i64, &dyn Migration>> {
    let mut registered: BTreeMap<i64, &dyn Migration> = BTreeMap::new();
    for migration in migrations {
        let version = migration.version();
        if let Some(existing) = registered.insert(version, migration.as_ref()) {
            return Err(Error::Migration(format!(
                "duplicate migration version {version}: {} and {}",
                existing.name(),
                migration.name()
            )));
        }
    }
    Ok(registered)
}

async fn apply_pending(
    conn: &StoreConnection,
    registered: &BTreeMap<i64, &dyn Migration>,
    cancel: &CancellationToken,
) -> Result<MigrationReport> {
    conn.with_connection("failed to create tracking table", cancel, |c| {
        c.execute_batch(CREATE_TRACKING_TABLE)
    })
    .await?;

    let recorded = read_applied(conn, cancel).await?;
    debug!("{} migration(s) recorded in store", recorded.len());

    // BTreeMap keys are ascending, so the deficit is already in apply order.
    let deficit: Vec<i64> = registered
        .keys()
        .copied()
        .filter(|version| !recorded.contains(version))
        .collect();

    let mut report = MigrationReport {
        applied: Vec::with_capacity(deficit.len()),
        skipped: registered.len() - deficit.len(),
    };
    if deficit.is_empty() {
        info!("schema is up to date ({} migration(s) applied)", registered.len());
        return Ok(report);
    }
    info!("applying {} pending migration(s): {:?}", deficit.len(), deficit);

    for version in deficit {
        let migration = registered.get(&version).copied().ok_or_else(|| {
            Error::Migration(format!("no registered migration for pending version {version}"))
        })?;

        if apply_one(conn, migration, cancel).await? {
            report.applied.push(version);
        } else {
            report.skipped += 1;
        }
    }

    Ok(report)
}

/// Apply one migration in its own transaction. Returns `false` when the
/// version turned out to be recorded already.
async fn apply_one(
    conn: &StoreConnection,
    migration: &dyn Migration,
    cancel: &CancellationToken,
) -> Result<bool> {
    let version = migration.version();
    let name = migration.name();
    let tx = conn.begin(cancel).await?;

    // The write lock is held from here on; another runner may have
    // committed this version since the applied set was read.
    if is_recorded(conn, version, cancel).await? {
        info!("migration {version} ({name}) already recorded, skipping");
        tx.rollback().await?;
        return Ok(false);
    }

    debug!("applying migration {version} ({name})");
    match apply_and_record(conn, migration, cancel).await {
        Ok(()) => {
            tx.commit(cancel).await?;
            info!("applied migration {version} ({name})");
            Ok(true)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("failed to roll back migration {version} ({name}): {rollback_err}");
            }
            warn!("migration {version} ({name}) failed: {e}");
            Err(e)
        }
    }
}

async fn apply_and_record(
    conn: &StoreConnection,
    migration: &dyn Migration,
    cancel: &CancellationToken,
) -> Result<()> {
    let version = migration.version();
    migration.apply(conn, cancel).await?;

    if !conn.in_transaction()? {
        return Err(Error::Migration(format!(
            "migration {version} ({}) ended the enclosing transaction",
            migration.name()
        )));
    }

    conn.with_connection("failed to record migration", cancel, |c| {
        c.execute(INSERT_RECORD, params![version])
    })
    .await?;
    Ok(())
}

async fn read_applied(conn: &StoreConnection, cancel: &CancellationToken) -> Result<BTreeSet<i64>> {
    conn.with_connection("failed to read applied migrations", cancel, |c| {
        let mut stmt = c.prepare(SELECT_APPLIED)?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        rows.collect()
    })
    .await
}

async fn is_recorded(conn: &StoreConnection, version: i64, cancel: &CancellationToken) -> Result<bool> {
    conn.with_connection("failed to check migration record", cancel, |c| {
        c.query_row(SELECT_IS_RECORDED, params![version], |row| row.get(0))
    })
    .await
}
