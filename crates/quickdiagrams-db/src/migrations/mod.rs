//! Versioned schema migrations.
//!
//! A [`Migration`] is one numbered schema change. The [`MigrationRunner`]
//! compares the registered set against the versions recorded in the store's
//! `Migrations` table and applies the missing ones in ascending order, each in
//! its own transaction.

mod identity;
mod runner;

use async_trait::async_trait;
use quickdiagrams_common::Result;
use tokio_util::sync::CancellationToken;

use crate::connection::StoreConnection;

pub use identity::{CreateRoleTables, CreateUserTable};
pub use runner::{MigrationReport, MigrationRunner, MigrationStatus, TRACKING_TABLE};

/// A single versioned schema change.
///
/// `apply` runs inside a transaction owned by the runner and must not commit
/// or roll it back. Prefer `CREATE ... IF NOT EXISTS` and other additive
/// statements.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Unique across the registered set. Gaps are allowed.
    fn version(&self) -> i64;

    /// Short type name used in logs. Generic step types should override
    /// this, since the last path segment of `Step<a::B>` is `B>`.
    fn name(&self) -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    async fn apply(&self, conn: &StoreConnection, cancel: &CancellationToken) -> Result<()>;
}

/// Every migration the application ships, in no particular order.
pub fn registered_migrations() -> Vec<Box<dyn Migration>> {
    vec![Box::new(CreateUserTable), Box::new(CreateRoleTables)]
}
