use async_trait::async_trait;
use quickdiagrams_common::Result;
use tokio_util::sync::CancellationToken;

use super::Migration;
use crate::connection::StoreConnection;

const APPLICATION_USER_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS [ApplicationUser] (
        [Id] INTEGER NOT NULL PRIMARY KEY,
        [UserName] TEXT NOT NULL,
        [NormalizedUserName] TEXT NOT NULL,
        [Email] TEXT NULL,
        [NormalizedEmail] TEXT NULL,
        [EmailConfirmed] INTEGER NOT NULL,
        [PasswordHash] TEXT NULL,
        [PhoneNumber] TEXT NULL,
        [PhoneNumberConfirmed] INTEGER NOT NULL,
        [TwoFactorEnabled] INTEGER NOT NULL
    );
"#;

const APPLICATION_ROLE_TABLES: &str = r#"
    CREATE TABLE IF NOT EXISTS [ApplicationRole] (
        [Id] INTEGER NOT NULL PRIMARY KEY,
        [Name] TEXT NOT NULL,
        [NormalizedName] TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS [ApplicationUserRole] (
        [UserId] INTEGER NOT NULL,
        [RoleId] INTEGER NOT NULL
    );
"#;

/// Version 0: user accounts.
pub struct CreateUserTable;

#[async_trait]
impl Migration for CreateUserTable {
    fn version(&self) -> i64 {
        0
    }

    async fn apply(&self, conn: &StoreConnection, cancel: &CancellationToken) -> Result<()> {
        conn.execute_batch(APPLICATION_USER_TABLE, cancel).await
    }
}

/// Version 1: roles and user/role membership.
pub struct CreateRoleTables;

#[async_trait]
impl Migration for CreateRoleTables {
    fn version(&self) -> i64 {
        1
    }

    async fn apply(&self, conn: &StoreConnection, cancel: &CancellationToken) -> Result<()> {
        conn.execute_batch(APPLICATION_ROLE_TABLES, cancel).await
    }
}
