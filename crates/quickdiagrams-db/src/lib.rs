pub mod connection;
pub mod migrations;

pub use connection::{
    ConnectionProvider, SqliteConnectionProvider, StoreConnection, StoreTarget, StoreTransaction,
};
pub use migrations::{
    Migration, MigrationReport, MigrationRunner, MigrationStatus, registered_migrations,
};
