pub mod database;
pub mod error;
pub mod schema;
pub mod snapshots;

pub use database::Database;
pub use error::StoreError;
pub use snapshots::{JsonFileStore, SnapshotStore, SqliteSnapshotStore};
