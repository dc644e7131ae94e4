// Sluice Infrastructure - SQLite Adapter
// Implements: Saver (DbSaver), DbLoader (SqliteDbLoader), RunHistoryRepository,
// the temporary database facility

mod connection;
mod db_loader;
mod db_saver;
mod error;
mod migration;
mod run_history;

pub use connection::{create_pool, SqliteDatabase};
pub use db_loader::SqliteDbLoader;
pub use db_saver::{DbSaver, BATCH_SIZE};
pub use error::map_sqlx_error;
pub use migration::run_migrations;
pub use run_history::SqliteRunHistory;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)

/// Setup/cleanup scripts run through `DbSaver`, mocked like any other save
pub type TemporaryDb = sluice_core::facilities::TemporaryDb<DbSaver>;

/// Swap `DbSaver` and `SqliteDbLoader` for their no-ops in test-mode jobs
pub fn register_auto_mocks() {
    sluice_core::auto_mock_for_local_testing::<DbSaver>();
    sluice_core::auto_mock_for_local_testing::<SqliteDbLoader>();
}
