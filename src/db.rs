//! SQLite connection pool and schema migrations.
//!
//! The pool runs in WAL mode with a busy timeout so the scheduler, its
//! workers and front-end reads can share one database file. Migrations
//! under `migrations/` are embedded at compile time and applied on open.
//!
//! # Example
//!
//! ```no_run
//! use mediaflow_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("mediaflow.db")).await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// SQLite serializes writers, so a small pool is enough.
const FILE_POOL_SIZE: u32 = 5;

/// Connections wait this long for a lock before returning `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database open and migration failures.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("cannot open job database: {0}\n  Suggestion: check that the data directory exists and is writable")]
    Connection(#[from] sqlx::Error),

    #[error("cannot migrate job database: {0}\n  Suggestion: the file may belong to a newer mediaflow release")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Pooled handle to the job database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path` and runs
    /// pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the file cannot be opened and
    /// [`DbError::Migration`] if the schema cannot be brought up to date.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_POOL_SIZE)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    /// In-memory database on a single connection, so every query sees the
    /// same schema.
    ///
    /// # Errors
    ///
    /// Same as [`Database::new`].
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, DbError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("job database ready");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Active journal mode, lower-cased (`wal` for file databases).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the pragma query fails.
    pub async fn journal_mode(&self) -> Result<String, DbError> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.to_lowercase())
    }
}
