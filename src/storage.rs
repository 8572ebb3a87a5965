//! Storage layer for registered chat users
//!
//! Provides a persistent user roster backed by a local SQLite file.

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// The database file could not be opened or created
    #[error("Failed to open database at {path}: {source}")]
    Open {
        /// Path that was being opened
        path: String,
        /// Underlying SQLite error
        #[source]
        source: rusqlite::Error,
    },
    /// No user with the requested identity exists
    #[error("User {0} not found")]
    NotFound(i64),
    /// A user with this identity already exists
    #[error("User {0} already exists")]
    Duplicate(i64),
    /// Any other SQLite failure
    #[error("Query failed: {0}")]
    Query(#[from] rusqlite::Error),
    /// The connection mutex was poisoned by a panicking holder
    #[error("Database connection lock poisoned")]
    Poisoned,
    /// The store was closed
    #[error("Database connection is closed")]
    Closed,
    /// The blocking worker running the statement failed
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A registered chat user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRecord {
    /// Platform user id, primary key
    pub identity: i64,
    /// Chat id messages to this user are delivered to
    pub address: i64,
}

/// Interface for user roster storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create the users table if it does not exist yet
    async fn ensure_schema(&self) -> Result<(), StorageError>;
    /// Point lookup by identity, `StorageError::NotFound` when absent
    async fn get_user(&self, identity: i64) -> Result<UserRecord, StorageError>;
    /// Insert a new user, `StorageError::Duplicate` when the identity exists
    async fn insert_user(&self, identity: i64, address: i64) -> Result<(), StorageError>;
    /// All registered users, in no particular order
    async fn list_users(&self) -> Result<Vec<UserRecord>, StorageError>;
    /// Number of registered users
    async fn count_users(&self) -> Result<u64, StorageError>;
    /// Release the underlying connection
    async fn close(&self) -> Result<(), StorageError>;
}

const CREATE_USERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    chatId INTEGER
)";

/// SQLite-backed user store.
///
/// A single connection is shared by the listener and the HTTP handlers.
/// Statements run on the blocking pool one at a time; there is no
/// transaction scope wider than a single statement.
#[derive(Clone)]
pub struct SqliteUserStore {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteUserStore {
    /// Open or create the database file at `path`.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Open` if SQLite cannot open the file, or an
    /// I/O error if the parent directory cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(|source| StorageError::Open {
            path: path.display().to_string(),
            source,
        })?;
        info!("Database opened at {}", path.display());

        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Open` if SQLite fails to allocate the database.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(|source| StorageError::Open {
            path: ":memory:".to_string(),
            source,
        })?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    async fn with_conn<T, F>(&self, job: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StorageError::Poisoned)?;
            let conn = guard.as_ref().ok_or(StorageError::Closed)?;
            job(conn)
        })
        .await?
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(CREATE_USERS_TABLE, [])?;
            Ok(())
        })
        .await?;
        info!("Table users is ready");
        Ok(())
    }

    async fn get_user(&self, identity: i64) -> Result<UserRecord, StorageError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, chatId FROM users WHERE id = ?1",
                params![identity],
                |row| {
                    Ok(UserRecord {
                        identity: row.get(0)?,
                        address: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or(StorageError::NotFound(identity))
        })
        .await
    }

    async fn insert_user(&self, identity: i64, address: i64) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, chatId) VALUES (?1, ?2)",
                params![identity, address],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StorageError::Duplicate(identity)
                } else {
                    StorageError::Query(e)
                }
            })?;
            Ok(())
        })
        .await?;
        debug!("Inserted user {identity} with chat {address}");
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, chatId FROM users")?;
            let rows = stmt.query_map([], |row| {
                Ok(UserRecord {
                    identity: row.get(0)?,
                    address: row.get(1)?,
                })
            })?;
            let users = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
        .await
    }

    async fn count_users(&self) -> Result<u64, StorageError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
        .await
    }

    async fn close(&self) -> Result<(), StorageError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StorageError::Poisoned)?;
            if let Some(conn) = guard.take() {
                conn.close().map_err(|(_, e)| StorageError::Query(e))?;
                info!("Database connection closed");
            }
            Ok(())
        })
        .await?
    }
}
