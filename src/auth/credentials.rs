// Credential persistence
// Two string values under stable keys; absence of both means logged out

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::types::CredentialPair;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Durable store for the current credential pair
///
/// Implementations must apply `store_pair` and `store_refreshed` atomically:
/// readers never observe one token updated and the other stale.
pub trait CredentialStore: Send + Sync {
    fn access_token(&self) -> Result<Option<String>>;

    fn refresh_token(&self) -> Result<Option<String>>;

    /// Replace both tokens
    fn store_pair(&self, pair: &CredentialPair) -> Result<()>;

    /// Write a refreshed access token, and the rotated refresh token if any
    fn store_refreshed(&self, access_token: &str, refresh_token: Option<&str>) -> Result<()>;

    /// Remove both tokens
    fn clear(&self) -> Result<()>;

    /// Both tokens, if both are present
    fn load(&self) -> Result<Option<CredentialPair>> {
        Ok(match (self.access_token()?, self.refresh_token()?) {
            (Some(access_token), Some(refresh_token)) => Some(CredentialPair {
                access_token,
                refresh_token,
            }),
            _ => None,
        })
    }
}

/// SQLite-backed store using an `auth_kv` key/value table
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create credential directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// In-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS auth_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn()
            .query_row("SELECT value FROM auth_kv WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()
            .with_context(|| format!("Failed to read {} from SQLite", key))
    }

    fn put_all(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .context("Failed to begin credential transaction")?;
        let now = Utc::now().to_rfc3339();

        for (key, value) in entries {
            tx.execute(
                "INSERT INTO auth_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .with_context(|| format!("Failed to write {} to SQLite", key))?;
        }

        tx.commit().context("Failed to commit credentials")
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn access_token(&self) -> Result<Option<String>> {
        self.get(ACCESS_TOKEN_KEY)
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        self.get(REFRESH_TOKEN_KEY)
    }

    fn store_pair(&self, pair: &CredentialPair) -> Result<()> {
        self.put_all(&[
            (ACCESS_TOKEN_KEY, pair.access_token.as_str()),
            (REFRESH_TOKEN_KEY, pair.refresh_token.as_str()),
        ])
    }

    fn store_refreshed(&self, access_token: &str, refresh_token: Option<&str>) -> Result<()> {
        match refresh_token {
            Some(refresh) => {
                self.put_all(&[(ACCESS_TOKEN_KEY, access_token), (REFRESH_TOKEN_KEY, refresh)])
            }
            None => self.put_all(&[(ACCESS_TOKEN_KEY, access_token)]),
        }
    }

    fn clear(&self) -> Result<()> {
        self.conn()
            .execute(
                "DELETE FROM auth_kv WHERE key IN (?1, ?2)",
                [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY],
            )
            .context("Failed to clear credentials from SQLite")?;
        Ok(())
    }
}

/// Process-local store; does not survive restarts
#[derive(Default)]
pub struct MemoryCredentialStore {
    tokens: Mutex<(Option<String>, Option<String>)>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            tokens: Mutex::new((Some(pair.access_token), Some(pair.refresh_token))),
        }
    }

    fn tokens(&self) -> MutexGuard<'_, (Option<String>, Option<String>)> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn access_token(&self) -> Result<Option<String>> {
        Ok(self.tokens().0.clone())
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        Ok(self.tokens().1.clone())
    }

    fn store_pair(&self, pair: &CredentialPair) -> Result<()> {
        *self.tokens() = (
            Some(pair.access_token.clone()),
            Some(pair.refresh_token.clone()),
        );
        Ok(())
    }

    fn store_refreshed(&self, access_token: &str, refresh_token: Option<&str>) -> Result<()> {
        let mut tokens = self.tokens();
        tokens.0 = Some(access_token.to_string());
        if let Some(refresh) = refresh_token {
            tokens.1 = Some(refresh.to_string());
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.tokens() = (None, None);
        Ok(())
    }
}
