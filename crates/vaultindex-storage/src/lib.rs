//! vaultindex-storage — durable [`EventStore`] backends.
//!
//! Backends:
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//! - [`postgres`] — PostgreSQL via `sqlx` (shared database for the read API and relayers)
//!
//! The in-memory store lives in `vaultindex-core` as `MemoryEventStore`.
//!
//! 256-bit values are stored as canonical decimal text (SQLite) or
//! `NUMERIC(78,0)` (Postgres), so ordering and equality on the natural key
//! hold on both.

use std::sync::Arc;

use vaultindex_core::{EventStore, IndexerError, MemoryEventStore};

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteEventStore;

/// Which backend a database URL selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Sqlite,
    Postgres,
}

impl Backend {
    /// Pick the backend from the URL scheme: `memory`, `sqlite:`, `postgres://`
    /// or `postgresql://`.
    pub fn from_url(url: &str) -> Result<Self, IndexerError> {
        let url = url.trim();
        if url == "memory" || url == "memory:" {
            Ok(Self::Memory)
        } else if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else {
            Err(IndexerError::Config(format!(
                "unsupported database url {url:?} (expected memory, sqlite: or postgres://)"
            )))
        }
    }
}

/// Open the store a database URL points at, creating its schema if needed.
pub async fn open(url: &str) -> Result<Arc<dyn EventStore>, IndexerError> {
    match Backend::from_url(url)? {
        Backend::Memory => Ok(Arc::new(MemoryEventStore::new())),
        #[cfg(feature = "sqlite")]
        Backend::Sqlite => Ok(Arc::new(SqliteEventStore::open(url).await?)),
        #[cfg(feature = "postgres")]
        Backend::Postgres => Ok(Arc::new(PostgresEventStore::connect(url).await?)),
        #[allow(unreachable_patterns)]
        other => Err(IndexerError::Config(format!(
            "{other:?} backend not compiled in (enable the matching feature)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_from_scheme() {
        assert_eq!(Backend::from_url("memory").unwrap(), Backend::Memory);
        assert_eq!(Backend::from_url("sqlite:./vault.db").unwrap(), Backend::Sqlite);
        assert_eq!(Backend::from_url("sqlite::memory:").unwrap(), Backend::Sqlite);
        assert_eq!(
            Backend::from_url("postgresql://u:p@localhost/vault").unwrap(),
            Backend::Postgres
        );
        assert_eq!(Backend::from_url("postgres://localhost").unwrap(), Backend::Postgres);
        assert!(matches!(
            Backend::from_url("mysql://localhost"),
            Err(IndexerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn opens_memory_store() {
        let store = open("memory").await.unwrap();
        assert!(store.indexer_status().await.unwrap().is_none());
    }
}
