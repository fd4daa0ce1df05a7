use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

use crate::types::error::PostboxError;

// Shorthand so we don't spell out Pool<SqliteConnectionManager> everywhere.
pub type DbPool = Pool<SqliteConnectionManager>;

pub fn create_pool(db_path: &Path) -> Result<DbPool, PostboxError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PostboxError::Store(format!("Cannot create {}: {}", parent.display(), e)))?;
    }

    let manager = SqliteConnectionManager::file(db_path);

    let pool = Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA foreign_keys = ON;",
    )?;

    Ok(pool)
}

/// In-memory pool for tests. A single connection keeps the database alive
/// and visible across pool checkouts.
#[cfg(test)]
pub fn create_test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory();
    Pool::builder().max_size(1).build(manager).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::initialize_schema;

    #[test]
    fn test_create_pool_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("postbox.db");

        let pool = create_pool(&db_path).unwrap();
        initialize_schema(&pool.get().unwrap()).unwrap();

        assert!(db_path.exists());
    }
}
