//! Database migrations
//!
//! Versioned schema changes tracked in `schema_migrations`.

use crate::core::error::{MangoonError, Result};
use rusqlite::Connection;
use tracing::{info, warn};

/// Migration version tracking table
const MIGRATION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
)
"#;

/// Initial schema (version 1)
const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    slug TEXT UNIQUE NOT NULL,
    type TEXT NOT NULL DEFAULT 'website',
    url TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS plugins (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    slug TEXT UNIQUE NOT NULL,
    class_ref TEXT UNIQUE NOT NULL,
    version TEXT NOT NULL DEFAULT '1.0.0',
    description TEXT,
    documentation TEXT,
    author TEXT,
    author_url TEXT,
    icon TEXT,
    config_schema TEXT NOT NULL DEFAULT '{}',
    config_values TEXT NOT NULL DEFAULT '{}',
    default_config TEXT NOT NULL DEFAULT '{}',
    is_active INTEGER NOT NULL DEFAULT 0,
    is_installed INTEGER NOT NULL DEFAULT 0,
    is_system INTEGER NOT NULL DEFAULT 0,
    type TEXT NOT NULL DEFAULT 'downloader',
    requires_runtime TEXT,
    requires_framework TEXT,
    dependencies TEXT NOT NULL DEFAULT '[]',
    downloads_count INTEGER NOT NULL DEFAULT 0,
    last_used_at TEXT,
    installed_at TEXT,
    priority INTEGER NOT NULL DEFAULT 0,
    rate_limit INTEGER,
    concurrent_limit INTEGER NOT NULL DEFAULT 1,
    metadata TEXT NOT NULL DEFAULT '{}',
    supported_sources TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_plugins_type ON plugins(type);
CREATE INDEX IF NOT EXISTS idx_plugins_state ON plugins(is_active, is_installed);
CREATE INDEX IF NOT EXISTS idx_plugins_priority ON plugins(priority);

CREATE TABLE IF NOT EXISTS mangas (
    id TEXT PRIMARY KEY,
    slug TEXT UNIQUE NOT NULL,
    author TEXT,
    illustrator TEXT,
    publication_year INTEGER,
    original_language TEXT,
    status TEXT NOT NULL DEFAULT 'ongoing',
    type TEXT NOT NULL DEFAULT 'manga',
    cover_image TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS manga_translations (
    id TEXT PRIMARY KEY,
    manga_id TEXT NOT NULL REFERENCES mangas(id) ON DELETE CASCADE,
    language_code TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (manga_id, language_code)
);

CREATE INDEX IF NOT EXISTS idx_manga_translations_title ON manga_translations(title);
"#;

/// Run all pending migrations
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    // Create migration tracking table
    conn.execute_batch(MIGRATION_TABLE)
        .map_err(MangoonError::DatabaseError)?;

    // Check current version
    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(MangoonError::DatabaseError)?;

    // Apply migrations
    if current_version < 1 {
        info!("Applying migration v1: Initial schema");
        apply_migration(conn, 1, MIGRATION_V1)?;
    }

    Ok(())
}

/// Apply a single migration inside a transaction
fn apply_migration(conn: &mut Connection, version: i64, sql: &str) -> Result<()> {
    // Start transaction
    let tx = conn.transaction().map_err(MangoonError::DatabaseError)?;

    // Execute migration SQL
    tx.execute_batch(sql).map_err(|e| {
        warn!("Migration v{} failed: {}", version, e);
        MangoonError::DatabaseError(e)
    })?;

    // Record migration
    tx.execute("INSERT INTO schema_migrations (version) VALUES (?)", [version])
        .map_err(MangoonError::DatabaseError)?;

    // Commit transaction
    tx.commit().map_err(MangoonError::DatabaseError)?;

    info!("Migration v{} applied successfully", version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
                 AND name IN ('plugins', 'sources', 'mangas', 'manga_translations')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }
}
