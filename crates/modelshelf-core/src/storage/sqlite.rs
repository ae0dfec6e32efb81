use crate::error::Error;
use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName, ErrorCode, OpenFlags, Result};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA_VERSION: i64 = 1;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        let db = Database { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        db.seed_default_settings()?;
        let repaired = db.repair_model_tags()?;
        if repaired > 0 {
            debug!("Removed {} orphaned model_tags rows on open", repaired);
        }
        Ok(db)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, 64MB cache, foreign keys on)");
        Ok(())
    }

    /// Create missing tables and indexes. Model metadata is user data, so the
    /// schema only ever grows; nothing is dropped on upgrade.
    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < SCHEMA_VERSION {
            debug!("Schema version {} < {}, applying schema", version, SCHEMA_VERSION);
        }

        self.conn.execute_batch(include_str!("schema.sql"))?;
        debug!("SQLite schema initialized (version {})", SCHEMA_VERSION);
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ── Backup / restore ─────────────────────────────────────────

    /// Copy the live database to `dest` with SQLite's online backup. `dest`
    /// is overwritten.
    pub fn backup_to(&self, dest: &Path) -> Result<()> {
        self.conn.backup(DatabaseName::Main, dest, None)?;
        info!("Database backed up to {}", dest.display());
        Ok(())
    }

    /// Replace every table with the contents of the backup at `src`, then
    /// bring the schema and settings up to date and sweep orphaned links.
    pub fn restore_from(&mut self, src: &Path) -> Result<(), Error> {
        if !is_model_database(src)? {
            return Err(Error::InvalidBackup(src.to_path_buf()));
        }
        self.conn
            .restore(DatabaseName::Main, src, None::<fn(Progress)>)?;
        self.migrate_schema()?;
        self.seed_default_settings()?;
        let repaired = self.repair_model_tags()?;
        info!(
            "Database restored from {} ({} orphaned tag links removed)",
            src.display(),
            repaired
        );
        Ok(())
    }
}

/// True when `path` is an SQLite file holding the model tables.
fn is_model_database(path: &Path) -> Result<bool> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let found = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master \
         WHERE type = 'table' AND name IN ('models', 'tags', 'model_tags')",
        [],
        |row| row.get::<_, i64>(0),
    );
    match found {
        Ok(n) => Ok(n == 3),
        Err(rusqlite::Error::SqliteFailure(failure, _))
            if failure.code == ErrorCode::NotADatabase =>
        {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
