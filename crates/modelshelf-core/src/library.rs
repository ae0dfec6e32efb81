use crate::error::Error;
use crate::storage::Database;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::error;

/// Shared handle to the model database.
///
/// The connection sits behind a mutex so only one statement or transaction
/// runs at a time. Async callers go through [`Library::run`], which moves the
/// blocking SQLite work onto tokio's blocking pool.
#[derive(Clone)]
pub struct Library {
    db: Arc<Mutex<Database>>,
}

impl Library {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(path: &str) -> Result<Self, Error> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Run `job` against the database on the blocking pool.
    pub async fn run<T, F>(&self, label: &'static str, job: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, Error> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let handle = tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| Error::Other("database lock poisoned".to_string()))?;
            job(&guard)
        });

        match handle.await {
            Ok(result) => result,
            Err(join_error) => {
                error!("Blocking database task '{}' failed: {}", label, join_error);
                if join_error.is_cancelled() {
                    Err(Error::Cancelled)
                } else {
                    Err(Error::Other(format!("database task '{}' panicked", label)))
                }
            }
        }
    }

    /// Synchronous access for callers outside the runtime (CLI commands, tests).
    pub fn with_db<T>(&self, job: impl FnOnce(&Database) -> Result<T, Error>) -> Result<T, Error> {
        let guard = self
            .db
            .lock()
            .map_err(|_| Error::Other("database lock poisoned".to_string()))?;
        job(&guard)
    }

    /// Swap the database contents for the backup at `src`. The lock is held
    /// for the whole restore.
    pub fn restore(&self, src: &Path) -> Result<(), Error> {
        let mut guard = self
            .db
            .lock()
            .map_err(|_| Error::Other("database lock poisoned".to_string()))?;
        guard.restore_from(src)
    }
}
