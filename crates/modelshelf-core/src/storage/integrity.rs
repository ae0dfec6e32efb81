use super::sqlite::Database;
use rusqlite::Result;
use tracing::{debug, info};

impl Database {
    /// Delete `model_tags` rows whose model or tag no longer exists.
    /// Safe to run any number of times; returns the number of rows removed.
    pub fn repair_model_tags(&self) -> Result<usize> {
        let removed = self.connection().execute(
            "DELETE FROM model_tags \
             WHERE model_id NOT IN (SELECT id FROM models) \
                OR tag_id NOT IN (SELECT id FROM tags)",
            [],
        )?;
        if removed > 0 {
            info!("Removed {} orphaned model_tags rows", removed);
        } else {
            debug!("No orphaned model_tags rows found");
        }
        Ok(removed)
    }

    pub fn count_orphaned_model_tags(&self) -> Result<i64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM model_tags mt \
             LEFT JOIN models m ON mt.model_id = m.id \
             LEFT JOIN tags t ON mt.tag_id = t.id \
             WHERE m.id IS NULL OR t.id IS NULL",
            [],
            |row| row.get(0),
        )
    }
}
