use super::models::{Tag, TagUsage};
use super::sqlite::Database;
use rusqlite::{params, OptionalExtension, Result};
use tracing::debug;

impl Database {
    /// Insert the tag if it is new and return the stored row. Names are
    /// trimmed; an empty name is rejected by the table's CHECK constraint.
    pub fn create_tag(&self, name: &str) -> Result<Tag> {
        let name = name.trim();
        self.connection().execute(
            "INSERT OR IGNORE INTO tags (name) VALUES (?1)",
            params![name],
        )?;
        self.connection().query_row(
            "SELECT id, name FROM tags WHERE name = ?1",
            params![name],
            |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
    }

    pub fn find_tag(&self, name: &str) -> Result<Option<Tag>> {
        self.connection()
            .query_row(
                "SELECT id, name FROM tags WHERE name = ?1",
                params![name.trim()],
                |row| {
                    Ok(Tag {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()
    }

    /// All non-empty tags with how many models use each, ordered by name.
    pub fn list_tags(&self) -> Result<Vec<TagUsage>> {
        let mut stmt = self.connection().prepare(
            "SELECT t.id, t.name, COUNT(DISTINCT mt.model_id) \
             FROM tags t \
             LEFT JOIN model_tags mt ON t.id = mt.tag_id \
             WHERE t.name != '' \
             GROUP BY t.id, t.name \
             ORDER BY t.name",
        )?;
        let tags = stmt
            .query_map([], |row| {
                Ok(TagUsage {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    model_count: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(tags)
    }

    /// Number of models linked to a tag. Callers confirm this with the user
    /// before deleting a tag that is in use.
    pub fn tag_model_count(&self, tag_id: i64) -> Result<i64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM model_tags WHERE tag_id = ?1",
            params![tag_id],
            |row| row.get(0),
        )
    }

    /// Delete a tag and its links (children first), then sweep orphans.
    pub fn delete_tag(&self, tag_id: i64) -> Result<bool> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute("DELETE FROM model_tags WHERE tag_id = ?1", params![tag_id])?;
        let removed = tx.execute("DELETE FROM tags WHERE id = ?1", params![tag_id])?;
        tx.commit()?;
        self.repair_model_tags()?;
        Ok(removed > 0)
    }

    pub fn tag_names_for_model(&self, model_id: i64) -> Result<Vec<String>> {
        let mut stmt = self.connection().prepare(
            "SELECT t.name FROM tags t \
             JOIN model_tags mt ON mt.tag_id = t.id \
             WHERE mt.model_id = ?1 \
             ORDER BY t.name",
        )?;
        let names = stmt
            .query_map(params![model_id], |row| row.get(0))?
            .collect::<Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Replace a model's tags with `names` in one transaction. Blank names are
    /// skipped and unknown names are created.
    pub fn set_model_tags(&self, model_id: i64, names: &[String]) -> Result<usize> {
        let tx = self.connection().unchecked_transaction()?;
        let mut linked = 0;
        {
            tx.execute("DELETE FROM model_tags WHERE model_id = ?1", params![model_id])?;

            let mut insert_tag = tx.prepare_cached("INSERT OR IGNORE INTO tags (name) VALUES (?1)")?;
            let mut find_tag = tx.prepare_cached("SELECT id FROM tags WHERE name = ?1")?;
            let mut link = tx.prepare_cached(
                "INSERT OR IGNORE INTO model_tags (model_id, tag_id) VALUES (?1, ?2)",
            )?;

            for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
                insert_tag.execute(params![name])?;
                let tag_id: i64 = find_tag.query_row(params![name], |row| row.get(0))?;
                linked += link.execute(params![model_id, tag_id])?;
            }
        }
        tx.commit()?;
        debug!("Linked {} tags to model {}", linked, model_id);
        Ok(linked)
    }
}
