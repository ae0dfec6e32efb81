use super::models::*;
use super::sqlite::Database;
use crate::platform;
use ahash::AHashMap;
use rusqlite::{params, OptionalExtension, Params, Result, Row};
use tracing::debug;

const MODEL_COLUMNS: &str = "id, file_path, file_name, content_hash, size_bytes, modified_at, \
     thumbnail, designer, source, notes, printed, parent_model, license, date_added";

fn model_from_row(row: &Row<'_>) -> Result<ModelRecord> {
    Ok(ModelRecord {
        id: row.get(0)?,
        file_path: row.get(1)?,
        scan: ScanFields {
            file_name: row.get(2)?,
            content_hash: row.get(3)?,
            size_bytes: row.get(4)?,
            modified_at: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        },
        thumbnail: row.get(6)?,
        user: UserFields {
            designer: row.get(7)?,
            source: row.get(8)?,
            notes: row.get(9)?,
            printed: row.get(10)?,
            parent_model: row.get(11)?,
            license: row.get(12)?,
        },
        date_added: row.get(13)?,
    })
}

fn sql_int(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl Database {
    // ── Scan sync ────────────────────────────────────────────────

    /// Scan-derived state of every stored model under `root`, keyed by path.
    pub fn scan_states_under(&self, root: &str) -> Result<AHashMap<String, StoredScanState>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT file_path, content_hash, size_bytes, modified_at FROM models")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                StoredScanState {
                    content_hash: row.get(1)?,
                    size_bytes: row.get(2)?,
                    modified_at: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                },
            ))
        })?;

        let mut states = AHashMap::new();
        for row in rows {
            let (path, state) = row?;
            if platform::is_under_root(&path, root) {
                states.insert(path, state);
            }
        }
        Ok(states)
    }

    /// `(id, file_path)` of every stored model under `root`.
    pub fn model_ids_under(&self, root: &str) -> Result<Vec<(i64, String)>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT id, file_path FROM models ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter(|(_, path)| platform::is_under_root(path, root))
            .collect())
    }

    /// Upsert one batch inside a single transaction. Existing rows only get
    /// their scan-derived fields refreshed, and only when a value differs;
    /// user-owned fields are left alone. Any failing row rolls the whole
    /// batch back.
    pub fn upsert_models(&self, models: &[ScannedModel]) -> Result<UpsertCounts> {
        let tx = self.connection().unchecked_transaction()?;
        let mut counts = UpsertCounts::default();
        {
            let mut update_stmt = tx.prepare_cached(
                "UPDATE models SET \
                     file_name = ?2, content_hash = ?3, size_bytes = ?4, modified_at = ?5 \
                 WHERE file_path = ?1 AND ( \
                     file_name IS NOT ?2 OR content_hash IS NOT ?3 \
                     OR size_bytes IS NOT ?4 OR modified_at IS NOT ?5)",
            )?;
            let mut exists_stmt =
                tx.prepare_cached("SELECT 1 FROM models WHERE file_path = ?1")?;
            let mut insert_stmt = tx.prepare_cached(
                "INSERT INTO models \
                 (file_path, file_name, content_hash, size_bytes, modified_at, printed, date_added) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            )?;
            let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

            for model in models {
                let scan = &model.scan;
                let updated = update_stmt.execute(params![
                    model.file_path,
                    scan.file_name,
                    scan.content_hash,
                    scan.size_bytes,
                    scan.modified_at,
                ])?;
                if updated > 0 {
                    counts.updated += 1;
                } else if exists_stmt.exists(params![model.file_path])? {
                    counts.unchanged += 1;
                } else {
                    insert_stmt.execute(params![
                        model.file_path,
                        scan.file_name,
                        scan.content_hash,
                        scan.size_bytes,
                        scan.modified_at,
                        now,
                    ])?;
                    counts.inserted += 1;
                }
            }
        }
        tx.commit()?;
        debug!(
            "Upserted batch: {} inserted, {} updated, {} unchanged",
            counts.inserted, counts.updated, counts.unchanged
        );
        Ok(counts)
    }

    /// Delete models by id, child rows first, in one transaction.
    pub fn delete_models(&self, ids: &[i64]) -> Result<usize> {
        let tx = self.connection().unchecked_transaction()?;
        let mut removed = 0;
        {
            let mut tags_stmt = tx.prepare_cached("DELETE FROM model_tags WHERE model_id = ?1")?;
            let mut model_stmt = tx.prepare_cached("DELETE FROM models WHERE id = ?1")?;
            for id in ids {
                tags_stmt.execute(params![id])?;
                removed += model_stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    // ── Single models ────────────────────────────────────────────

    pub fn get_model(&self, file_path: &str) -> Result<Option<ModelDetails>> {
        let path = platform::normalize_str(file_path);
        let record = self
            .connection()
            .query_row(
                &format!("SELECT {} FROM models WHERE file_path = ?1", MODEL_COLUMNS),
                params![path],
                model_from_row,
            )
            .optional()?;

        match record {
            Some(record) => {
                let tags = self.tag_names_for_model(record.id)?;
                Ok(Some(ModelDetails { record, tags }))
            }
            None => Ok(None),
        }
    }

    /// Write the user-owned field set. Scan-derived fields are not touched.
    pub fn update_user_fields(&self, file_path: &str, fields: &UserFields) -> Result<bool> {
        let path = platform::normalize_str(file_path);
        let changed = self.connection().execute(
            "UPDATE models SET designer = ?2, source = ?3, notes = ?4, printed = ?5, \
                 parent_model = ?6, license = ?7 \
             WHERE file_path = ?1",
            params![
                path,
                fields.designer,
                fields.source,
                fields.notes,
                fields.printed,
                fields.parent_model,
                fields.license,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Remove one model and its tag links, then sweep orphans.
    pub fn delete_model(&self, file_path: &str) -> Result<bool> {
        let path = platform::normalize_str(file_path);
        let id: Option<i64> = self
            .connection()
            .query_row(
                "SELECT id FROM models WHERE file_path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;

        let removed = match id {
            Some(id) => self.delete_models(&[id])? > 0,
            None => false,
        };
        self.repair_model_tags()?;
        Ok(removed)
    }

    pub fn model_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM models", [], |row| row.get(0))
    }

    // ── Listings ─────────────────────────────────────────────────

    /// Every model in `sort` order. `limit` of `None` or `Some(0)` means no
    /// limit.
    pub fn list_models(&self, sort: ModelSort, limit: Option<usize>) -> Result<Vec<ModelRecord>> {
        let limit = limit.filter(|n| *n > 0).map_or(-1, sql_int);
        self.query_models(
            &format!(
                "SELECT {} FROM models ORDER BY {} LIMIT ?1",
                MODEL_COLUMNS,
                sort.order_by()
            ),
            params![limit],
        )
    }

    /// Page `page` (1-based, 0 is treated as 1) of the listing in `sort` order.
    pub fn models_page(&self, page: usize, page_size: usize, sort: ModelSort) -> Result<ModelPage> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = (page - 1).saturating_mul(page_size);
        let models = self.query_models(
            &format!(
                "SELECT {} FROM models ORDER BY {} LIMIT ?1 OFFSET ?2",
                MODEL_COLUMNS,
                sort.order_by()
            ),
            params![sql_int(page_size), sql_int(offset)],
        )?;
        let total = usize::try_from(self.model_count()?).unwrap_or(0);
        Ok(ModelPage {
            page,
            page_size,
            total,
            models,
        })
    }

    pub fn models_by_designer(&self, designer: &str) -> Result<Vec<ModelRecord>> {
        self.query_models(
            &format!(
                "SELECT {} FROM models WHERE designer = ?1 ORDER BY file_path",
                MODEL_COLUMNS
            ),
            params![designer],
        )
    }

    /// Models stored at or below `directory`, on whole path components.
    pub fn models_in_directory(&self, directory: &str) -> Result<Vec<ModelRecord>> {
        let models = self.query_models(
            &format!("SELECT {} FROM models ORDER BY file_path", MODEL_COLUMNS),
            [],
        )?;
        Ok(models
            .into_iter()
            .filter(|m| platform::is_under_root(&m.file_path, directory))
            .collect())
    }

    pub fn designers(&self) -> Result<Vec<String>> {
        self.distinct_values("designer")
    }

    pub fn licenses(&self) -> Result<Vec<String>> {
        self.distinct_values("license")
    }

    /// Distinct `parent_model` values, i.e. the remix sources users recorded.
    pub fn parent_models(&self) -> Result<Vec<String>> {
        self.distinct_values("parent_model")
    }

    fn distinct_values(&self, column: &'static str) -> Result<Vec<String>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT DISTINCT {column} FROM models \
             WHERE {column} IS NOT NULL AND trim({column}) != '' \
             ORDER BY {column}"
        ))?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(values)
    }

    fn query_models<P: Params>(&self, sql: &str, params: P) -> Result<Vec<ModelRecord>> {
        let mut stmt = self.connection().prepare(sql)?;
        let models = stmt
            .query_map(params, model_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(models)
    }

    // ── Thumbnails ───────────────────────────────────────────────

    pub fn save_thumbnail(&self, file_path: &str, png: &[u8]) -> Result<bool> {
        let path = platform::normalize_str(file_path);
        let changed = self.connection().execute(
            "UPDATE models SET thumbnail = ?2 WHERE file_path = ?1",
            params![path, png],
        )?;
        Ok(changed > 0)
    }

    pub fn get_thumbnail(&self, file_path: &str) -> Result<Option<Vec<u8>>> {
        let path = platform::normalize_str(file_path);
        let thumbnail = self
            .connection()
            .query_row(
                "SELECT thumbnail FROM models WHERE file_path = ?1",
                params![path],
                |row| row.get::<_, Option<Vec<u8>>>(0),
            )
            .optional()?;
        Ok(thumbnail.flatten())
    }

    /// Paths of models with no thumbnail, optionally restricted to a root.
    pub fn models_without_thumbnails(&self, root: Option<&str>) -> Result<Vec<String>> {
        let mut stmt = self.connection().prepare(
            "SELECT file_path FROM models \
             WHERE thumbnail IS NULL OR length(thumbnail) = 0 \
             ORDER BY file_path",
        )?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(match root {
            Some(root) => paths
                .into_iter()
                .filter(|p| platform::is_under_root(p, root))
                .collect(),
            None => paths,
        })
    }

    pub fn purge_thumbnails(&self) -> Result<usize> {
        let cleared = self.connection().execute(
            "UPDATE models SET thumbnail = NULL WHERE thumbnail IS NOT NULL",
            [],
        )?;
        debug!("Cleared {} thumbnails", cleared);
        Ok(cleared)
    }

    /// Remove every model, its tag links, and tags left unused.
    pub fn purge_models(&self) -> Result<usize> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute("DELETE FROM model_tags", [])?;
        let removed = tx.execute("DELETE FROM models", [])?;
        tx.execute(
            "DELETE FROM tags WHERE id NOT IN (SELECT tag_id FROM model_tags)",
            [],
        )?;
        tx.commit()?;
        self.repair_model_tags()?;
        debug!("Purged {} models", removed);
        Ok(removed)
    }
}
