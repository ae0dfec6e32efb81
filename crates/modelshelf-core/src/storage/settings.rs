use super::sqlite::Database;
use rusqlite::{params, OptionalExtension, Result};
use tracing::warn;

pub const MAX_FILE_SIZE_MB: &str = "maxFileSizeMB";
pub const MAX_CONCURRENT_RENDERS: &str = "maxConcurrentRenders";
pub const MAX_THUMBNAIL_SIZE: &str = "maxThumbnailSize";

const DEFAULT_MAX_FILE_SIZE_MB: u64 = 50;
const DEFAULT_MAX_CONCURRENT_RENDERS: usize = 3;
const DEFAULT_MAX_THUMBNAIL_SIZE: u32 = 300;

const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    (MAX_FILE_SIZE_MB, "50"),
    (MAX_CONCURRENT_RENDERS, "3"),
    (MAX_THUMBNAIL_SIZE, "300"),
];

impl Database {
    pub(super) fn seed_default_settings(&self) -> Result<()> {
        let mut stmt = self
            .connection()
            .prepare("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)")?;
        for (key, value) in DEFAULT_SETTINGS {
            stmt.execute(params![key, value])?;
        }
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .connection()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.connection().execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn all_settings(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT key, COALESCE(value, '') FROM settings ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(String, String)>>>()?;
        Ok(rows)
    }

    pub fn max_file_size_bytes(&self) -> Result<u64> {
        let mb = self.parsed_setting(MAX_FILE_SIZE_MB, DEFAULT_MAX_FILE_SIZE_MB)?;
        Ok(mb.saturating_mul(1024 * 1024))
    }

    pub fn max_concurrent_renders(&self) -> Result<usize> {
        let value = self.parsed_setting(MAX_CONCURRENT_RENDERS, DEFAULT_MAX_CONCURRENT_RENDERS)?;
        Ok(value.max(1))
    }

    pub fn max_thumbnail_size(&self) -> Result<u32> {
        let value = self.parsed_setting(MAX_THUMBNAIL_SIZE, DEFAULT_MAX_THUMBNAIL_SIZE)?;
        Ok(value.max(1))
    }

    fn parsed_setting<T: std::str::FromStr + Copy>(&self, key: &str, default: T) -> Result<T> {
        Ok(match self.get_setting(key)? {
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(value) => value,
                Err(_) => {
                    warn!("Invalid value '{}' for setting {}, using default", raw, key);
                    default
                }
            },
            None => default,
        })
    }
}
