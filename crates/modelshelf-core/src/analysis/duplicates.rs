use crate::storage::Database;
use ahash::AHashMap;
use std::collections::BTreeMap;
use tracing::debug;

/// One member of a duplicate group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateEntry {
    pub file_path: String,
    pub file_name: String,
    pub size_bytes: i64,
    pub thumbnail: Option<Vec<u8>>,
}

/// Content hash -> members, only for hashes shared by two or more models.
pub type DuplicateGroups = BTreeMap<String, Vec<DuplicateEntry>>;

/// Group every model with a known content hash and keep groups of size > 1.
///
/// Reads the store as it is now; nothing is cached between calls. Members are
/// ordered by path so one call's output is stable.
pub fn find_duplicates(db: &Database) -> Result<DuplicateGroups, crate::Error> {
    let mut stmt = db.connection().prepare(
        "SELECT content_hash, file_path, file_name, size_bytes, thumbnail \
         FROM models \
         WHERE content_hash IS NOT NULL AND content_hash != '' \
         ORDER BY file_path",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            DuplicateEntry {
                file_path: row.get(1)?,
                file_name: row.get(2)?,
                size_bytes: row.get(3)?,
                thumbnail: row.get(4)?,
            },
        ))
    })?;

    let mut by_hash: AHashMap<String, Vec<DuplicateEntry>> = AHashMap::new();
    for row in rows {
        let (hash, entry) = row?;
        by_hash.entry(hash).or_default().push(entry);
    }

    let groups: DuplicateGroups = by_hash
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .collect();

    debug!("Found {} duplicate groups", groups.len());
    Ok(groups)
}

/// Totals over a set of duplicate groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuplicateSummary {
    pub groups: usize,
    pub files: usize,
    /// Bytes that would be freed by keeping one copy per group.
    pub wasted_bytes: i64,
}

impl DuplicateSummary {
    pub fn from_groups(groups: &DuplicateGroups) -> Self {
        let mut summary = DuplicateSummary::default();
        for members in groups.values() {
            summary.groups += 1;
            summary.files += members.len();
            let size = members.first().map(|m| m.size_bytes).unwrap_or(0);
            summary.wasted_bytes += size * (members.len() as i64 - 1);
        }
        summary
    }
}
