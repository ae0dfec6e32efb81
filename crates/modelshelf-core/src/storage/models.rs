use std::fmt;
use std::str::FromStr;

/// A model file found on disk by the walker, before hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Normalized (`/`-separated) path.
    pub file_path: String,
    pub file_name: String,
    pub size_bytes: i64,
    /// RFC 3339, millisecond precision, UTC.
    pub modified_at: String,
}

/// The scan-derived columns of a stored model, used to decide whether a
/// rescan needs to hash the file again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredScanState {
    pub content_hash: Option<String>,
    pub size_bytes: i64,
    pub modified_at: String,
}

/// Fields owned by the scanner. A rescan refreshes exactly these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFields {
    pub file_name: String,
    pub content_hash: Option<String>,
    pub size_bytes: i64,
    pub modified_at: String,
}

/// Fields owned by the user. The scan path never writes them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFields {
    pub designer: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub printed: bool,
    pub parent_model: Option<String>,
    pub license: Option<String>,
}

/// A discovered file together with its (possibly unknown) content hash,
/// ready to be upserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedModel {
    pub file_path: String,
    pub scan: ScanFields,
}

impl ScannedModel {
    pub fn from_discovered(file: DiscoveredFile, content_hash: Option<String>) -> Self {
        Self {
            file_path: file.file_path,
            scan: ScanFields {
                file_name: file.file_name,
                content_hash,
                size_bytes: file.size_bytes,
                modified_at: file.modified_at,
            },
        }
    }
}

/// One row of `models`.
#[derive(Debug, Clone)]
pub struct ModelRecord {
    pub id: i64,
    pub file_path: String,
    pub scan: ScanFields,
    pub user: UserFields,
    pub thumbnail: Option<Vec<u8>>,
    pub date_added: Option<String>,
}

/// A model together with the names of its tags.
#[derive(Debug, Clone)]
pub struct ModelDetails {
    pub record: ModelRecord,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// A tag and the number of models linked to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagUsage {
    pub id: i64,
    pub name: String,
    pub model_count: i64,
}

/// Outcome of upserting one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl UpsertCounts {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }

    pub fn add(&mut self, other: UpsertCounts) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// Orderings offered by the model listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelSort {
    NameAsc,
    NameDesc,
    SizeAsc,
    SizeDesc,
    DateAsc,
    #[default]
    DateDesc,
}

impl ModelSort {
    /// `ORDER BY` body, with the path as tie-breaker so pages are stable.
    pub(crate) fn order_by(self) -> &'static str {
        match self {
            ModelSort::NameAsc => "file_name ASC, file_path ASC",
            ModelSort::NameDesc => "file_name DESC, file_path ASC",
            ModelSort::SizeAsc => "size_bytes ASC, file_path ASC",
            ModelSort::SizeDesc => "size_bytes DESC, file_path ASC",
            ModelSort::DateAsc => "modified_at ASC, file_path ASC",
            ModelSort::DateDesc => "modified_at DESC, file_path ASC",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ModelSort::NameAsc => "name-asc",
            ModelSort::NameDesc => "name-desc",
            ModelSort::SizeAsc => "size-asc",
            ModelSort::SizeDesc => "size-desc",
            ModelSort::DateAsc => "date-asc",
            ModelSort::DateDesc => "date-desc",
        }
    }
}

impl FromStr for ModelSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "name-asc" => Ok(ModelSort::NameAsc),
            "name-desc" => Ok(ModelSort::NameDesc),
            "size-asc" => Ok(ModelSort::SizeAsc),
            "size-desc" => Ok(ModelSort::SizeDesc),
            "date-asc" => Ok(ModelSort::DateAsc),
            "date-desc" => Ok(ModelSort::DateDesc),
            _ => Err(format!(
                "unknown sort order '{}' (expected name-asc, name-desc, size-asc, size-desc, date-asc or date-desc)",
                s
            )),
        }
    }
}

impl fmt::Display for ModelSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of a model listing. `page` is 1-based.
#[derive(Debug, Clone)]
pub struct ModelPage {
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub models: Vec<ModelRecord>,
}

impl ModelPage {
    pub fn page_count(&self) -> usize {
        self.total.div_ceil(self.page_size.max(1))
    }
}
