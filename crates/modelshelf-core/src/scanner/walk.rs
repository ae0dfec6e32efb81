use crate::error::Error;
use crate::platform;
use crate::storage::models::DiscoveredFile;
use ahash::AHashSet;
use chrono::{DateTime, SecondsFormat, Utc};
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

/// Extensions (lowercase, no dot) of the model formats we index.
pub const MODEL_EXTENSIONS: [&str; 2] = ["stl", "3mf"];

/// A progress message is emitted every this many examined files.
pub const PROGRESS_INTERVAL: usize = 100;

const SKIPPED_DIRECTORIES: &[&str] = &[
    "__macosx",
    "system volume information",
    "$recycle.bin",
    "windows",
    "$windows.~bt",
    "$windows.~ws",
    "config.msi",
    "programdata",
    "recovery",
    "boot",
    "efi",
];

const SKIPPED_DIRECTORY_PREFIX: &str = "windows defender";

/// Everything one walk needs. Owned by the walker for the duration of a scan.
#[derive(Debug, Clone)]
pub struct ScanTask {
    pub root: PathBuf,
    pub max_file_size: u64,
    pub ignore_patterns: Vec<Pattern>,
    pub cancel: Arc<AtomicBool>,
}

impl ScanTask {
    pub fn new(root: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            root: root.into(),
            max_file_size,
            ignore_patterns: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add user glob ignore patterns; invalid globs are logged and dropped.
    pub fn with_ignore_globs(mut self, globs: &[String]) -> Self {
        self.ignore_patterns = globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();
        self
    }

    pub fn with_cancel_token(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }
}

#[derive(Debug, Clone, Default)]
pub struct WalkResult {
    pub files: Vec<DiscoveredFile>,
    /// Non-directory entries looked at, matched or not.
    pub total_examined: usize,
    pub cancelled: bool,
}

/// Case-insensitive deny list for system and packaging directories.
pub fn should_skip_directory(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.starts_with(SKIPPED_DIRECTORY_PREFIX) || SKIPPED_DIRECTORIES.contains(&lower.as_str())
}

pub fn is_model_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            MODEL_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

pub fn format_timestamp(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Enumerate model files below `task.root` with an explicit directory stack.
///
/// Unlistable directories are skipped with a warning. Files above the size
/// ceiling are counted as examined but left out of the result. Cancellation is
/// checked at each directory boundary and returns what was found so far.
pub fn walk(task: &ScanTask, mut on_progress: impl FnMut(usize)) -> Result<WalkResult, Error> {
    if !task.root.is_dir() {
        return Err(Error::RootNotFound(task.root.clone()));
    }

    let mut result = WalkResult::default();
    let mut stack: Vec<PathBuf> = vec![task.root.clone()];
    let mut seen: AHashSet<PathBuf> = AHashSet::new();

    while let Some(dir) = stack.pop() {
        if task.is_cancelled() {
            debug!("Walk cancelled with {} directories pending", stack.len() + 1);
            result.cancelled = true;
            break;
        }

        let key = fs::canonicalize(&dir).unwrap_or_else(|_| dir.clone());
        if !seen.insert(key) {
            continue;
        }

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(source) => {
                let err = Error::DirectoryAccess { path: dir.clone(), source };
                warn!("Skipping directory: {}", err);
                continue;
            }
        };

        for entry_result in entries {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Error reading entry in directory {}: {}", dir.display(), err);
                    continue;
                }
            };

            let path = entry.path();
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("Error getting metadata for {}: {}", path.display(), err);
                    continue;
                }
            };

            if metadata.is_dir() {
                let name = entry.file_name();
                if should_skip_directory(&name.to_string_lossy()) || task.is_ignored(&path) {
                    debug!("Skipping directory {}", path.display());
                    continue;
                }
                if !task.is_cancelled() {
                    stack.push(path);
                }
                continue;
            }

            result.total_examined += 1;
            if result.total_examined % PROGRESS_INTERVAL == 0 {
                on_progress(result.total_examined);
            }

            if !is_model_file(&path) || task.is_ignored(&path) {
                continue;
            }
            if metadata.len() > task.max_file_size {
                debug!(
                    "Skipping {} ({} bytes exceeds ceiling of {})",
                    path.display(),
                    metadata.len(),
                    task.max_file_size
                );
                continue;
            }

            let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
            result.files.push(DiscoveredFile {
                file_path: platform::normalize_path(&path),
                file_name: entry.file_name().to_string_lossy().into_owned(),
                size_bytes: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
                modified_at: format_timestamp(modified),
            });
        }
    }

    Ok(result)
}
