pub mod duplicates;

pub use duplicates::{find_duplicates, DuplicateEntry, DuplicateGroups, DuplicateSummary};
