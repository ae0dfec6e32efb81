pub mod walk;
pub mod worker;

pub use walk::{walk, ScanTask, WalkResult, MODEL_EXTENSIONS};
pub use worker::{WalkMessage, WalkerHandle};
