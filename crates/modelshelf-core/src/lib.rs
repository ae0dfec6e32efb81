pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod library;
pub mod platform;
pub mod progress;
pub mod render;
pub mod scanner;
pub mod storage;
pub mod sync;

pub use config::{AppConfig, RenderConfig};
pub use engine::{ScanEngine, ScanOutcome, ThumbnailReport};
pub use error::{Error, RenderError};
pub use library::Library;
pub use progress::{ProgressReporter, SilentReporter};
