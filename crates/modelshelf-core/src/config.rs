use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db_path: String,
    pub root_paths: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub batch_size: usize,
    pub render: RenderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "modelshelf.db".to_string(),
            root_paths: Vec::new(),
            ignore_patterns: Vec::new(),
            batch_size: 100,
            render: RenderConfig::default(),
        }
    }
}

/// Tuning for the render scheduler. Concurrency itself is a runtime setting
/// stored in the database (`maxConcurrentRenders`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub pacing_ms: u64,
    pub retry_cooldown_ms: u64,
    pub max_surface_uses: u32,
    pub cache_capacity: usize,
    pub maintenance_interval_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            pacing_ms: 200,
            retry_cooldown_ms: 2000,
            max_surface_uses: 100,
            cache_capacity: 1000,
            maintenance_interval_secs: 60,
        }
    }
}

impl RenderConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_millis(self.retry_cooldown_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }
}

/// `Config.toml` in the working directory (optional), overridden by
/// `MODELSHELF_*` environment variables (`MODELSHELF_RENDER__PACING_MS=50`).
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("MODELSHELF")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("root_paths")
                .with_list_parse_key("ignore_patterns")
                .try_parsing(true),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Drop roots nested inside another root so no directory is indexed twice.
/// Keeps first-seen order.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for dir in dirs {
        let path = Path::new(&dir);
        if kept.iter().any(|k| path.starts_with(k)) {
            continue;
        }
        kept.retain(|k| !Path::new(k).starts_with(path));
        kept.push(dir);
    }
    kept
}
