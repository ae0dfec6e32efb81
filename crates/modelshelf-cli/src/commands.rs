use clap::{Parser, Subcommand, ValueEnum};
use modelshelf_core::storage::models::ModelSort;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "modelshelf")]
#[command(about = "Index, deduplicate and thumbnail a library of 3D models", long_about = None)]
pub struct Cli {
    /// SQLite database file, overriding `db_path` from the configuration
    #[arg(long, global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Index a directory, or every configured root when no path is given
    Scan {
        path: Option<PathBuf>,
        /// Generate missing thumbnails once the scan finishes
        #[arg(long)]
        thumbnails: bool,
    },
    /// Generate thumbnails for models that have none
    Thumbnails { path: Option<PathBuf> },
    /// List groups of models with identical content
    Duplicates {
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
        /// Write to a file instead of stdout (csv and json only)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Browse stored models
    Models {
        #[command(subcommand)]
        action: ModelCommand,
    },
    /// Remove tag links that point at missing models or tags
    Repair,
    /// Manage tags
    Tags {
        #[command(subcommand)]
        action: TagCommand,
    },
    /// Read or change stored settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
    /// Delete all models or all thumbnails
    Purge {
        #[arg(value_enum)]
        target: PurgeTarget,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Copy the database to a backup file
    Backup { dest: PathBuf },
    /// Replace the database with the contents of a backup file
    Restore {
        src: PathBuf,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Subcommand)]
pub enum ModelCommand {
    /// List models, newest first unless --sort says otherwise
    List {
        /// name-asc, name-desc, size-asc, size-desc, date-asc or date-desc
        #[arg(long, default_value_t = ModelSort::DateDesc)]
        sort: ModelSort,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one page of the model list
    Page {
        #[arg(default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 50)]
        page_size: usize,
        #[arg(long, default_value_t = ModelSort::DateDesc)]
        sort: ModelSort,
    },
    /// Models credited to a designer
    ByDesigner { designer: String },
    /// Models stored at or below a directory
    InDirectory { path: PathBuf },
    /// Every designer on record
    Designers,
    /// Every license on record
    Licenses,
    /// Every parent model on record
    Parents,
}

#[derive(Debug, Subcommand)]
pub enum TagCommand {
    /// List tags with how many models use each
    List,
    /// Create a tag
    Add { name: String },
    /// Delete a tag and unlink it from every model
    Delete {
        name: String,
        #[arg(short, long)]
        yes: bool,
    },
    /// Show how many models use a tag
    Count { name: String },
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Show every setting
    List,
    Get { key: String },
    Set { key: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Csv,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PurgeTarget {
    Models,
    Thumbnails,
}
