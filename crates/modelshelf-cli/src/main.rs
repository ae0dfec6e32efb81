mod commands;
mod logging;
mod progress;
mod report;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{
    Cli, Commands, ModelCommand, OutputFormat, PurgeTarget, SettingsCommand, TagCommand,
};
use dotenv::dotenv;
use modelshelf_core::analysis::find_duplicates;
use modelshelf_core::config::{self, AppConfig};
use modelshelf_core::platform;
use modelshelf_core::{Library, ProgressReporter, ScanEngine, ThumbnailReport};
use progress::CliReporter;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let mut config = match config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();
    if let Some(db) = args.db {
        config.db_path = db;
    }

    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return Ok(());
    };

    if let Err(err) = run(command, config).await {
        error!("Error: {:#}", err);
        process::exit(1);
    }
    Ok(())
}

async fn run(command: Commands, config: AppConfig) -> anyhow::Result<()> {
    match command {
        Commands::PrintConfig => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        Commands::Scan { path, thumbnails } => {
            let engine = open_engine(config)?;
            install_interrupt_handler(&engine);
            let scanned = run_scan(&engine, path).await?;
            if thumbnails && !engine.cancel_token().load(Ordering::Relaxed) {
                run_thumbnails(&engine, &scanned).await?;
            }
            Ok(())
        }
        Commands::Thumbnails { path } => {
            let engine = open_engine(config)?;
            install_interrupt_handler(&engine);
            let roots: Vec<PathBuf> = path.into_iter().collect();
            run_thumbnails(&engine, &roots).await
        }
        Commands::Duplicates { format, output } => {
            let library = open_library(&config)?;
            let groups = library.with_db(find_duplicates)?;
            match format {
                OutputFormat::Table => report::print_duplicate_table(&groups),
                OutputFormat::Csv => report::write_duplicate_csv(&groups, output.as_deref())?,
                OutputFormat::Json => report::write_duplicate_json(&groups, output.as_deref())?,
            }
            Ok(())
        }
        Commands::Models { action } => run_models(&open_library(&config)?, action),
        Commands::Backup { dest } => {
            let library = open_library(&config)?;
            library
                .with_db(|db| Ok(db.backup_to(&dest)?))
                .with_context(|| format!("backing up to {}", dest.display()))?;
            println!("Backed up {} to {}", config.db_path, dest.display());
            Ok(())
        }
        Commands::Restore { src, yes } => {
            let library = open_library(&config)?;
            if !yes
                && !prompt_confirm(
                    &format!(
                        "Replace ALL data in {} with {}?",
                        config.db_path,
                        src.display()
                    ),
                    Some(false),
                )?
            {
                return Ok(());
            }
            library
                .restore(&src)
                .with_context(|| format!("restoring from {}", src.display()))?;
            let count = library.with_db(|db| Ok(db.model_count()?))?;
            println!("Restored {} models from {}", count, src.display());
            Ok(())
        }
        Commands::Repair => {
            let library = open_library(&config)?;
            let removed = library.with_db(|db| Ok(db.repair_model_tags()?))?;
            println!("Removed {} orphaned tag links", format!("{}", removed).cyan());
            Ok(())
        }
        Commands::Tags { action } => run_tags(&open_library(&config)?, action),
        Commands::Settings { action } => run_settings(&open_library(&config)?, action),
        Commands::Purge { target, yes } => {
            let library = open_library(&config)?;
            let what = match target {
                PurgeTarget::Models => "ALL models, their tags and thumbnails",
                PurgeTarget::Thumbnails => "ALL thumbnails",
            };
            if !yes && !prompt_confirm(&format!("Are you SURE you want to delete {}?", what), Some(false))? {
                return Ok(());
            }
            let removed = library.with_db(|db| {
                Ok(match target {
                    PurgeTarget::Models => db.purge_models()?,
                    PurgeTarget::Thumbnails => db.purge_thumbnails()?,
                })
            })?;
            println!("Purged {} rows", removed);
            Ok(())
        }
    }
}

fn open_library(config: &AppConfig) -> anyhow::Result<Library> {
    Library::open(&config.db_path).with_context(|| format!("opening database {}", config.db_path))
}

fn open_engine(config: AppConfig) -> anyhow::Result<ScanEngine> {
    let library = open_library(&config)?;
    Ok(ScanEngine::new(config, library))
}

fn install_interrupt_handler(engine: &ScanEngine) {
    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing current work...");
            cancel.store(true, Ordering::Relaxed);
        }
    });
}

/// Scan `path`, or every configured root. Returns the roots that were
/// scanned, as stored.
async fn run_scan(engine: &ScanEngine, path: Option<PathBuf>) -> anyhow::Result<Vec<PathBuf>> {
    let roots: Vec<PathBuf> = match path {
        Some(path) => vec![path],
        None => config::non_overlapping_directories(engine.config().root_paths.clone())
            .into_iter()
            .map(PathBuf::from)
            .collect(),
    };
    if roots.is_empty() {
        bail!("no path given and no root_paths configured");
    }

    let reporter: Arc<dyn ProgressReporter> = Arc::new(CliReporter::new());
    let mut scanned = Vec::with_capacity(roots.len());
    for root in roots {
        info!("Processing {}", root.display());
        let outcome = engine.scan(&root, Arc::clone(&reporter)).await?;

        println!();
        info!(
            "{}: {} models ({} new, {} changed, {} unchanged), {} removed in {}",
            outcome.root,
            format!("{}", outcome.files).green(),
            format!("{}", outcome.sync.counts.inserted).green(),
            format!("{}", outcome.sync.counts.updated).yellow(),
            outcome.sync.counts.unchanged,
            format!("{}", outcome.removed).red(),
            format!("{:.2}s", outcome.duration.as_secs_f64()).green(),
        );
        if outcome.hash_failures > 0 {
            warn!("{} files could not be read and have no content hash", outcome.hash_failures);
        }
        for failed in &outcome.sync.failed_batches {
            error!("Batch {} ({} files) was not saved: {}", failed.index, failed.rows, failed.error);
        }
        let cancelled = outcome.walk_cancelled || outcome.sync.cancelled;
        if cancelled {
            warn!("Scan of {} was cancelled before completion", outcome.root);
        }
        scanned.push(PathBuf::from(outcome.root));
        if cancelled {
            break;
        }
    }
    Ok(scanned)
}

/// Generate missing thumbnails under each of `roots`, or across the whole
/// library when `roots` is empty.
async fn run_thumbnails(engine: &ScanEngine, roots: &[PathBuf]) -> anyhow::Result<()> {
    let scheduler = engine.start_scheduler().await?;
    let maintenance = scheduler.spawn_maintenance(engine.config().render.maintenance_interval());
    let reporter: Arc<dyn ProgressReporter> = Arc::new(CliReporter::new());

    let targets: Vec<Option<&Path>> = if roots.is_empty() {
        vec![None]
    } else {
        roots.iter().map(|root| Some(root.as_path())).collect()
    };

    let mut report = ThumbnailReport::default();
    let mut failure = None;
    for target in targets {
        match engine
            .generate_thumbnails(target, &scheduler, Arc::clone(&reporter))
            .await
        {
            Ok(part) => {
                report.add(part);
                if part.skipped > 0 {
                    break;
                }
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    scheduler.shutdown().await;
    maintenance.abort();

    if let Some(e) = failure {
        return Err(e.into());
    }
    info!(
        "{} thumbnails rendered, {} placeholders",
        format!("{}", report.rendered).green(),
        format!("{}", report.fallbacks).yellow(),
    );
    if report.save_failures > 0 {
        warn!("{} thumbnails could not be saved", report.save_failures);
    }
    if report.skipped > 0 {
        warn!("Cancelled with {} models still without thumbnails", report.skipped);
    }
    Ok(())
}

fn run_tags(library: &Library, action: TagCommand) -> anyhow::Result<()> {
    match action {
        TagCommand::List => {
            let tags = library.with_db(|db| Ok(db.list_tags()?))?;
            if tags.is_empty() {
                println!("No tags");
            }
            for tag in tags {
                println!("{:<30} {}", tag.name, format!("{}", tag.model_count).cyan());
            }
        }
        TagCommand::Add { name } => {
            let tag = library
                .with_db(|db| Ok(db.create_tag(&name)?))
                .with_context(|| format!("creating tag '{}'", name))?;
            println!("Tag '{}' ready (id {})", tag.name, tag.id);
        }
        TagCommand::Count { name } => {
            let count = library.with_db(|db| match db.find_tag(&name)? {
                Some(tag) => Ok(Some(db.tag_model_count(tag.id)?)),
                None => Ok(None),
            })?;
            match count {
                Some(count) => println!("{} models tagged '{}'", count, name),
                None => bail!("no tag named '{}'", name),
            }
        }
        TagCommand::Delete { name, yes } => {
            let Some(tag) = library.with_db(|db| Ok(db.find_tag(&name)?))? else {
                bail!("no tag named '{}'", name);
            };
            let in_use = library.with_db(|db| Ok(db.tag_model_count(tag.id)?))?;
            if in_use > 0
                && !yes
                && !prompt_confirm(
                    &format!("Tag '{}' is used by {} models. Delete it?", tag.name, in_use),
                    Some(false),
                )?
            {
                return Ok(());
            }
            library.with_db(|db| Ok(db.delete_tag(tag.id)?))?;
            println!("Deleted tag '{}'", tag.name);
        }
    }
    Ok(())
}

fn run_models(library: &Library, action: ModelCommand) -> anyhow::Result<()> {
    match action {
        ModelCommand::List { sort, limit } => {
            let models = library.with_db(|db| Ok(db.list_models(sort, limit)?))?;
            report::print_model_table(&models);
        }
        ModelCommand::Page {
            page,
            page_size,
            sort,
        } => {
            let page = library.with_db(|db| Ok(db.models_page(page, page_size, sort)?))?;
            report::print_model_table(&page.models);
            println!(
                "Page {} of {} ({} models)",
                page.page,
                page.page_count().max(1),
                page.total
            );
        }
        ModelCommand::ByDesigner { designer } => {
            let models = library.with_db(|db| Ok(db.models_by_designer(&designer)?))?;
            report::print_model_table(&models);
        }
        ModelCommand::InDirectory { path } => {
            let directory = platform::root_key(&path);
            let models = library.with_db(|db| Ok(db.models_in_directory(&directory)?))?;
            report::print_model_table(&models);
        }
        ModelCommand::Designers => {
            report::print_values(&library.with_db(|db| Ok(db.designers()?))?, "No designers")
        }
        ModelCommand::Licenses => {
            report::print_values(&library.with_db(|db| Ok(db.licenses()?))?, "No licenses")
        }
        ModelCommand::Parents => report::print_values(
            &library.with_db(|db| Ok(db.parent_models()?))?,
            "No parent models",
        ),
    }
    Ok(())
}

fn run_settings(library: &Library, action: SettingsCommand) -> anyhow::Result<()> {
    match action {
        SettingsCommand::List => {
            for (key, value) in library.with_db(|db| Ok(db.all_settings()?))? {
                println!("{:<24} {}", key, value);
            }
        }
        SettingsCommand::Get { key } => match library.with_db(|db| Ok(db.get_setting(&key)?))? {
            Some(value) => println!("{}", value),
            None => bail!("no setting named '{}'", key),
        },
        SettingsCommand::Set { key, value } => {
            library.with_db(|db| Ok(db.set_setting(&key, &value)?))?;
            println!("{} = {}", key, value);
        }
    }
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
