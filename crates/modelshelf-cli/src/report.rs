use colored::*;
use modelshelf_core::analysis::{DuplicateGroups, DuplicateSummary};
use modelshelf_core::storage::models::ModelRecord;
use serde_json::json;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

pub fn print_duplicate_table(groups: &DuplicateGroups) {
    for (hash, members) in groups {
        let size = members.first().map(|m| m.size_bytes).unwrap_or(0);
        println!(
            "{} {} ({} copies, {} bytes each)",
            "■".yellow(),
            hash.chars().take(12).collect::<String>(),
            members.len(),
            size
        );
        for member in members {
            let marker = if member.thumbnail.is_some() { " " } else { "?" };
            println!("  {} {}", marker.dimmed(), member.file_path);
        }
    }

    let summary = DuplicateSummary::from_groups(groups);
    println!();
    println!(
        "{} duplicate groups, {} files, {} bytes reclaimable",
        format!("{}", summary.groups).red(),
        format!("{}", summary.files).red(),
        format!("{}", summary.wasted_bytes).red(),
    );
}

/// One row per group member: hash, path, name, size, has thumbnail.
pub fn write_duplicate_csv(groups: &DuplicateGroups, output: Option<&Path>) -> anyhow::Result<()> {
    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(fs::File::create(path)?),
        None => Box::new(io::stdout()),
    };
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(["content_hash", "file_path", "file_name", "size_bytes", "has_thumbnail"])?;
    for (hash, members) in groups {
        for member in members {
            writer.write_record([
                hash.as_str(),
                member.file_path.as_str(),
                member.file_name.as_str(),
                member.size_bytes.to_string().as_str(),
                if member.thumbnail.is_some() { "true" } else { "false" },
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn write_duplicate_json(groups: &DuplicateGroups, output: Option<&Path>) -> anyhow::Result<()> {
    let summary = DuplicateSummary::from_groups(groups);
    let body = json!({
        "groups": groups.iter().map(|(hash, members)| json!({
            "content_hash": hash,
            "files": members.iter().map(|m| json!({
                "file_path": m.file_path,
                "file_name": m.file_name,
                "size_bytes": m.size_bytes,
                "has_thumbnail": m.thumbnail.is_some(),
            })).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
        "summary": {
            "groups": summary.groups,
            "files": summary.files,
            "wasted_bytes": summary.wasted_bytes,
        },
    });
    let text = serde_json::to_string_pretty(&body)?;
    match output {
        Some(path) => fs::write(path, text)?,
        None => println!("{}", text),
    }
    Ok(())
}

pub fn print_model_table(models: &[ModelRecord]) {
    if models.is_empty() {
        println!("No models");
        return;
    }
    for model in models {
        let printed = if model.user.printed { "✓".green() } else { " ".normal() };
        println!(
            "{} {:>10}  {:<24} {}",
            printed,
            model.scan.size_bytes,
            model.user.designer.as_deref().unwrap_or("-"),
            model.file_path
        );
    }
}

pub fn print_values(values: &[String], empty: &str) {
    if values.is_empty() {
        println!("{}", empty);
    }
    for value in values {
        println!("{}", value);
    }
}
