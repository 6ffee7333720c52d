//! Read-only views: installed packages, tracked installs, search

use std::collections::BTreeSet;

use anyhow::Result;
use colored::Colorize;
use comfy_table::{
    Cell, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};
use indicatif::{ProgressBar, ProgressStyle};

use super::helpers::term_width;
use crate::models::{InstalledItem, Package, Provenance};
use crate::shelf::Shelf;

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(term_width())
        .set_header(
            header
                .into_iter()
                .map(|h| Cell::new(h).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    table
}

/// List installed packages from a fresh reconciliation
pub fn cmd_list(shelf: &Shelf, format: &str, external: bool, tracked: bool) -> Result<()> {
    if let Err(e) = shelf.refresh() {
        eprintln!("{} {}", "!".yellow(), e);
    }

    let items: Vec<InstalledItem> = shelf
        .installed()
        .into_iter()
        .filter(|item| match (external, tracked) {
            (true, _) => item.provenance == Provenance::External,
            (_, true) => item.provenance == Provenance::Managed,
            _ => true,
        })
        .collect();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No packages found");
        return Ok(());
    }

    let mut table = new_table(vec!["Name", "Version", "Channel", "Source", "Elements"]);
    for item in &items {
        let source = match item.provenance {
            Provenance::Managed => Cell::new("nixshelf").fg(Color::Green),
            Provenance::External => Cell::new("external").fg(Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(&item.name),
            Cell::new(if item.version.is_empty() { "-" } else { item.version.as_str() }),
            Cell::new(&item.channel),
            source,
            Cell::new(item.element_keys().join(", ")),
        ]);
    }

    println!("{table}");
    let managed = items.iter().filter(|i| i.is_managed()).count();
    println!(
        "{} {} packages ({} managed by nixshelf)",
        ">".cyan(),
        items.len(),
        managed
    );
    Ok(())
}

/// Show tracked installs and whether they are still in the profile
pub fn cmd_tracked(shelf: &Shelf, format: &str) -> Result<()> {
    let entries = shelf.tracked();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No tracked installs");
        return Ok(());
    }

    let refreshed = match shelf.refresh() {
        Ok(_) => true,
        Err(e) => {
            eprintln!("{} {}", "!".yellow(), e);
            false
        }
    };

    // Tracked packages with no installed artifact come back as `Tracked`
    let missing: BTreeSet<(String, String)> = shelf
        .packages()
        .into_iter()
        .filter_map(|p| match p {
            Package::Tracked(entry) => Some((entry.name, entry.channel)),
            _ => None,
        })
        .collect();

    let mut table = new_table(vec!["Name", "Channel", "Installed", "In profile", "Description"]);
    for entry in &entries {
        let present = if !refreshed {
            Cell::new("?").fg(Color::DarkGrey)
        } else if missing.contains(&(entry.name.clone(), entry.channel.clone())) {
            Cell::new("✗").fg(Color::Red)
        } else {
            Cell::new("✓").fg(Color::Green)
        };
        table.add_row(vec![
            Cell::new(&entry.name),
            Cell::new(&entry.channel),
            Cell::new(entry.installed_at.format("%Y-%m-%d %H:%M").to_string()),
            present,
            Cell::new(entry.metadata.description.as_deref().unwrap_or("")),
        ]);
    }

    println!("{table}");
    println!("{} {} tracked installs", ">".cyan(), entries.len());
    Ok(())
}

/// Search a channel for packages
pub fn cmd_search(
    shelf: &Shelf,
    query: &str,
    channel: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Searching for '{}'...", query));
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));

    let results = shelf.search(query, channel, limit);
    spinner.finish_and_clear();
    let results = results?;

    if format == "json" {
        let packages: Vec<Package> = results.into_iter().map(Package::Search).collect();
        println!("{}", serde_json::to_string_pretty(&packages)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No packages found matching '{}'", query);
        return Ok(());
    }

    let channel = channel.unwrap_or(shelf.default_channel());
    let mut table = new_table(vec!["Attribute", "Version", "", "Programs", "Description"]);
    for result in &results {
        let installed = if shelf.is_tracked(&result.attr_name, channel) {
            Cell::new("✓").fg(Color::Green)
        } else {
            Cell::new("")
        };
        table.add_row(vec![
            Cell::new(&result.attr_name),
            Cell::new(&result.version),
            installed,
            Cell::new(result.programs.join(" ")),
            Cell::new(result.description.as_deref().unwrap_or("")),
        ]);
    }

    println!("{table}");
    println!(
        "{} {} results in {}",
        ">".cyan(),
        results.len(),
        channel.cyan()
    );
    Ok(())
}
