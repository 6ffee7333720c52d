//! Health checks

use anyhow::Result;
use colored::Colorize;

use crate::config::ShelfConfig;
use crate::models::Package;
use crate::shelf::Shelf;

/// Maximum number of items to display in doctor command output
const MAX_DISPLAY_ITEMS: usize = 10;

/// Check that nix and the search tool are usable and that tracking agrees
/// with the profile
pub fn cmd_doctor(config: &ShelfConfig, shelf: &Shelf) -> Result<()> {
    println!("{}", "Running health checks...".bold());
    println!();

    let mut issues_found = 0;

    // Check 1: nix binary
    println!("{}", "Checking nix...".dimmed());
    match which::which(&config.nix.binary) {
        Ok(path) => {
            let version = shelf
                .nix()
                .version()
                .unwrap_or_else(|| "unknown version".to_string());
            println!("  {} {} ({})", "✓".green(), version, path.display());
        }
        Err(_) => {
            println!("  {} '{}' not found on PATH", "!".yellow(), config.nix.binary);
            println!(
                "    {} Set another binary with {}",
                "?".blue(),
                "nixshelf config set nix.binary <path>".cyan()
            );
            issues_found += 1;
        }
    }

    // Check 2: search tool
    println!("{}", "Checking search tool...".dimmed());
    match which::which(shelf.search_binary()) {
        Ok(path) => println!("  {} {}", "✓".green(), path.display()),
        Err(_) => {
            println!(
                "  {} '{}' not found; search and install metadata are unavailable",
                "!".yellow(),
                shelf.search_binary()
            );
            issues_found += 1;
        }
    }

    // Check 3: profile inventory
    println!("{}", "Checking profile...".dimmed());
    let profile_ok = match shelf.refresh() {
        Ok(count) => {
            let managed = shelf.installed().iter().filter(|i| i.is_managed()).count();
            println!(
                "  {} {} packages installed, {} managed by nixshelf",
                "✓".green(),
                count,
                managed
            );
            true
        }
        Err(e) => {
            println!("  {} {}", "!".yellow(), e);
            if !config.nix.experimental_features {
                println!(
                    "    {} Try {}",
                    "?".blue(),
                    "nixshelf config set nix.experimental_features true".cyan()
                );
            }
            issues_found += 1;
            false
        }
    };

    // Check 4: tracked installs missing from the profile
    println!("{}", "Checking tracked installs...".dimmed());
    let tracked = shelf.tracked();
    if !profile_ok {
        println!("  {} Skipped, profile unavailable", "-".dimmed());
    } else {
        let stale: Vec<String> = shelf
            .packages()
            .into_iter()
            .filter_map(|p| match p {
                Package::Tracked(entry) => Some(format!("{} ({})", entry.name, entry.channel)),
                _ => None,
            })
            .collect();

        if stale.is_empty() {
            println!(
                "  {} All {} tracked installs are in the profile",
                "✓".green(),
                tracked.len()
            );
        } else {
            println!(
                "  {} {} tracked installs are no longer in the profile:",
                "!".yellow(),
                stale.len()
            );
            for entry in stale.iter().take(MAX_DISPLAY_ITEMS) {
                println!("    {}", entry);
            }
            if stale.len() > MAX_DISPLAY_ITEMS {
                println!("    ... and {} more", stale.len() - MAX_DISPLAY_ITEMS);
            }
            issues_found += stale.len();
        }
    }

    // Check 5: files
    println!("{}", "Checking files...".dimmed());
    if let Ok(path) = ShelfConfig::config_path() {
        let note = if path.exists() { "" } else { " (defaults)" };
        println!("  {} Config: {}{}", "✓".green(), path.display(), note.dimmed());
    }
    if let Ok(path) = config.tracking_path() {
        println!("  {} Tracking: {}", "✓".green(), path.display());
    }

    println!();
    if issues_found == 0 {
        println!("{} No issues found", "✓".green());
    } else {
        println!("{} Found {} issues", "!".yellow(), issues_found);
    }

    Ok(())
}
