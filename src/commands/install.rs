//! Operations that start nix processes: install, uninstall, run, shell

use std::time::Duration;

use anyhow::{Context, Result, bail};
use colored::Colorize;

use super::helpers::{confirm, provenance_label, status_label};
use super::progress::follow;
use crate::models::{ProcessKind, ProcessRecord, ProcessStatus, Provenance, TrackingMetadata};
use crate::nix::{validate_channel, validate_package_name};
use crate::shelf::Shelf;

/// Install packages concurrently, tracking each one that completes
pub fn cmd_install(
    shelf: &Shelf,
    names: &[String],
    channel: Option<&str>,
    lookup_metadata: bool,
) -> Result<()> {
    for name in names {
        validate_package_name(name)?;
    }
    if let Some(channel) = channel {
        validate_channel(channel)?;
    }
    let channel = channel.unwrap_or(shelf.default_channel()).to_string();

    // Without a current view, trust the tracking entries
    let profile_known = match shelf.refresh() {
        Ok(_) => true,
        Err(e) => {
            println!("{} {}", "!".yellow(), e);
            false
        }
    };

    let mut planned = Vec::new();
    for name in names {
        let tracked = shelf.is_tracked(name, &channel);
        if tracked && profile_known && shelf.artifacts_for(name).is_empty() {
            println!(
                "{} '{}' is tracked but missing from the profile, reinstalling",
                "!".yellow(),
                name
            );
        } else if tracked {
            println!(
                "{} '{}' is already installed from {}",
                "!".yellow(),
                name,
                channel
            );
            continue;
        }
        let metadata = if lookup_metadata {
            package_metadata(shelf, name, &channel)
        } else {
            TrackingMetadata {
                attr_name: Some(name.clone()),
                ..TrackingMetadata::default()
            }
        };
        planned.push((name.clone(), metadata));
    }

    if planned.is_empty() {
        return Ok(());
    }

    let listing: Vec<&str> = planned.iter().map(|(n, _)| n.as_str()).collect();
    println!(
        "{} Installing {} from {}",
        ">".cyan(),
        listing.join(", ").bold(),
        channel.cyan()
    );

    let records = follow(shelf, None, |shelf| {
        planned
            .into_iter()
            .map(|(name, metadata)| {
                shelf
                    .install(&name, Some(&channel), metadata)
                    .with_context(|| format!("Failed to start install of '{}'", name))
            })
            .collect()
    })?;

    report(&records)
}

/// Metadata snapshot from the search tool, best effort
fn package_metadata(shelf: &Shelf, name: &str, channel: &str) -> TrackingMetadata {
    let fallback = TrackingMetadata {
        attr_name: Some(name.to_string()),
        ..TrackingMetadata::default()
    };

    match shelf.search(name, Some(channel), Some(10)) {
        Ok(results) => results
            .iter()
            .find(|r| r.attr_name == name)
            .map(TrackingMetadata::from)
            .unwrap_or(fallback),
        Err(e) => {
            tracing::debug!(name, error = %e, "metadata lookup failed");
            fallback
        }
    }
}

/// Remove every profile element belonging to `name`
pub fn cmd_uninstall(shelf: &Shelf, name: &str, yes: bool) -> Result<()> {
    if let Err(e) = shelf.refresh() {
        println!("{} {}", "!".yellow(), e);
    }

    let artifacts = shelf.artifacts_for(name);
    if artifacts.is_empty() {
        println!("{} '{}' is not installed in the profile", "!".yellow(), name);
        return Ok(());
    }

    println!("{} Uninstall plan for '{}':\n", ">".cyan(), name.bold());
    for artifact in &artifacts {
        let version = if artifact.version.is_empty() {
            String::new()
        } else {
            format!(" {}", artifact.version)
        };
        println!(
            "  {}{} [{}] ({}, {})",
            artifact.element_key,
            version.dimmed(),
            artifact.attr_path.dimmed(),
            artifact.channel,
            provenance_label(artifact.provenance)
        );
    }

    if artifacts.iter().all(|a| a.provenance == Provenance::External) {
        println!();
        println!(
            "{} '{}' was not installed by nixshelf",
            "!".yellow(),
            name
        );
    }

    if !yes {
        println!();
        if !confirm("Proceed?", false)? {
            println!("Cancelled");
            return Ok(());
        }
    }

    let records = follow(shelf, None, |shelf| {
        Ok(vec![
            shelf
                .uninstall(name)
                .with_context(|| format!("Failed to start uninstall of '{}'", name))?,
        ])
    })?;

    report(&records)
}

/// Run a program from a package without installing it
pub fn cmd_run(
    shelf: &Shelf,
    name: &str,
    channel: Option<&str>,
    program: Option<&str>,
    args: &[String],
    cancel_after: Option<u64>,
) -> Result<()> {
    let records = follow(shelf, cancel_after.map(Duration::from_secs), |shelf| {
        Ok(vec![shelf.run(name, channel, program, args)?])
    })?;
    report(&records)
}

/// Run a shell command line with a package available
pub fn cmd_shell(
    shelf: &Shelf,
    name: &str,
    channel: Option<&str>,
    command_line: &str,
    cancel_after: Option<u64>,
) -> Result<()> {
    let records = follow(shelf, cancel_after.map(Duration::from_secs), |shelf| {
        Ok(vec![shelf.shell(name, channel, command_line)?])
    })?;
    report(&records)
}

/// Print one outcome line per record; error if any operation failed
fn report(records: &[ProcessRecord]) -> Result<()> {
    let mut failed = 0;

    for record in records {
        let verb = match record.kind {
            ProcessKind::Install => "Installed",
            ProcessKind::Uninstall => "Removed",
            ProcessKind::Run | ProcessKind::Shell => "Finished",
        };

        match record.status {
            ProcessStatus::Completed => println!(
                "{} {} '{}' ({})",
                "+".green(),
                verb,
                record.package,
                record.channel
            ),
            ProcessStatus::Cancelled => println!(
                "{} {} of '{}' {}",
                "!".yellow(),
                record.kind,
                record.package,
                status_label(record.status)
            ),
            status => {
                failed += 1;
                let code = record
                    .exit_code
                    .map(|c| format!(" (exit code {})", c))
                    .unwrap_or_default();
                println!(
                    "{} {} of '{}' {}{}",
                    "!".red(),
                    record.kind,
                    record.package,
                    status_label(status),
                    code
                );
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} operations failed", failed, records.len());
    }
    Ok(())
}
