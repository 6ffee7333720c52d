//! Shared helper functions for command implementations

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use dialoguer::Confirm;

use crate::config::ShelfConfig;
use crate::models::{OutputLine, OutputLineType, ProcessStatus, Provenance};
use crate::shelf::Shelf;
use crate::tracking::TrackingStore;

/// Open the tracking store and build a shelf from `config`
pub fn open_shelf(config: &ShelfConfig) -> Result<Shelf> {
    let path = config.tracking_path()?;
    tracing::debug!(path = %path.display(), "opening tracking store");
    let store = TrackingStore::open(path);
    Shelf::new(config, store).context("Failed to set up nixshelf")
}

/// Prompt user for confirmation
pub fn confirm(prompt: &str, default: bool) -> Result<bool> {
    Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()
        .context("Failed to read confirmation")
}

/// Terminal width for tables, 120 when not attached to a terminal
pub fn term_width() -> u16 {
    terminal_size::terminal_size()
        .map(|(w, _)| w.0)
        .unwrap_or(120)
}

pub fn status_label(status: ProcessStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        ProcessStatus::Completed => label.green(),
        ProcessStatus::Failed | ProcessStatus::Error => label.red(),
        ProcessStatus::Cancelled => label.yellow(),
        ProcessStatus::Pending | ProcessStatus::Running => label.cyan(),
    }
}

pub fn provenance_label(provenance: Provenance) -> ColoredString {
    match provenance {
        Provenance::Managed => "nixshelf".green(),
        Provenance::External => "external".dimmed(),
    }
}

/// Render one log line; `prefix` labels the package when several run at once
pub fn format_line(line: &OutputLine, prefix: Option<&str>) -> String {
    let prefix = prefix
        .map(|p| format!("{} ", format!("[{}]", p).cyan()))
        .unwrap_or_default();
    let content = match line.line_type {
        OutputLineType::Stdout => line.content.normal(),
        OutputLineType::Stderr => line.content.dimmed(),
        OutputLineType::Status => line.content.yellow(),
    };
    format!("{}{}", prefix, content)
}
