//! Live progress for in-flight operations
//!
//! Registry events and ticker ticks arrive on one channel; the loop prints
//! log lines as they are appended, animates the spinner on ticks and stops
//! once every followed record is terminal.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use super::helpers::format_line;
use crate::events::RegistryEvent;
use crate::models::{ProcessId, ProcessRecord};
use crate::runner::RunHandle;
use crate::shelf::Shelf;
use crate::ticker::{Tick, Ticker};

const TICK_INTERVAL: Duration = Duration::from_millis(100);

pub enum UiEvent {
    Registry(RegistryEvent),
    Tick(Tick),
}

impl From<Tick> for UiEvent {
    fn from(tick: Tick) -> Self {
        Self::Tick(tick)
    }
}

/// Start operations with `start` and stream their output until all of them
/// have finished. Returns the final records in start order.
pub fn follow<F>(
    shelf: &Shelf,
    cancel_after: Option<Duration>,
    start: F,
) -> Result<Vec<ProcessRecord>>
where
    F: FnOnce(&Shelf) -> Result<Vec<RunHandle>>,
{
    // Subscribe before starting so no early line is missed
    let (tx, rx) = mpsc::channel::<UiEvent>();
    let subscription = shelf.bus().subscribe_sender(tx.clone(), UiEvent::Registry);

    let handles = match start(shelf) {
        Ok(handles) => handles,
        Err(e) => {
            shelf.bus().unsubscribe(subscription);
            return Err(e);
        }
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    let ticker = Ticker::spawn(TICK_INTERVAL, tx);
    let ids: Vec<ProcessId> = handles.iter().map(RunHandle::id).collect();
    drive(shelf, &rx, &ids, cancel_after, &spinner);
    ticker.stop();
    spinner.finish_and_clear();
    shelf.bus().unsubscribe(subscription);

    // Joining also waits for finish hooks (tracking) to complete
    let mut records = Vec::with_capacity(handles.len());
    for handle in handles {
        let id = handle.id();
        handle.wait();
        if let Some(record) = shelf.record(id) {
            records.push(record);
        }
    }
    Ok(records)
}

fn drive(
    shelf: &Shelf,
    rx: &Receiver<UiEvent>,
    ids: &[ProcessId],
    cancel_after: Option<Duration>,
    spinner: &ProgressBar,
) {
    let names: HashMap<ProcessId, String> = ids
        .iter()
        .filter_map(|id| shelf.record(*id).map(|r| (*id, r.package)))
        .collect();
    let labelled = ids.len() > 1;
    let mut pending: HashSet<ProcessId> = ids.iter().copied().collect();
    let mut cancel_sent = false;

    while !pending.is_empty() {
        let Ok(event) = rx.recv() else {
            break;
        };
        match event {
            UiEvent::Registry(RegistryEvent::LogAppended { id, line }) if pending.contains(&id) => {
                let prefix = names.get(&id).map(String::as_str).filter(|_| labelled);
                emit(spinner, &format_line(&line, prefix));
            }
            UiEvent::Registry(RegistryEvent::StatusChanged { id, status }) if status.is_terminal() => {
                pending.remove(&id);
            }
            UiEvent::Tick(tick) => {
                spinner.set_message(format!(
                    "{} running ({}s)",
                    pending.len(),
                    tick.elapsed.as_secs()
                ));
                spinner.tick();

                if let Some(limit) = cancel_after
                    && !cancel_sent
                    && tick.elapsed >= limit
                {
                    cancel_sent = true;
                    emit(
                        spinner,
                        &format!("{} Cancelling after {}s", "!".yellow(), limit.as_secs()),
                    );
                    for id in &pending {
                        shelf.cancel(*id);
                    }
                }
            }
            UiEvent::Registry(_) => {}
        }
    }
}

/// A hidden spinner swallows `println`, so write directly when not on a terminal
fn emit(spinner: &ProgressBar, text: &str) {
    if spinner.is_hidden() {
        println!("{}", text);
    } else {
        spinner.println(text);
    }
}
