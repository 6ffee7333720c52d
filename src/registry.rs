//! In-memory collection of process records
//!
//! Records are mutated by runner worker threads and read by whatever thread
//! renders them. Every read-modify-write happens under the record lock;
//! events are published after the lock is released so subscribers may call
//! back into the registry.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::events::{EventBus, RegistryEvent, lock_or_recover};
use crate::models::{OutputLine, ProcessId, ProcessKind, ProcessRecord, ProcessStatus};

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    records: BTreeMap<ProcessId, ProcessRecord>,
}

pub struct ProcessRegistry {
    state: Mutex<RegistryState>,
    bus: Arc<EventBus>,
}

impl ProcessRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            bus,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Reserve a fresh id for a record about to be added
    pub fn allocate_id(&self) -> ProcessId {
        let mut state = lock_or_recover(&self.state);
        state.next_id += 1;
        ProcessId(state.next_id)
    }

    /// Allocate, add, and return a new pending record
    pub fn create(&self, kind: ProcessKind, package: &str, channel: &str) -> ProcessId {
        let id = self.allocate_id();
        self.add(ProcessRecord::new(id, kind, package, channel));
        id
    }

    pub fn add(&self, record: ProcessRecord) {
        let id = record.id;
        {
            let mut state = lock_or_recover(&self.state);
            state.next_id = state.next_id.max(id.0);
            state.records.insert(id, record);
        }
        self.bus.publish(&RegistryEvent::Added { id });
    }

    /// Dismiss a record. Records that are still running are kept; cancel them
    /// first.
    pub fn remove(&self, id: ProcessId) -> Option<ProcessRecord> {
        let removed = {
            let mut state = lock_or_recover(&self.state);
            match state.records.get(&id) {
                Some(record) if !record.is_running() => state.records.remove(&id),
                _ => None,
            }
        };
        if removed.is_some() {
            self.bus.publish(&RegistryEvent::Removed { id });
        }
        removed
    }

    /// Dismiss every record that has reached a terminal status
    pub fn clear_finished(&self) -> Vec<ProcessId> {
        let removed: Vec<ProcessId> = {
            let mut state = lock_or_recover(&self.state);
            let ids: Vec<ProcessId> = state
                .records
                .values()
                .filter(|r| r.status.is_terminal())
                .map(|r| r.id)
                .collect();
            for id in &ids {
                state.records.remove(id);
            }
            ids
        };
        for id in &removed {
            self.bus.publish(&RegistryEvent::Removed { id: *id });
        }
        removed
    }

    pub fn get(&self, id: ProcessId) -> Option<ProcessRecord> {
        lock_or_recover(&self.state).records.get(&id).cloned()
    }

    /// Snapshot of all records: running first, then most recent first
    pub fn list(&self) -> Vec<ProcessRecord> {
        let mut records: Vec<ProcessRecord> = lock_or_recover(&self.state)
            .records
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.is_running()
                .cmp(&a.is_running())
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        });
        records
    }

    pub fn running_count(&self) -> usize {
        lock_or_recover(&self.state)
            .records
            .values()
            .filter(|r| r.is_running())
            .count()
    }

    /// Append one log line. Returns false if the record is unknown.
    pub fn append_line(&self, id: ProcessId, line: OutputLine) -> bool {
        {
            let mut state = lock_or_recover(&self.state);
            let Some(record) = state.records.get_mut(&id) else {
                return false;
            };
            record.log.push(line.clone());
        }
        self.bus.publish(&RegistryEvent::LogAppended { id, line });
        true
    }

    /// Move to `status` if the state machine allows it
    pub fn set_status(&self, id: ProcessId, status: ProcessStatus) -> bool {
        {
            let mut state = lock_or_recover(&self.state);
            let Some(record) = state.records.get_mut(&id) else {
                return false;
            };
            if !record.status.can_transition_to(status) {
                tracing::debug!(%id, from = %record.status, to = %status, "ignored status transition");
                return false;
            }
            record.status = status;
        }
        self.bus.publish(&RegistryEvent::StatusChanged { id, status });
        true
    }

    /// Record that cancellation was requested. Returns false if the record is
    /// unknown, already terminal, or already flagged.
    pub fn mark_cancel_requested(&self, id: ProcessId) -> bool {
        {
            let mut state = lock_or_recover(&self.state);
            let Some(record) = state.records.get_mut(&id) else {
                return false;
            };
            if record.status.is_terminal() || record.cancel_requested {
                return false;
            }
            record.cancel_requested = true;
        }
        self.bus.publish(&RegistryEvent::CancelRequested { id });
        true
    }

    /// Append trailing lines and enter a terminal status in one step.
    ///
    /// Returns false, leaving the record untouched, if it was already
    /// terminal: a record is finalized exactly once. A `Cancelled` record
    /// always carries `cancel_requested`.
    pub fn finish(
        &self,
        id: ProcessId,
        status: ProcessStatus,
        exit_code: Option<i32>,
        trailing: Vec<OutputLine>,
    ) -> bool {
        debug_assert!(status.is_terminal());
        {
            let mut state = lock_or_recover(&self.state);
            let Some(record) = state.records.get_mut(&id) else {
                return false;
            };
            if !record.status.can_transition_to(status) {
                return false;
            }
            record.log.extend(trailing.iter().cloned());
            record.exit_code = exit_code;
            record.status = status;
            if status == ProcessStatus::Cancelled {
                record.cancel_requested = true;
            }
        }
        for line in trailing {
            self.bus.publish(&RegistryEvent::LogAppended { id, line });
        }
        self.bus.publish(&RegistryEvent::StatusChanged { id, status });
        true
    }
}
