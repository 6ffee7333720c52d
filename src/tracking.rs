//! Persisted record of installs made by this tool
//!
//! The backing file is a JSON object keyed `<name>::<channel>`. Every
//! mutation is written through before it returns; a missing or unreadable
//! file loads as an empty store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{ShelfError, ShelfResult};
use crate::events::lock_or_recover;
use crate::models::{TrackingEntry, TrackingMetadata, tracking_key};

pub struct TrackingStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, TrackingEntry>>,
}

impl TrackingStore {
    /// Open the store at `path`, starting empty if the file is missing or corrupt
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_entries(&path);
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an install, replacing any previous entry for (name, channel)
    pub fn track(
        &self,
        name: &str,
        channel: &str,
        metadata: TrackingMetadata,
    ) -> ShelfResult<TrackingEntry> {
        let entry = TrackingEntry::new(name, channel).with_metadata(metadata);

        let mut entries = lock_or_recover(&self.entries);
        let mut next = entries.clone();
        next.insert(entry.key(), entry.clone());
        self.persist(&next)?;
        *entries = next;

        tracing::info!(name, channel, "tracked install");
        Ok(entry)
    }

    /// Forget an install. Returns whether an entry existed.
    pub fn untrack(&self, name: &str, channel: &str) -> ShelfResult<bool> {
        let key = tracking_key(name, channel);

        let mut entries = lock_or_recover(&self.entries);
        if !entries.contains_key(&key) {
            return Ok(false);
        }
        let mut next = entries.clone();
        next.remove(&key);
        self.persist(&next)?;
        *entries = next;

        tracing::info!(name, channel, "untracked install");
        Ok(true)
    }

    pub fn is_tracked(&self, name: &str, channel: &str) -> bool {
        lock_or_recover(&self.entries).contains_key(&tracking_key(name, channel))
    }

    pub fn get(&self, name: &str, channel: &str) -> Option<TrackingEntry> {
        lock_or_recover(&self.entries)
            .get(&tracking_key(name, channel))
            .cloned()
    }

    /// The channel `name` is tracked under, if any.
    ///
    /// A name should only ever be tracked under one channel; if it is tracked
    /// under several, the lexicographically smallest channel is returned.
    pub fn find_channel_for_name(&self, name: &str) -> Option<String> {
        lock_or_recover(&self.entries)
            .values()
            .filter(|e| e.name == name)
            .map(|e| e.channel.clone())
            .min()
    }

    /// All entries, sorted by name then channel
    pub fn entries(&self) -> Vec<TrackingEntry> {
        let mut entries: Vec<TrackingEntry> =
            lock_or_recover(&self.entries).values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name).then(a.channel.cmp(&b.channel)));
        entries
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write to a sibling temp file, then rename over the real one
    fn persist(&self, entries: &BTreeMap<String, TrackingEntry>) -> ShelfResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| ShelfError::parse("tracking file", e))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn load_entries(path: &Path) -> BTreeMap<String, TrackingEntry> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable tracking file, starting empty");
            return BTreeMap::new();
        }
    };

    match serde_json::from_str::<BTreeMap<String, TrackingEntry>>(&content) {
        // Re-key from the entries themselves so a hand-edited key can't
        // disagree with its (name, channel)
        Ok(raw) => raw.into_values().map(|e| (e.key(), e)).collect(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt tracking file, starting empty");
            BTreeMap::new()
        }
    }
}
