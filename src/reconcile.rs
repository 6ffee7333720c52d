//! Turns the raw profile inventory into a canonical view of installed packages
//!
//! Each pass queries the inventory, derives a (name, version) identity from
//! every element's store path, classifies it against the tracking store and
//! groups elements by canonical name. A failed pass keeps the previous view.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::error::{ShelfError, ShelfResult};
use crate::events::lock_or_recover;
use crate::models::{ElementRef, InstalledArtifact, InstalledItem, Provenance};
use crate::nix::InventorySource;
use crate::tracking::TrackingStore;

/// Length of the base-32 hash that prefixes every store path component
const STORE_HASH_LEN: usize = 32;

// ==================== Inventory Format ====================

#[derive(Debug, Deserialize)]
struct ProfileList {
    #[serde(default)]
    elements: Elements,
}

/// Newer nix keys elements by name; older releases emit a plain array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Elements {
    Keyed(BTreeMap<String, ProfileElement>),
    Indexed(Vec<ProfileElement>),
}

impl Default for Elements {
    fn default() -> Self {
        Self::Keyed(BTreeMap::new())
    }
}

impl Elements {
    fn into_keyed(self) -> Vec<(String, ProfileElement)> {
        match self {
            Self::Keyed(map) => map.into_iter().collect(),
            Self::Indexed(list) => list
                .into_iter()
                .enumerate()
                .map(|(i, e)| (i.to_string(), e))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileElement {
    #[serde(default)]
    store_paths: Vec<String>,
    #[serde(default)]
    attr_path: Option<String>,
    #[serde(default)]
    original_url: Option<String>,
}

// ==================== Identity ====================

/// Split a store path into (name, version).
///
/// `/nix/store/<hash>-ripgrep-14.1.0` gives `("ripgrep", "14.1.0")`. The
/// version starts at the first `-` followed by a digit; without one the
/// whole remainder is the name and the version is empty.
pub fn derive_name_version(store_path: &str) -> (String, String) {
    let component = store_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    let remainder = match component.get(STORE_HASH_LEN..) {
        Some(rest) if rest.starts_with('-') => &rest[1..],
        _ => component,
    };

    let bytes = remainder.as_bytes();
    let split = bytes
        .windows(2)
        .position(|w| w[0] == b'-' && w[1].is_ascii_digit());

    match split {
        Some(at) => (remainder[..at].to_string(), remainder[at + 1..].to_string()),
        None => (remainder.to_string(), String::new()),
    }
}

/// Last segment of an attribute path (`legacyPackages.x86_64-linux.jq` -> `jq`)
pub(crate) fn attr_leaf(attr_path: &str) -> &str {
    attr_path.rsplit('.').next().unwrap_or(attr_path)
}

/// Extracts `<channel>` from origin URLs shaped like `...<registry>/<channel>...`
#[derive(Debug, Clone)]
pub struct ChannelParser {
    pattern: Regex,
    default_channel: String,
}

impl ChannelParser {
    pub fn new(registry: &str, default_channel: impl Into<String>) -> ShelfResult<Self> {
        let pattern = Regex::new(&format!(
            r"(?:^|[:/]){}/([A-Za-z0-9._-]+)",
            regex::escape(registry)
        ))
        .map_err(|e| ShelfError::parse("channel pattern", e))?;
        Ok(Self {
            pattern,
            default_channel: default_channel.into(),
        })
    }

    /// The channel in `url`, or the default when absent or unparseable
    pub fn channel_from_url(&self, url: Option<&str>) -> String {
        url.and_then(|url| self.pattern.captures(url))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| self.default_channel.clone())
    }
}

// ==================== Reconciliation ====================

/// Result of one successful pass
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub items: BTreeMap<String, InstalledItem>,
    pub artifacts: Vec<InstalledArtifact>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

pub struct Reconciler {
    source: Box<dyn InventorySource>,
    store: Arc<TrackingStore>,
    channels: ChannelParser,
    cache: Mutex<Snapshot>,
}

impl Reconciler {
    pub fn new(
        source: Box<dyn InventorySource>,
        store: Arc<TrackingStore>,
        channels: ChannelParser,
    ) -> Self {
        Self {
            source,
            store,
            channels,
            cache: Mutex::new(Snapshot::default()),
        }
    }

    /// Re-query the inventory and replace the cache.
    ///
    /// On failure the previous cache is kept and the cause is returned
    /// wrapped in `ReconciliationStale`. Returns the number of installed
    /// items on success.
    pub fn refresh(&self) -> ShelfResult<usize> {
        let result = self
            .source
            .profile_list()
            .and_then(|raw| self.reconcile(&raw));

        match result {
            Ok(snapshot) => {
                let count = snapshot.items.len();
                tracing::debug!(
                    items = count,
                    artifacts = snapshot.artifacts.len(),
                    "reconciled profile"
                );
                *lock_or_recover(&self.cache) = snapshot;
                Ok(count)
            }
            Err(e) => {
                tracing::warn!(error = %e, "reconciliation failed, keeping previous view");
                Err(ShelfError::ReconciliationStale(Box::new(e)))
            }
        }
    }

    /// Build a snapshot from raw inventory JSON without touching the cache
    pub fn reconcile(&self, raw: &str) -> ShelfResult<Snapshot> {
        let list: ProfileList =
            serde_json::from_str(raw).map_err(|e| ShelfError::parse("profile list", e))?;

        let mut artifacts = Vec::new();
        for (key, element) in list.elements.into_keyed() {
            match self.resolve(key, element) {
                Some(artifact) => artifacts.push(artifact),
                None => tracing::debug!("skipping profile element with no name"),
            }
        }

        let mut items: BTreeMap<String, InstalledItem> = BTreeMap::new();
        for artifact in &artifacts {
            let item = items
                .entry(artifact.name.clone())
                .or_insert_with(|| InstalledItem {
                    name: artifact.name.clone(),
                    version: artifact.version.clone(),
                    channel: artifact.channel.clone(),
                    provenance: artifact.provenance,
                    elements: Vec::new(),
                });
            if artifact.provenance == Provenance::Managed && !item.is_managed() {
                item.provenance = Provenance::Managed;
                item.channel = artifact.channel.clone();
            }
            item.elements.push(ElementRef {
                element_key: artifact.element_key.clone(),
                attr_path: artifact.attr_path.clone(),
            });
        }

        Ok(Snapshot {
            items,
            artifacts,
            refreshed_at: Some(Utc::now()),
        })
    }

    fn resolve(&self, element_key: String, element: ProfileElement) -> Option<InstalledArtifact> {
        let attr_path = element.attr_path.unwrap_or_default();

        let (name, version) = match element.store_paths.first() {
            Some(path) => derive_name_version(path),
            None => (attr_leaf(&attr_path).to_string(), String::new()),
        };
        if name.is_empty() {
            return None;
        }

        let origin_channel = self.channels.channel_from_url(element.original_url.as_deref());
        let (provenance, channel) = self.classify(&name, &attr_path, origin_channel);

        Some(InstalledArtifact {
            element_key,
            attr_path,
            name,
            version,
            channel,
            origin_url: element.original_url,
            provenance,
        })
    }

    /// Exact (name, channel) match first, then the name under any channel.
    /// The attribute leaf is tried the same way for packages whose attribute
    /// differs from their store name.
    fn classify(&self, name: &str, attr_path: &str, channel: String) -> (Provenance, String) {
        let leaf = attr_leaf(attr_path);
        let candidates = std::iter::once(name).chain((!leaf.is_empty() && leaf != name).then_some(leaf));

        for candidate in candidates {
            if self.store.is_tracked(candidate, &channel) {
                return (Provenance::Managed, channel);
            }
            if let Some(tracked) = self.store.find_channel_for_name(candidate) {
                return (Provenance::Managed, tracked);
            }
        }
        (Provenance::External, channel)
    }

    // ==================== Cache Reads ====================

    /// Installed items from the last successful pass, sorted by name
    pub fn items(&self) -> Vec<InstalledItem> {
        lock_or_recover(&self.cache).items.values().cloned().collect()
    }

    pub fn item(&self, name: &str) -> Option<InstalledItem> {
        lock_or_recover(&self.cache).items.get(name).cloned()
    }

    pub fn artifacts(&self) -> Vec<InstalledArtifact> {
        lock_or_recover(&self.cache).artifacts.clone()
    }

    /// Every artifact whose canonical name is `name`
    pub fn artifacts_for(&self, name: &str) -> Vec<InstalledArtifact> {
        lock_or_recover(&self.cache)
            .artifacts
            .iter()
            .filter(|a| a.name == name)
            .cloned()
            .collect()
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        lock_or_recover(&self.cache).refreshed_at
    }
}
