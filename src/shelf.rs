//! The front-end facing surface
//!
//! `Shelf` owns the event bus, registry, runner, tracking store and
//! reconciler. A front end starts operations, subscribes to registry events,
//! cancels or dismisses records, and reads the reconciled view; it never
//! touches a process handle.
//!
//! Tracking follows confirmed outcomes only: an install is tracked when its
//! record completes, and entries are untracked when an uninstall completes.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::ShelfConfig;
use crate::error::{ShelfError, ShelfResult};
use crate::events::EventBus;
use crate::models::{
    InstalledArtifact, InstalledItem, Package, ProcessId, ProcessKind, ProcessRecord,
    ProcessStatus, Provenance, SearchResult, TrackingEntry, TrackingMetadata,
};
use crate::nix::{InventorySource, NixCli};
use crate::reconcile::{ChannelParser, Reconciler, attr_leaf};
use crate::registry::ProcessRegistry;
use crate::runner::{CommandRunner, FinishHook, RunHandle, SafeCommand};
use crate::search::NixSearch;
use crate::tracking::TrackingStore;

pub struct Shelf {
    bus: Arc<EventBus>,
    registry: Arc<ProcessRegistry>,
    runner: CommandRunner,
    store: Arc<TrackingStore>,
    reconciler: Arc<Reconciler>,
    nix: NixCli,
    search: NixSearch,
}

impl Shelf {
    /// Build a shelf that reads the inventory from the configured nix binary
    pub fn new(config: &ShelfConfig, store: TrackingStore) -> ShelfResult<Self> {
        let source = Box::new(NixCli::new(config.nix.clone()));
        Self::with_inventory(config, store, source)
    }

    /// Build a shelf with a custom inventory source
    pub fn with_inventory(
        config: &ShelfConfig,
        store: TrackingStore,
        source: Box<dyn InventorySource>,
    ) -> ShelfResult<Self> {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ProcessRegistry::new(Arc::clone(&bus)));
        let runner = CommandRunner::new(Arc::clone(&registry));
        let store = Arc::new(store);
        let channels = ChannelParser::new(&config.nix.registry, config.nix.default_channel.clone())?;
        let reconciler = Arc::new(Reconciler::new(source, Arc::clone(&store), channels));

        Ok(Self {
            bus,
            registry,
            runner,
            store,
            reconciler,
            nix: NixCli::new(config.nix.clone()),
            search: NixSearch::new(config.search.clone()),
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn nix(&self) -> &NixCli {
        &self.nix
    }

    pub fn default_channel(&self) -> &str {
        &self.nix.config().default_channel
    }

    fn channel_or_default(&self, channel: Option<&str>) -> String {
        channel.unwrap_or(self.default_channel()).to_string()
    }

    // ==================== Operations ====================

    /// Install `name` from `channel`, tracking it once the install completes
    pub fn install(
        &self,
        name: &str,
        channel: Option<&str>,
        metadata: TrackingMetadata,
    ) -> ShelfResult<RunHandle> {
        let channel = self.channel_or_default(channel);
        let cmd = self.nix.install_command(name, &channel)?;

        let store = Arc::clone(&self.store);
        let reconciler = Arc::clone(&self.reconciler);
        let (tracked_name, tracked_channel) = (name.to_string(), channel.clone());
        let hook: FinishHook = Box::new(move |status| {
            if status != ProcessStatus::Completed {
                return;
            }
            if let Err(e) = store.track(&tracked_name, &tracked_channel, metadata) {
                tracing::warn!(name = %tracked_name, error = %e, "install succeeded but tracking failed");
            }
            let _ = reconciler.refresh();
        });

        Ok(self.start(ProcessKind::Install, name, &channel, cmd, hook))
    }

    /// Remove every profile element that resolves to `name`.
    ///
    /// `name` may be the canonical name or the attribute name it was
    /// installed under. Uses the last reconciled view; call `refresh` first
    /// if the profile may have changed underneath.
    pub fn uninstall(&self, name: &str) -> ShelfResult<RunHandle> {
        let artifacts = self.artifacts_for(name);
        if artifacts.is_empty() {
            return Err(ShelfError::NotInstalled(name.to_string()));
        }

        let mut keys: Vec<String> = artifacts.iter().map(|a| a.element_key.clone()).collect();
        keys.dedup();
        let cmd = self.nix.remove_command(&keys)?;

        let to_untrack = self.tracked_pairs(&artifacts);
        let channel = artifacts[0].channel.clone();

        let store = Arc::clone(&self.store);
        let reconciler = Arc::clone(&self.reconciler);
        let hook: FinishHook = Box::new(move |status| {
            if status != ProcessStatus::Completed {
                return;
            }
            for (name, channel) in &to_untrack {
                if let Err(e) = store.untrack(name, channel) {
                    tracing::warn!(%name, %channel, error = %e, "uninstall succeeded but untracking failed");
                }
            }
            let _ = reconciler.refresh();
        });

        Ok(self.start(ProcessKind::Uninstall, name, &channel, cmd, hook))
    }

    /// Run `program` (default: the package name) from the package without installing it
    pub fn run(
        &self,
        name: &str,
        channel: Option<&str>,
        program: Option<&str>,
        args: &[String],
    ) -> ShelfResult<RunHandle> {
        let channel = self.channel_or_default(channel);
        let cmd = self
            .nix
            .run_command(name, &channel, program.unwrap_or(name), args)?;
        Ok(self.start(ProcessKind::Run, name, &channel, cmd, Box::new(|_| {})))
    }

    /// Run a shell command line with the package on PATH
    pub fn shell(
        &self,
        name: &str,
        channel: Option<&str>,
        command_line: &str,
    ) -> ShelfResult<RunHandle> {
        let channel = self.channel_or_default(channel);
        let cmd = self.nix.shell_command(name, &channel, command_line)?;
        Ok(self.start(ProcessKind::Shell, name, &channel, cmd, Box::new(|_| {})))
    }

    fn start(
        &self,
        kind: ProcessKind,
        name: &str,
        channel: &str,
        cmd: SafeCommand,
        hook: FinishHook,
    ) -> RunHandle {
        let id = self.registry.create(kind, name, channel);
        tracing::info!(%id, %kind, package = name, channel, "starting operation");
        self.runner.start(id, cmd, Some(hook))
    }

    pub fn cancel(&self, id: ProcessId) -> bool {
        self.runner.cancel(id)
    }

    /// Drop a finished record from the registry
    pub fn dismiss(&self, id: ProcessId) -> Option<ProcessRecord> {
        self.registry.remove(id)
    }

    pub fn clear_finished(&self) -> Vec<ProcessId> {
        self.registry.clear_finished()
    }

    pub fn records(&self) -> Vec<ProcessRecord> {
        self.registry.list()
    }

    pub fn record(&self, id: ProcessId) -> Option<ProcessRecord> {
        self.registry.get(id)
    }

    pub fn running_count(&self) -> usize {
        self.registry.running_count()
    }

    // ==================== Installed State ====================

    pub fn refresh(&self) -> ShelfResult<usize> {
        self.reconciler.refresh()
    }

    pub fn installed(&self) -> Vec<InstalledItem> {
        self.reconciler.items()
    }

    pub fn installed_item(&self, name: &str) -> Option<InstalledItem> {
        self.reconciler.item(name)
    }

    /// Provenance of an installed package, `None` if it isn't installed
    pub fn provenance(&self, name: &str) -> Option<Provenance> {
        self.reconciler.item(name).map(|item| item.provenance)
    }

    pub fn is_tracked(&self, name: &str, channel: &str) -> bool {
        self.store.is_tracked(name, channel)
    }

    pub fn tracked(&self) -> Vec<TrackingEntry> {
        self.store.entries()
    }

    /// Every known package: installed artifacts, then tracked entries with
    /// no artifact in the current view
    pub fn packages(&self) -> Vec<Package> {
        let artifacts = self.reconciler.artifacts();
        let installed: BTreeSet<(String, String)> = artifacts
            .iter()
            .filter(|a| a.provenance == Provenance::Managed)
            .flat_map(|a| {
                [
                    (a.name.clone(), a.channel.clone()),
                    (attr_leaf(&a.attr_path).to_string(), a.channel.clone()),
                ]
            })
            .collect();

        let mut packages: Vec<Package> = artifacts.into_iter().map(Package::Installed).collect();
        packages.extend(
            self.store
                .entries()
                .into_iter()
                .filter(|e| !installed.contains(&(e.name.clone(), e.channel.clone())))
                .map(Package::Tracked),
        );
        packages
    }

    pub fn search(
        &self,
        query: &str,
        channel: Option<&str>,
        limit: Option<usize>,
    ) -> ShelfResult<Vec<SearchResult>> {
        let channel = self.channel_or_default(channel);
        self.search.search(query, &channel, limit)
    }

    pub fn search_binary(&self) -> &str {
        self.search.binary()
    }

    /// Profile elements `name` resolves to: by canonical name, falling back
    /// to the attribute name
    pub fn artifacts_for(&self, name: &str) -> Vec<InstalledArtifact> {
        let by_name = self.reconciler.artifacts_for(name);
        if !by_name.is_empty() {
            return by_name;
        }
        self.reconciler
            .artifacts()
            .into_iter()
            .filter(|a| attr_leaf(&a.attr_path) == name)
            .collect()
    }

    /// (name, channel) tracking keys that these artifacts account for
    fn tracked_pairs(&self, artifacts: &[InstalledArtifact]) -> BTreeSet<(String, String)> {
        let mut pairs = BTreeSet::new();
        for artifact in artifacts {
            for candidate in [artifact.name.as_str(), attr_leaf(&artifact.attr_path)] {
                if self.store.is_tracked(candidate, &artifact.channel) {
                    pairs.insert((candidate.to_string(), artifact.channel.clone()));
                }
            }
        }
        pairs
    }
}
