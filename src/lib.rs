pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod nix;
pub mod reconcile;
pub mod registry;
pub mod runner;
pub mod search;
pub mod shelf;
pub mod ticker;
pub mod tracking;

pub use cli::{Cli, Commands, ConfigCommands};
pub use config::{NixConfig, SearchConfig, ShelfConfig, TrackingConfig};
pub use error::{ShelfError, ShelfResult};
pub use events::{Delivery, EventBus, RegistryEvent, SubscriptionId};
pub use models::{
    InstalledArtifact, InstalledItem, OutputLine, OutputLineType, Package, ProcessId,
    ProcessKind, ProcessRecord, ProcessStatus, Provenance, SearchResult, TrackingEntry,
    TrackingMetadata,
};
pub use nix::{InventorySource, NixCli, validate_channel, validate_package_name};
pub use reconcile::{ChannelParser, Reconciler, derive_name_version};
pub use registry::ProcessRegistry;
pub use runner::{CommandRunner, FinishHook, RunHandle, SafeCommand};
pub use search::NixSearch;
pub use shelf::Shelf;
pub use ticker::{ManualTicker, Tick, Ticker};
pub use tracking::TrackingStore;
pub use commands::{
    cmd_config_path, cmd_config_set, cmd_config_show, cmd_doctor, cmd_install, cmd_list,
    cmd_run, cmd_search, cmd_shell, cmd_tracked, cmd_uninstall, open_shelf,
};
