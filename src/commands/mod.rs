//! Command implementations for the nixshelf CLI
//!
//! Each submodule handles a group of related commands.

pub mod config;
pub mod helpers;
pub mod install;
pub mod list;
pub mod misc;
pub mod progress;

pub use config::{cmd_config_path, cmd_config_set, cmd_config_show};
pub use helpers::open_shelf;
pub use install::{cmd_install, cmd_run, cmd_shell, cmd_uninstall};
pub use list::{cmd_list, cmd_search, cmd_tracked};
pub use misc::cmd_doctor;
