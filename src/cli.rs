use clap::{ArgAction, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "nixshelf")]
#[command(about = "Install, trial-run and track Nix packages with live progress")]
#[command(version)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace; RUST_LOG overrides)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install packages into the user profile
    Install {
        /// Package attribute names (e.g., ripgrep, python3Packages.black)
        #[arg(required = true)]
        names: Vec<String>,

        /// Channel to install from (defaults to nix.default_channel)
        #[arg(short, long)]
        channel: Option<String>,

        /// Don't look up package metadata before installing
        #[arg(long)]
        no_metadata: bool,
    },

    /// Remove a package from the user profile
    Uninstall {
        /// Canonical or attribute name
        name: String,

        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Run a program from a package without installing it
    Run {
        /// Package attribute name
        name: String,

        /// Channel to run from
        #[arg(short, long)]
        channel: Option<String>,

        /// Program to run (defaults to the package name)
        #[arg(short, long)]
        bin: Option<String>,

        /// Cancel the run after this many seconds
        #[arg(long, value_name = "SECS")]
        cancel_after: Option<u64>,

        /// Arguments passed to the program
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Run a shell command line with a package available
    Shell {
        /// Package attribute name
        name: String,

        /// Channel to take the package from
        #[arg(short, long)]
        channel: Option<String>,

        /// Command line to run
        #[arg(short = 'C', long)]
        command: String,

        /// Cancel the command after this many seconds
        #[arg(long, value_name = "SECS")]
        cancel_after: Option<u64>,
    },

    /// List packages installed in the profile
    List {
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,

        /// Show only packages installed outside nixshelf
        #[arg(long, conflicts_with = "tracked")]
        external: bool,

        /// Show only packages installed by nixshelf
        #[arg(long)]
        tracked: bool,
    },

    /// Show installs recorded by nixshelf
    Tracked {
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Search packages in a channel
    Search {
        /// Search query
        query: String,

        /// Channel to search
        #[arg(short, long)]
        channel: Option<String>,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Check nix, the search tool and the tracking file
    Doctor,

    /// Show or change configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Set a configuration value (e.g., nix.default_channel nixos-24.11)
    Set {
        /// Dotted key
        key: String,

        /// New value (empty string clears optional paths)
        value: String,
    },

    /// Print the config file location
    Path,
}
