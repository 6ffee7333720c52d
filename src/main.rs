//! nixshelf CLI - install, trial-run and track Nix packages
//!
//! This file contains only CLI dispatch logic. All command implementations
//! are in the `commands/` module.

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use nixshelf::{
    Cli, Commands, ConfigCommands, ShelfConfig, cmd_config_path, cmd_config_set, cmd_config_show,
    cmd_doctor, cmd_install, cmd_list, cmd_run, cmd_search, cmd_shell, cmd_tracked,
    cmd_uninstall, open_shelf,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        // ============================================
        // COMMANDS THAT DON'T NEED NIX
        // ============================================
        Commands::Config(command) => match command {
            ConfigCommands::Show => cmd_config_show(),
            ConfigCommands::Set { key, value } => cmd_config_set(&key, &value),
            ConfigCommands::Path => cmd_config_path(),
        },

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }

        command => {
            let config = ShelfConfig::load()?;
            let shelf = open_shelf(&config)?;

            match command {
                // ============================================
                // OPERATIONS
                // ============================================
                Commands::Install {
                    names,
                    channel,
                    no_metadata,
                } => cmd_install(&shelf, &names, channel.as_deref(), !no_metadata),

                Commands::Uninstall { name, yes } => cmd_uninstall(&shelf, &name, yes),

                Commands::Run {
                    name,
                    channel,
                    bin,
                    cancel_after,
                    args,
                } => cmd_run(
                    &shelf,
                    &name,
                    channel.as_deref(),
                    bin.as_deref(),
                    &args,
                    cancel_after,
                ),

                Commands::Shell {
                    name,
                    channel,
                    command,
                    cancel_after,
                } => cmd_shell(&shelf, &name, channel.as_deref(), &command, cancel_after),

                // ============================================
                // VIEWS
                // ============================================
                Commands::List {
                    format,
                    external,
                    tracked,
                } => cmd_list(&shelf, &format, external, tracked),

                Commands::Tracked { format } => cmd_tracked(&shelf, &format),

                Commands::Search {
                    query,
                    channel,
                    limit,
                    format,
                } => cmd_search(&shelf, &query, channel.as_deref(), limit, &format),

                Commands::Doctor => cmd_doctor(&config, &shelf),

                Commands::Config(_) | Commands::Completions { .. } => Ok(()),
            }
        }
    }
}

/// Logs go to stderr so they never mix with command output
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nixshelf={level}")));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
