//! The nix command-line contract
//!
//! Builds argument vectors for every nix invocation the tool makes. Names
//! and channels are validated before they reach an argv; nothing is ever
//! passed through a shell except the user's own `shell --command` line.

use std::process::Command;

use crate::config::NixConfig;
use crate::error::{ShelfError, ShelfResult};
use crate::runner::SafeCommand;

// ==================== Input Validation ====================

fn invalid(kind: &'static str, value: &str, reason: &'static str) -> ShelfError {
    ShelfError::InvalidName {
        kind,
        value: value.to_string(),
        reason,
    }
}

fn validate_token(kind: &'static str, value: &str, extra: &[char]) -> ShelfResult<()> {
    if value.is_empty() {
        return Err(invalid(kind, value, "cannot be empty"));
    }
    if value.len() > 200 {
        return Err(invalid(kind, value, "too long (max 200 characters)"));
    }
    if value.starts_with('-') {
        return Err(invalid(kind, value, "cannot start with '-'"));
    }
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || extra.contains(&c));
    if !valid {
        return Err(invalid(kind, value, "contains invalid characters"));
    }
    if value.contains("..") {
        return Err(invalid(kind, value, "cannot contain '..'"));
    }
    Ok(())
}

/// Validate a package attribute name (`ripgrep`, `python3Packages.black`, `gtk+3`)
pub fn validate_package_name(name: &str) -> ShelfResult<()> {
    validate_token("package name", name, &['.', '+'])
}

/// Validate a channel name (`nixos-unstable`, `nixos-24.11`)
pub fn validate_channel(channel: &str) -> ShelfResult<()> {
    validate_token("channel", channel, &['.'])
}

// ==================== Command Generation ====================

/// Reads the current profile inventory as raw JSON
///
/// Seam between the reconciler and the nix binary.
pub trait InventorySource: Send + Sync {
    fn profile_list(&self) -> ShelfResult<String>;
}

#[derive(Debug, Clone)]
pub struct NixCli {
    config: NixConfig,
}

impl NixCli {
    pub fn new(config: NixConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NixConfig {
        &self.config
    }

    /// `<registry>/<channel>#<name>`
    pub fn flake_ref(&self, name: &str, channel: &str) -> ShelfResult<String> {
        validate_package_name(name)?;
        validate_channel(channel)?;
        Ok(format!("{}/{}#{}", self.config.registry, channel, name))
    }

    fn command(&self, args: Vec<String>) -> SafeCommand {
        let mut full = Vec::with_capacity(args.len() + 2);
        if self.config.experimental_features {
            full.push("--extra-experimental-features".to_string());
            full.push("nix-command flakes".to_string());
        }
        full.extend(args);
        SafeCommand::new(self.config.binary.clone(), full)
    }

    pub fn install_command(&self, name: &str, channel: &str) -> ShelfResult<SafeCommand> {
        let flake = self.flake_ref(name, channel)?;
        Ok(self.command(vec![
            "profile".into(),
            self.config.install_verb.clone(),
            flake,
        ]))
    }

    /// `profile remove` for one or more element keys
    pub fn remove_command(&self, element_keys: &[String]) -> ShelfResult<SafeCommand> {
        if element_keys.is_empty() {
            return Err(invalid("element key", "", "nothing to remove"));
        }
        for key in element_keys {
            validate_package_name(key)?;
        }
        let mut args = vec!["profile".to_string(), "remove".to_string()];
        args.extend(element_keys.iter().cloned());
        Ok(self.command(args))
    }

    /// Run `program` from the package without installing it
    pub fn run_command(
        &self,
        name: &str,
        channel: &str,
        program: &str,
        args: &[String],
    ) -> ShelfResult<SafeCommand> {
        let flake = self.flake_ref(name, channel)?;
        validate_package_name(program)?;
        let mut full = vec![
            "shell".to_string(),
            flake,
            "--command".to_string(),
            program.to_string(),
        ];
        full.extend(args.iter().cloned());
        Ok(self.command(full))
    }

    /// Run a shell command line with the package available
    pub fn shell_command(
        &self,
        name: &str,
        channel: &str,
        command_line: &str,
    ) -> ShelfResult<SafeCommand> {
        let flake = self.flake_ref(name, channel)?;
        Ok(self.command(vec![
            "shell".into(),
            flake,
            "--command".into(),
            "sh".into(),
            "-c".into(),
            command_line.to_string(),
        ]))
    }

    pub fn profile_list_command(&self) -> SafeCommand {
        self.command(vec!["profile".into(), "list".into(), "--json".into()])
    }

    /// `nix --version`, for diagnostics
    pub fn version(&self) -> Option<String> {
        let output = Command::new(&self.config.binary)
            .arg("--version")
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|s| s.trim().to_string())
    }
}

impl InventorySource for NixCli {
    fn profile_list(&self) -> ShelfResult<String> {
        let cmd = self.profile_list_command();
        tracing::debug!(command = %cmd, "querying profile inventory");
        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .output()
            .map_err(|source| ShelfError::Spawn {
                program: cmd.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ShelfError::Execution {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> NixCli {
        NixCli::new(NixConfig {
            experimental_features: false,
            ..NixConfig::default()
        })
    }

    // ==================== Validation Tests ====================

    #[test]
    fn test_validate_package_name_valid() {
        assert!(validate_package_name("ripgrep").is_ok());
        assert!(validate_package_name("python3Packages.black").is_ok());
        assert!(validate_package_name("gtk+3").is_ok());
        assert!(validate_package_name("home-manager_path").is_ok());
    }

    #[test]
    fn test_validate_package_name_rejects_injection() {
        assert!(validate_package_name("").is_err());
        assert!(validate_package_name("foo; rm -rf /").is_err());
        assert!(validate_package_name("$(whoami)").is_err());
        assert!(validate_package_name("foo#bar").is_err());
        assert!(validate_package_name("--impure").is_err());
        assert!(validate_package_name("a..b").is_err());
        assert!(validate_package_name(&"x".repeat(201)).is_err());
    }

    #[test]
    fn test_validate_channel() {
        assert!(validate_channel("nixos-unstable").is_ok());
        assert!(validate_channel("nixos-24.11").is_ok());
        assert!(validate_channel("nixos/unstable").is_err());
        assert!(validate_channel("gtk+3").is_err());
    }

    // ==================== Command Tests ====================

    #[test]
    fn test_install_command() {
        let cmd = cli().install_command("ripgrep", "nixos-unstable").unwrap();
        assert_eq!(cmd.program, "nix");
        assert_eq!(cmd.args, vec!["profile", "add", "nixpkgs/nixos-unstable#ripgrep"]);
    }

    #[test]
    fn test_install_verb_is_configurable() {
        let cli = NixCli::new(NixConfig {
            install_verb: "install".to_string(),
            experimental_features: false,
            ..NixConfig::default()
        });
        let cmd = cli.install_command("jq", "nixos-24.11").unwrap();
        assert_eq!(cmd.args[1], "install");
    }

    #[test]
    fn test_experimental_features_prefix() {
        let cmd = NixCli::new(NixConfig::default()).profile_list_command();
        assert_eq!(
            cmd.args,
            vec![
                "--extra-experimental-features",
                "nix-command flakes",
                "profile",
                "list",
                "--json"
            ]
        );
    }

    #[test]
    fn test_remove_command() {
        let keys = vec!["ripgrep".to_string(), "ripgrep-1".to_string()];
        let cmd = cli().remove_command(&keys).unwrap();
        assert_eq!(cmd.args, vec!["profile", "remove", "ripgrep", "ripgrep-1"]);
        assert!(cli().remove_command(&[]).is_err());
    }

    #[test]
    fn test_run_and_shell_commands() {
        let run = cli()
            .run_command("cowsay", "nixos-unstable", "cowsay", &["moo".to_string()])
            .unwrap();
        assert_eq!(
            run.args,
            vec!["shell", "nixpkgs/nixos-unstable#cowsay", "--command", "cowsay", "moo"]
        );

        let shell = cli()
            .shell_command("jq", "nixos-unstable", "jq --version")
            .unwrap();
        assert_eq!(
            shell.args,
            vec!["shell", "nixpkgs/nixos-unstable#jq", "--command", "sh", "-c", "jq --version"]
        );
    }

    #[test]
    fn test_flake_ref_rejects_bad_input() {
        assert!(cli().flake_ref("rip grep", "nixos-unstable").is_err());
        assert!(cli().flake_ref("ripgrep", "nixos unstable").is_err());
    }
}
