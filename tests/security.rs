//! Security tests for input validation and injection prevention

use nixshelf::{NixCli, NixConfig, NixSearch, SearchConfig, validate_channel, validate_package_name};

fn cli() -> NixCli {
    NixCli::new(NixConfig {
        experimental_features: false,
        ..NixConfig::default()
    })
}

// ==================== Package Name Validation ====================

#[test]
fn test_validate_package_name_valid() {
    assert!(validate_package_name("ripgrep").is_ok());
    assert!(validate_package_name("fd").is_ok());
    assert!(validate_package_name("tree-sitter").is_ok());
    assert!(validate_package_name("python312Packages.requests").is_ok());
    assert!(validate_package_name("gtk+3").is_ok());
}

#[test]
fn test_validate_package_name_shell_injection() {
    // Command substitution
    assert!(validate_package_name("$(rm -rf /)").is_err());
    assert!(validate_package_name("`rm -rf /`").is_err());

    // Semicolon injection
    assert!(validate_package_name("foo; rm -rf /").is_err());

    // Pipe injection
    assert!(validate_package_name("foo | cat /etc/passwd").is_err());

    // Ampersand injection
    assert!(validate_package_name("foo && rm -rf /").is_err());

    // Redirect injection
    assert!(validate_package_name("foo > /etc/passwd").is_err());

    // Newline injection
    assert!(validate_package_name("foo\nrm -rf /").is_err());
}

#[test]
fn test_validate_package_name_flake_injection() {
    // Would change which flake or output is installed
    assert!(validate_package_name("ripgrep#evil").is_err());
    assert!(validate_package_name("github:attacker/repo").is_err());
    assert!(validate_package_name("foo/bar").is_err());
    assert!(validate_package_name("foo?dir=x").is_err());

    // Would be parsed as a nix option
    assert!(validate_package_name("--impure").is_err());
    assert!(validate_package_name("-L").is_err());
}

#[test]
fn test_validate_package_name_edge_cases() {
    assert!(validate_package_name("").is_err());
    assert!(validate_package_name("   ").is_err());
    assert!(validate_package_name(" ripgrep").is_err());
    assert!(validate_package_name("../../../etc/passwd").is_err());
    assert!(validate_package_name("a..b").is_err());

    let max_name = "a".repeat(200);
    assert!(validate_package_name(&max_name).is_ok());
    assert!(validate_package_name(&"a".repeat(201)).is_err());
}

// ==================== Channel Validation ====================

#[test]
fn test_validate_channel() {
    assert!(validate_channel("nixos-unstable").is_ok());
    assert!(validate_channel("nixpkgs-24.11-darwin").is_ok());

    assert!(validate_channel("nixos-unstable#hello").is_err());
    assert!(validate_channel("../nixos").is_err());
    assert!(validate_channel("nixos unstable").is_err());
    assert!(validate_channel("-nixos").is_err());
}

// ==================== Argument Vectors ====================

#[test]
fn test_builders_reject_before_building() {
    assert!(cli().install_command("foo;bar", "nixos-unstable").is_err());
    assert!(cli().install_command("foo", "nixos;unstable").is_err());
    assert!(cli().remove_command(&["ok".to_string(), "$(id)".to_string()]).is_err());
    assert!(cli().run_command("hello", "nixos-unstable", "sh -c id", &[]).is_err());
}

#[test]
fn test_shell_command_line_stays_one_argument() {
    let cmd = cli()
        .shell_command("jq", "nixos-unstable", "echo a; echo b | tr a-z A-Z")
        .unwrap();
    assert_eq!(cmd.args.last().unwrap(), "echo a; echo b | tr a-z A-Z");
    assert_eq!(cmd.args.len(), 6);
}

#[test]
fn test_run_arguments_are_not_interpreted() {
    let args = vec!["$(id)".to_string(), "; rm -rf /".to_string()];
    let cmd = cli()
        .run_command("cowsay", "nixos-unstable", "cowsay", &args)
        .unwrap();
    assert_eq!(&cmd.args[cmd.args.len() - 2..], args.as_slice());
}

#[test]
fn test_search_query_cannot_be_an_option() {
    let search = NixSearch::new(SearchConfig::default());
    assert!(search.command("--channel=evil", "nixos-unstable", None).is_err());
    assert!(search.command("-j", "nixos-unstable", None).is_err());

    // Anything else is passed verbatim as one argument
    let cmd = search.command("foo; rm -rf /", "nixos-unstable", None).unwrap();
    assert_eq!(cmd.args.last().unwrap(), "foo; rm -rf /");
}
