//! End-to-end tests of the shelf facade against a fake nix binary

#![cfg(unix)]

mod common;

use common::TestContext;
use nixshelf::{
    OutputLineType, Package, ProcessKind, ProcessStatus, Provenance, ShelfError, TrackingMetadata,
    TrackingStore, cmd_install,
};

// ==================== Install Tests ====================

#[test]
fn test_completed_install_is_tracked_and_managed() {
    let ctx = TestContext::new();
    let shelf = ctx.shelf();

    let metadata = TrackingMetadata::default().with_description("recursive grep");
    let handle = shelf.install("ripgrep", None, metadata).unwrap();
    let id = handle.id();
    assert_eq!(handle.wait(), ProcessStatus::Completed);

    assert!(shelf.is_tracked("ripgrep", "nixos-unstable"));
    assert!(ctx.has_element("ripgrep"));

    // The finish hook refreshed the view
    let item = shelf.installed_item("ripgrep").unwrap();
    assert_eq!(item.provenance, Provenance::Managed);
    assert_eq!(item.version, "1.0.0");

    let record = shelf.record(id).unwrap();
    assert_eq!(record.kind, ProcessKind::Install);
    assert!(record.log.iter().any(|l| l.content == "installed ripgrep"));

    // Persisted with metadata
    let reloaded = TrackingStore::open(ctx.tracking_path());
    let entry = reloaded.get("ripgrep", "nixos-unstable").unwrap();
    assert_eq!(entry.metadata.description.as_deref(), Some("recursive grep"));
}

#[test]
fn test_failed_install_is_not_tracked() {
    let ctx = TestContext::new();
    ctx.fail_install_of("broken");
    let shelf = ctx.shelf();

    let handle = shelf
        .install("broken", Some("nixos-24.11"), TrackingMetadata::default())
        .unwrap();
    let id = handle.id();
    assert_eq!(handle.wait(), ProcessStatus::Failed);

    assert!(!shelf.is_tracked("broken", "nixos-24.11"));
    let record = shelf.record(id).unwrap();
    assert_eq!(record.exit_code, Some(1));
    let last = record.log.last().unwrap();
    assert_eq!(last.line_type, OutputLineType::Stderr);
    assert!(last.content.contains("cannot build derivation for broken"));
}

#[test]
fn test_invalid_name_creates_no_record() {
    let ctx = TestContext::new();
    let shelf = ctx.shelf();

    let result = shelf.install("foo; rm -rf ~", None, TrackingMetadata::default());
    assert!(matches!(result, Err(ShelfError::InvalidName { .. })));
    assert!(shelf.records().is_empty());
}

#[test]
fn test_concurrent_installs_all_finish() {
    let ctx = TestContext::new();
    let shelf = ctx.shelf();

    let handles: Vec<_> = ["bat", "fd", "jq", "htop"]
        .iter()
        .map(|name| shelf.install(name, None, TrackingMetadata::default()).unwrap())
        .collect();
    for handle in handles {
        assert_eq!(handle.wait(), ProcessStatus::Completed);
    }

    assert_eq!(shelf.tracked().len(), 4);
    for record in shelf.records() {
        assert_eq!(record.status, ProcessStatus::Completed);
        assert!(record
            .log
            .iter()
            .all(|l| l.content.contains(&record.package)));
    }
}

#[test]
fn test_cli_install_reinstalls_stale_tracking_entry() {
    let ctx = TestContext::new();
    // Tracked, but removed from the profile outside nixshelf
    ctx.track("jq", "nixos-unstable");
    let shelf = ctx.shelf();

    cmd_install(&shelf, &["jq".to_string()], None, false).unwrap();

    assert!(ctx.has_element("jq"));
    assert!(shelf.is_tracked("jq", "nixos-unstable"));
    let records = shelf.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, ProcessKind::Install);
    assert_eq!(records[0].status, ProcessStatus::Completed);
    assert_eq!(shelf.provenance("jq"), Some(Provenance::Managed));
}

#[test]
fn test_cli_install_skips_tracked_and_present() {
    let ctx = TestContext::new();
    ctx.add_element("jq", "jq-1.7.1", "nixos-unstable");
    ctx.track("jq", "nixos-unstable");
    let shelf = ctx.shelf();

    cmd_install(&shelf, &["jq".to_string()], None, false).unwrap();

    assert!(shelf.records().is_empty());
    assert_eq!(shelf.installed_item("jq").unwrap().version, "1.7.1");
}

// ==================== Uninstall Tests ====================

#[test]
fn test_completed_uninstall_untracks() {
    let ctx = TestContext::new();
    ctx.add_element("jq", "jq-1.7.1", "nixos-unstable");
    ctx.track("jq", "nixos-unstable");
    let shelf = ctx.shelf();
    shelf.refresh().unwrap();

    assert_eq!(shelf.uninstall("jq").unwrap().wait(), ProcessStatus::Completed);

    assert!(!ctx.has_element("jq"));
    assert!(!shelf.is_tracked("jq", "nixos-unstable"));
    assert!(shelf.installed_item("jq").is_none());
}

#[test]
fn test_cancelled_uninstall_keeps_tracking() {
    let ctx = TestContext::new();
    ctx.add_element("jq", "jq-1.7.1", "nixos-unstable");
    ctx.track("jq", "nixos-unstable");
    ctx.set_slow(10);
    let shelf = ctx.shelf();
    shelf.refresh().unwrap();

    let handle = shelf.uninstall("jq").unwrap();
    let id = handle.id();
    // Cancel while the fake nix is still sleeping
    std::thread::sleep(std::time::Duration::from_millis(200));
    assert!(shelf.cancel(id));
    assert_eq!(handle.wait(), ProcessStatus::Cancelled);

    assert!(shelf.is_tracked("jq", "nixos-unstable"));
    assert!(ctx.has_element("jq"));
    let reloaded = TrackingStore::open(ctx.tracking_path());
    assert!(reloaded.is_tracked("jq", "nixos-unstable"));
}

#[test]
fn test_uninstall_removes_every_element_of_a_name() {
    let ctx = TestContext::new();
    ctx.add_element("ripgrep", "ripgrep-14.1.0", "nixos-unstable");
    ctx.add_element("ripgrep-1", "ripgrep-14.1.0", "nixos-24.11");
    ctx.add_element("fd", "fd-10.1.0", "nixos-unstable");
    let shelf = ctx.shelf();
    shelf.refresh().unwrap();

    assert_eq!(shelf.installed_item("ripgrep").unwrap().elements.len(), 2);
    assert_eq!(
        shelf.uninstall("ripgrep").unwrap().wait(),
        ProcessStatus::Completed
    );

    assert!(!ctx.has_element("ripgrep"));
    assert!(!ctx.has_element("ripgrep-1"));
    assert!(ctx.has_element("fd"));
}

#[test]
fn test_uninstall_unknown_name() {
    let ctx = TestContext::new();
    let shelf = ctx.shelf();
    shelf.refresh().unwrap();

    assert!(matches!(
        shelf.uninstall("nothing"),
        Err(ShelfError::NotInstalled(name)) if name == "nothing"
    ));
    assert!(shelf.records().is_empty());
}

// ==================== Provenance Tests ====================

#[test]
fn test_external_package_is_reported_external() {
    let ctx = TestContext::new();
    ctx.add_element("htop", "htop-3.3.0", "nixos-24.05");
    let shelf = ctx.shelf();

    assert_eq!(shelf.refresh().unwrap(), 1);
    assert_eq!(shelf.provenance("htop"), Some(Provenance::External));
    assert_eq!(shelf.installed_item("htop").unwrap().channel, "nixos-24.05");
    assert_eq!(shelf.provenance("missing"), None);
}

#[test]
fn test_tracked_under_other_channel_corrects_channel() {
    let ctx = TestContext::new();
    ctx.add_element("ripgrep", "ripgrep-14.1.0", "nixos-unstable");
    ctx.track("ripgrep", "nixos-24.11");
    let shelf = ctx.shelf();
    shelf.refresh().unwrap();

    let item = shelf.installed_item("ripgrep").unwrap();
    assert_eq!(item.provenance, Provenance::Managed);
    assert_eq!(item.channel, "nixos-24.11");
}

#[test]
fn test_packages_lists_tracked_but_missing() {
    let ctx = TestContext::new();
    ctx.add_element("bat", "bat-0.24.0", "nixos-unstable");
    ctx.track("bat", "nixos-unstable");
    ctx.track("gone", "nixos-unstable");
    let shelf = ctx.shelf();
    shelf.refresh().unwrap();

    let packages = shelf.packages();
    assert_eq!(packages.len(), 2);
    assert!(matches!(&packages[0], Package::Installed(a) if a.name == "bat"));
    assert!(matches!(&packages[1], Package::Tracked(t) if t.name == "gone"));
}

#[test]
fn test_failed_refresh_keeps_previous_view() {
    let ctx = TestContext::new();
    ctx.add_element("bat", "bat-0.24.0", "nixos-unstable");
    let shelf = ctx.shelf();
    shelf.refresh().unwrap();

    ctx.break_profile_list();
    assert!(matches!(
        shelf.refresh(),
        Err(ShelfError::ReconciliationStale(_))
    ));
    assert!(shelf.installed_item("bat").is_some());
}

// ==================== Run and Shell Tests ====================

#[test]
fn test_shell_runs_command_line() {
    let ctx = TestContext::new();
    let shelf = ctx.shelf();

    let handle = shelf
        .shell("hello", None, "echo from-shell; echo warn >&2")
        .unwrap();
    let id = handle.id();
    assert_eq!(handle.wait(), ProcessStatus::Completed);

    let record = shelf.record(id).unwrap();
    assert_eq!(record.kind, ProcessKind::Shell);
    assert!(record
        .log
        .iter()
        .any(|l| l.line_type == OutputLineType::Stdout && l.content == "from-shell"));
    assert!(record
        .log
        .iter()
        .any(|l| l.line_type == OutputLineType::Stderr && l.content == "warn"));
    // Nothing is tracked for a trial run
    assert!(shelf.tracked().is_empty());
}

#[test]
fn test_run_passes_arguments() {
    let ctx = TestContext::new();
    let shelf = ctx.shelf();

    let args = vec!["a b".to_string(), "$HOME".to_string()];
    let handle = shelf.run("coreutils", None, Some("echo"), &args).unwrap();
    let id = handle.id();
    assert_eq!(handle.wait(), ProcessStatus::Completed);
    assert_eq!(shelf.record(id).unwrap().log[0].content, "a b $HOME");
}

// ==================== Registry Tests ====================

#[test]
fn test_dismiss_and_clear_finished() {
    let ctx = TestContext::new();
    let shelf = ctx.shelf();

    let first = shelf.shell("hello", None, "true").unwrap();
    let first_id = first.id();
    first.wait();
    let second = shelf.shell("hello", None, "false").unwrap();
    second.wait();

    assert_eq!(shelf.records().len(), 2);
    assert!(shelf.dismiss(first_id).is_some());
    assert_eq!(shelf.records().len(), 1);
    assert_eq!(shelf.clear_finished().len(), 1);
    assert!(shelf.records().is_empty());
    assert_eq!(shelf.running_count(), 0);
}
