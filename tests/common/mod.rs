//! Common test utilities

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use nixshelf::{
    NixConfig, ProcessId, RegistryEvent, Shelf, ShelfConfig, TrackingMetadata, TrackingStore,
};
use tempfile::TempDir;

/// Fake `nix` speaking just enough of the CLI contract.
///
/// Profile state lives in `<state>/elements/<key>`: line 1 is the store
/// path, line 2 the channel. `<state>/fail-<name>` makes installs of `name`
/// fail; `<state>/slow` holds seconds to sleep before add/remove.
const FAKE_NIX: &str = r#"#!/bin/sh
DIR="__STATE__"
if [ "$1" = "--extra-experimental-features" ]; then shift 2; fi
case "$1 $2" in
  "profile list")
    if [ -f "$DIR/broken" ]; then echo "error: profile is locked" >&2; exit 1; fi
    printf '{"version":3,"elements":{'
    sep=""
    for f in "$DIR"/elements/*; do
      [ -e "$f" ] || continue
      key=$(basename "$f")
      printf '%s"%s":{"storePaths":["%s"],"attrPath":"legacyPackages.x86_64-linux.%s","originalUrl":"flake:nixpkgs/%s"}' \
        "$sep" "$key" "$(sed -n 1p "$f")" "$key" "$(sed -n 2p "$f")"
      sep=","
    done
    printf '}}\n'
    ;;
  "profile add"|"profile install")
    ref="$3"
    name="${ref#*#}"
    rest="${ref%%#*}"
    channel="${rest#*/}"
    echo "fetching $ref"
    if [ -f "$DIR/slow" ]; then sleep "$(cat "$DIR/slow")"; fi
    if [ -f "$DIR/fail-$name" ]; then
      echo "building '$name'..." >&2
      echo "error: cannot build derivation for $name" >&2
      exit 1
    fi
    mkdir -p "$DIR/elements"
    printf '/nix/store/00000000000000000000000000000000-%s-1.0.0\n%s\n' "$name" "$channel" > "$DIR/elements/$name"
    echo "installed $name"
    ;;
  "profile remove")
    shift 2
    if [ -f "$DIR/slow" ]; then sleep "$(cat "$DIR/slow")"; fi
    for key in "$@"; do
      rm -f "$DIR/elements/$key"
      echo "removed $key"
    done
    ;;
  shell*)
    shift 3
    exec "$@"
    ;;
  *)
    echo "error: unsupported fake nix call: $*" >&2
    exit 2
    ;;
esac
"#;

/// Test context with a temporary tracking file and a fake nix binary
pub struct TestContext {
    pub dir: TempDir,
    pub state: PathBuf,
    pub config: ShelfConfig,
}

impl TestContext {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let state = dir.path().join("state");
        std::fs::create_dir_all(state.join("elements")).expect("Failed to create state dir");

        let script = dir.path().join("nix");
        write_executable(&script, &FAKE_NIX.replace("__STATE__", &state.to_string_lossy()));

        let mut config = ShelfConfig::default();
        config.nix = NixConfig {
            binary: script.to_string_lossy().into_owned(),
            experimental_features: false,
            ..NixConfig::default()
        };
        config.search.binary = dir
            .path()
            .join("no-such-search-tool")
            .to_string_lossy()
            .into_owned();
        config.tracking.path = Some(dir.path().join("tracked.json"));

        TestContext { dir, state, config }
    }

    pub fn tracking_path(&self) -> PathBuf {
        self.dir.path().join("tracked.json")
    }

    pub fn shelf(&self) -> Shelf {
        let store = TrackingStore::open(self.tracking_path());
        Shelf::new(&self.config, store).expect("Failed to build shelf")
    }

    /// Put an element in the profile as if installed outside nixshelf
    pub fn add_element(&self, key: &str, name_version: &str, channel: &str) {
        std::fs::write(
            self.state.join("elements").join(key),
            format!(
                "/nix/store/00000000000000000000000000000000-{}\n{}\n",
                name_version, channel
            ),
        )
        .expect("Failed to write element");
    }

    pub fn has_element(&self, key: &str) -> bool {
        self.state.join("elements").join(key).exists()
    }

    pub fn set_slow(&self, seconds: u32) {
        std::fs::write(self.state.join("slow"), seconds.to_string()).expect("Failed to write flag");
    }

    pub fn fail_install_of(&self, name: &str) {
        std::fs::write(self.state.join(format!("fail-{}", name)), "").expect("Failed to write flag");
    }

    pub fn break_profile_list(&self) {
        std::fs::write(self.state.join("broken"), "").expect("Failed to write flag");
    }

    /// Track directly in the store file, bypassing an install
    pub fn track(&self, name: &str, channel: &str) {
        TrackingStore::open(self.tracking_path())
            .track(name, channel, TrackingMetadata::default())
            .expect("Failed to track");
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

fn write_executable(path: &Path, content: &str) {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let mut file = std::fs::File::create(path).expect("Failed to create script");
    file.write_all(content.as_bytes()).expect("Failed to write script");
    file.sync_all().expect("Failed to sync script");
    drop(file);

    let mut perms = std::fs::metadata(path).expect("Failed to stat script").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).expect("Failed to chmod script");
}

/// Block until `rx` delivers a log line for `id` containing `needle`
pub fn wait_for_line(rx: &Receiver<RegistryEvent>, id: ProcessId, needle: &str) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(remaining) {
            Ok(RegistryEvent::LogAppended { id: line_id, line })
                if line_id == id && line.content.contains(needle) =>
            {
                return true;
            }
            Ok(_) => {}
            Err(_) => return false,
        }
    }
    false
}
