use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a process record is doing to its package
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    Install,
    Uninstall,
    Run,
    Shell,
}

impl std::fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Uninstall => write!(f, "uninstall"),
            Self::Run => write!(f, "run"),
            Self::Shell => write!(f, "shell"),
        }
    }
}

/// Lifecycle of a process record
///
/// `Pending -> Running -> {Completed, Failed, Cancelled, Error}`. The four
/// right-hand states are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Error,
}

impl ProcessStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Error
        )
    }

    /// Whether moving from `self` to `next` follows the state machine
    pub fn can_transition_to(&self, next: ProcessStatus) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Opaque identifier of a process record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub(crate) u64);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

/// Where a log line came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputLineType {
    Stdout,
    Stderr,
    /// Emitted by the runner itself (command echo, exit summary, errors)
    Status,
}

/// A single line of process output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputLine {
    pub line_type: OutputLineType,
    pub content: String,
}

impl OutputLine {
    pub fn stdout(content: impl Into<String>) -> Self {
        Self {
            line_type: OutputLineType::Stdout,
            content: content.into(),
        }
    }

    pub fn stderr(content: impl Into<String>) -> Self {
        Self {
            line_type: OutputLineType::Stderr,
            content: content.into(),
        }
    }

    pub fn status(content: impl Into<String>) -> Self {
        Self {
            line_type: OutputLineType::Status,
            content: content.into(),
        }
    }
}

/// One user-initiated operation and everything observed about it
#[derive(Debug, Clone, Serialize)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub kind: ProcessKind,
    pub package: String,
    pub channel: String,
    pub status: ProcessStatus,
    pub log: Vec<OutputLine>,
    pub created_at: DateTime<Utc>,
    pub cancel_requested: bool,
    pub exit_code: Option<i32>,
}

impl ProcessRecord {
    pub fn new(
        id: ProcessId,
        kind: ProcessKind,
        package: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            id,
            kind,
            package: package.into(),
            channel: channel.into(),
            status: ProcessStatus::Pending,
            log: Vec::new(),
            created_at: Utc::now(),
            cancel_requested: false,
            exit_code: None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, ProcessStatus::Pending | ProcessStatus::Running)
    }
}

// ==================== Tracking ====================

/// Package metadata captured at install time
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackingMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_set: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub programs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl TrackingMetadata {
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_homepage(mut self, url: impl Into<String>) -> Self {
        self.homepage = Some(url.into());
        self
    }

    pub fn with_programs(mut self, programs: Vec<String>) -> Self {
        self.programs = Some(programs);
        self
    }
}

/// An install made by this tool, keyed by (name, channel)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackingEntry {
    #[serde(rename = "pname")]
    pub name: String,
    pub channel: String,
    pub installed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub metadata: TrackingMetadata,
}

impl TrackingEntry {
    pub fn new(name: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel: channel.into(),
            installed_at: Utc::now(),
            metadata: TrackingMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: TrackingMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Key used in the persisted file: `<name>::<channel>`
    pub fn key(&self) -> String {
        tracking_key(&self.name, &self.channel)
    }
}

pub fn tracking_key(name: &str, channel: &str) -> String {
    format!("{}::{}", name, channel)
}

// ==================== Installed state ====================

/// Whether an installed artifact was put there by this tool
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Managed,
    External,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Managed => write!(f, "managed"),
            Self::External => write!(f, "external"),
        }
    }
}

/// A profile element as seen by one reconciliation pass
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InstalledArtifact {
    pub element_key: String,
    pub attr_path: String,
    pub name: String,
    pub version: String,
    pub channel: String,
    pub origin_url: Option<String>,
    pub provenance: Provenance,
}

/// Reference from a canonical name to one profile element
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ElementRef {
    pub element_key: String,
    pub attr_path: String,
}

/// All profile elements that resolve to one canonical package name
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InstalledItem {
    pub name: String,
    pub version: String,
    pub channel: String,
    pub provenance: Provenance,
    pub elements: Vec<ElementRef>,
}

impl InstalledItem {
    pub fn is_managed(&self) -> bool {
        self.provenance == Provenance::Managed
    }

    pub fn element_keys(&self) -> Vec<String> {
        self.elements.iter().map(|e| e.element_key.clone()).collect()
    }
}

// ==================== Search ====================

/// A package returned by the search tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    #[serde(rename = "package_pname")]
    pub pname: String,
    #[serde(rename = "package_pversion", default)]
    pub version: String,
    #[serde(rename = "package_attr_name")]
    pub attr_name: String,
    #[serde(rename = "package_attr_set", default)]
    pub attr_set: String,
    #[serde(rename = "package_description", default)]
    pub description: Option<String>,
    #[serde(rename = "package_homepage", default)]
    pub homepage: Vec<String>,
    #[serde(rename = "package_license_set", default)]
    pub license_set: Vec<String>,
    #[serde(rename = "package_programs", default)]
    pub programs: Vec<String>,
    #[serde(rename = "package_position", default)]
    pub position: Option<String>,
}

/// A package as it crosses a boundary, carrying only what its origin knows
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Package {
    Search(SearchResult),
    Installed(InstalledArtifact),
    Tracked(TrackingEntry),
}

impl Package {
    pub fn name(&self) -> &str {
        match self {
            Self::Search(r) => &r.pname,
            Self::Installed(a) => &a.name,
            Self::Tracked(t) => &t.name,
        }
    }

    /// The channel, when the variant knows it
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Search(_) => None,
            Self::Installed(a) => Some(&a.channel),
            Self::Tracked(t) => Some(&t.channel),
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Search(r) => r.description.as_deref(),
            Self::Installed(_) => None,
            Self::Tracked(t) => t.metadata.description.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== ProcessStatus Tests ====================

    #[test]
    fn test_terminal_states() {
        assert!(!ProcessStatus::Pending.is_terminal());
        assert!(!ProcessStatus::Running.is_terminal());
        assert!(ProcessStatus::Completed.is_terminal());
        assert!(ProcessStatus::Failed.is_terminal());
        assert!(ProcessStatus::Cancelled.is_terminal());
        assert!(ProcessStatus::Error.is_terminal());
    }

    #[test]
    fn test_transitions_never_regress() {
        assert!(ProcessStatus::Pending.can_transition_to(ProcessStatus::Running));
        assert!(ProcessStatus::Pending.can_transition_to(ProcessStatus::Error));
        assert!(ProcessStatus::Running.can_transition_to(ProcessStatus::Cancelled));
        assert!(!ProcessStatus::Running.can_transition_to(ProcessStatus::Pending));
        assert!(!ProcessStatus::Completed.can_transition_to(ProcessStatus::Failed));
        assert!(!ProcessStatus::Cancelled.can_transition_to(ProcessStatus::Completed));
    }

    #[test]
    fn test_process_kind_display() {
        assert_eq!(ProcessKind::Install.to_string(), "install");
        assert_eq!(ProcessKind::Uninstall.to_string(), "uninstall");
        assert_eq!(ProcessKind::Shell.to_string(), "shell");
    }

    // ==================== Tracking Tests ====================

    #[test]
    fn test_tracking_entry_serializes_flat() {
        let entry = TrackingEntry::new("ripgrep", "nixos-unstable")
            .with_metadata(TrackingMetadata::default().with_description("grep, but fast"));

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["pname"], "ripgrep");
        assert_eq!(json["channel"], "nixos-unstable");
        assert_eq!(json["description"], "grep, but fast");
        assert!(json.get("homepage").is_none());
        assert!(json.get("metadata").is_none());
        assert_eq!(entry.key(), "ripgrep::nixos-unstable");
    }

    // ==================== Package Tests ====================

    #[test]
    fn test_package_accessors() {
        let tracked = Package::Tracked(TrackingEntry::new("fd", "nixos-24.11"));
        assert_eq!(tracked.name(), "fd");
        assert_eq!(tracked.channel(), Some("nixos-24.11"));

        let result: SearchResult = serde_json::from_str(
            r#"{"package_pname": "bat", "package_attr_name": "bat", "package_description": "cat clone"}"#,
        )
        .unwrap();
        let search = Package::Search(result);
        assert_eq!(search.name(), "bat");
        assert_eq!(search.channel(), None);
        assert_eq!(search.description(), Some("cat clone"));
    }
}
