//! Core types for host convergence

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::process::Output;

use crate::error::ConvergeError;

/// Kind of a managed resource.
///
/// Declaration order is plan order: a resource of one kind is never
/// scheduled before a resource of a kind declared above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// One-time package index refresh
    PackageIndex,
    Package,
    UserGroup,
    Directory,
    DatabaseRole,
    Database,
    EnvFile,
    /// Source tree checkout plus deploy hooks (precondition for services)
    Deployment,
    ServiceUnit,
    ProxySite,
}

impl ResourceKind {
    /// Position in the fixed dependency chain
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Short label used in reports and target filters
    pub fn label(self) -> &'static str {
        match self {
            Self::PackageIndex => "package_index",
            Self::Package => "package",
            Self::UserGroup => "user_group",
            Self::Directory => "directory",
            Self::DatabaseRole => "database_role",
            Self::Database => "database",
            Self::EnvFile => "env_file",
            Self::Deployment => "deployment",
            Self::ServiceUnit => "service_unit",
            Self::ProxySite => "proxy_site",
        }
    }

    /// Human-readable plural heading
    pub fn heading(self) -> &'static str {
        match self {
            Self::PackageIndex => "Package index",
            Self::Package => "Packages",
            Self::UserGroup => "Users and groups",
            Self::Directory => "Directories",
            Self::DatabaseRole => "Database roles",
            Self::Database => "Databases",
            Self::EnvFile => "Environment files",
            Self::Deployment => "Deployment",
            Self::ServiceUnit => "Service units",
            Self::ProxySite => "Proxy sites",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Attribute map with deterministic ordering
pub type Attributes = BTreeMap<String, String>;

/// Declaration of one desired resource. Immutable once planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    /// Unique within `kind` (package name, unit name, path, ...)
    pub identity_key: String,
    pub desired: Attributes,
}

impl ResourceSpec {
    pub fn new(kind: ResourceKind, identity_key: impl Into<String>) -> Self {
        Self {
            kind,
            identity_key: identity_key.into(),
            desired: Attributes::new(),
        }
    }

    /// Builder-style desired attribute
    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.desired.insert(key.to_string(), value.into());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.desired.get(key).map(String::as_str)
    }
}

impl fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.identity_key)
    }
}

/// Observed state of a resource, produced fresh on every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub exists: bool,
    pub observed: Attributes,
    /// Fields whose observed value differs from the desired one
    pub drifted: BTreeSet<String>,
}

impl ProbeResult {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn present() -> Self {
        Self {
            exists: true,
            ..Self::default()
        }
    }

    /// State after a failed inspection: treated as absent by the engine
    pub fn unknown() -> Self {
        Self::absent().with_observed("state", "unknown")
    }

    pub fn with_observed(mut self, key: &str, value: impl Into<String>) -> Self {
        self.observed.insert(key.to_string(), value.into());
        self
    }

    pub fn with_drift(mut self, field: &str) -> Self {
        self.drifted.insert(field.to_string());
        self
    }

    /// Record `field` as drifted when `observed != desired`
    pub fn compare(mut self, field: &str, observed: &str, desired: &str) -> Self {
        self.observed.insert(field.to_string(), observed.to_string());
        if observed != desired {
            self.drifted.insert(field.to_string());
        }
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.observed.get("state").is_some_and(|s| s == "unknown")
    }

    /// Present with no drift
    pub fn is_converged(&self) -> bool {
        self.exists && self.drifted.is_empty()
    }

    pub fn drift_list(&self) -> String {
        self.drifted.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Top-level engine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Install,
    Status,
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => f.write_str("install"),
            Self::Status => f.write_str("status"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

/// Outcome of one resource in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Skipped,
    Created,
    Updated,
    Removed,
    Failed,
}

impl Action {
    pub fn is_change(self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Removed)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Skipped => "skipped",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Removed => "removed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-resource outcome recorded by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRecord {
    pub kind: ResourceKind,
    pub identity_key: String,
    pub action: Action,
    pub reason: String,
}

impl ExecutionRecord {
    pub fn new(spec: &ResourceSpec, action: Action, reason: impl Into<String>) -> Self {
        Self {
            kind: spec.kind,
            identity_key: spec.identity_key.clone(),
            action,
            reason: reason.into(),
        }
    }
}

/// Counts of actions in a report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn add(&mut self, action: Action) {
        match action {
            Action::Created => self.created += 1,
            Action::Updated => self.updated += 1,
            Action::Removed => self.removed += 1,
            Action::Skipped => self.skipped += 1,
            Action::Failed => self.failed += 1,
        }
    }

    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.removed
    }

    pub fn total(&self) -> usize {
        self.total_changes() + self.skipped + self.failed
    }
}

/// Result of an `install` or `remove` run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub operation: Operation,
    pub records: Vec<ExecutionRecord>,
    /// The error that aborted the run, if any
    pub fatal: Option<ConvergeError>,
    /// Non-fatal failures, in the order they happened
    pub advisories: Vec<ConvergeError>,
}

impl RunReport {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            records: Vec::new(),
            fatal: None,
            advisories: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.fatal.is_none()
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for record in &self.records {
            summary.add(record.action);
        }
        summary
    }

    /// Look up the record for `identity_key`
    pub fn record(&self, identity_key: &str) -> Option<&ExecutionRecord> {
        self.records.iter().find(|r| r.identity_key == identity_key)
    }

    pub fn action_of(&self, identity_key: &str) -> Option<Action> {
        self.record(identity_key).map(|r| r.action)
    }
}

/// One probed resource in a status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub kind: ResourceKind,
    pub identity_key: String,
    pub exists: bool,
    pub drifted: BTreeSet<String>,
    pub observed: Attributes,
    /// Inspection error, when the probe itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read-only report produced by `status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    pub fn present(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries.iter().filter(|e| e.exists)
    }

    pub fn entry(&self, identity_key: &str) -> Option<&StatusEntry> {
        self.entries.iter().find(|e| e.identity_key == identity_key)
    }
}

/// Output from an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
        }
    }
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
            success: true,
        }
    }

    /// Failed output with the given stderr
    pub fn failed(stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into(),
            success: false,
        }
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Whatever the command said, stderr first
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr_str();
        if stderr.trim().is_empty() {
            self.stdout_str().trim().to_string()
        } else {
            stderr.trim().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_order_follows_dependency_chain() {
        assert!(ResourceKind::Package < ResourceKind::UserGroup);
        assert!(ResourceKind::UserGroup < ResourceKind::Directory);
        assert!(ResourceKind::Directory < ResourceKind::DatabaseRole);
        assert!(ResourceKind::DatabaseRole < ResourceKind::Database);
        assert!(ResourceKind::Database < ResourceKind::Deployment);
        assert!(ResourceKind::Deployment < ResourceKind::ServiceUnit);
        assert!(ResourceKind::ServiceUnit < ResourceKind::ProxySite);
    }

    #[test]
    fn compare_records_drift_only_on_mismatch() {
        let probe = ProbeResult::present()
            .compare("owner", "app:www-data", "app:www-data")
            .compare("mode", "755", "750");
        assert_eq!(probe.drift_list(), "mode");
        assert_eq!(probe.observed["owner"], "app:www-data");
        assert!(!probe.is_converged());
    }

    #[test]
    fn unknown_state_is_absent() {
        let probe = ProbeResult::unknown();
        assert!(!probe.exists);
        assert!(probe.is_unknown());
    }

    #[test]
    fn summary_counts_actions() {
        let spec = ResourceSpec::new(ResourceKind::Package, "nginx");
        let mut report = RunReport::new(Operation::Install);
        report
            .records
            .push(ExecutionRecord::new(&spec, Action::Created, "installed"));
        report
            .records
            .push(ExecutionRecord::new(&spec, Action::Skipped, "present"));
        let summary = report.summary();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total_changes(), 1);
        assert_eq!(summary.total(), 2);
    }

    #[test]
    fn diagnostics_prefers_stderr() {
        let out = CommandOutput {
            stdout: b"some output".to_vec(),
            stderr: b"  boom \n".to_vec(),
            success: false,
        };
        assert_eq!(out.diagnostics(), "boom");
        assert_eq!(CommandOutput::ok("only out\n").diagnostics(), "only out");
    }
}
