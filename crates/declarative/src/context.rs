//! Run context and collaborator traits
//!
//! These traits keep the engine independent of how commands are spawned
//! and how progress is shown.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::types::{CommandOutput, ExecutionRecord, Operation, ResourceSpec, RunReport};

/// Executes external collaborators (package manager, service manager,
/// database client, proxy control, version control).
///
/// Implementations must never log `input`: it may carry secrets.
pub trait HostExecutor {
    /// Run a program and capture its output
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;

    /// Run a program, feeding `input` on stdin
    fn run_with_input(&self, program: &str, args: &[&str], input: &[u8])
    -> io::Result<CommandOutput>;

    /// Run a program inside `dir` with extra environment variables
    fn run_in(
        &self,
        dir: &Path,
        envs: &[(String, String)],
        program: &str,
        args: &[&str],
    ) -> io::Result<CommandOutput>;

    /// Run and return just success/failure
    fn run_status(&self, program: &str, args: &[&str]) -> io::Result<bool> {
        Ok(self.run(program, args)?.success)
    }

    /// Run and capture trimmed stdout, failing on a non-zero exit
    fn run_capture(&self, program: &str, args: &[&str]) -> io::Result<String> {
        let output = self.run(program, args)?;
        if !output.success {
            return Err(io::Error::other(format!(
                "{} failed: {}",
                program,
                output.diagnostics()
            )));
        }
        Ok(output.stdout_str().trim().to_string())
    }

    /// Block for a bounded interval (health-check window)
    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Progress callback for engine runs
pub trait ProgressCallback {
    /// Called once before the first resource
    fn on_plan_start(&mut self, operation: Operation, count: usize);

    /// Called when a resource is about to be probed
    fn on_resource_start(&mut self, spec: &ResourceSpec, description: &str);

    /// Called in dry-run mode with a human-readable preview of a change
    fn on_preview(&mut self, _spec: &ResourceSpec, _preview: &str) {}

    /// Called when a resource reaches a terminal state
    fn on_resource_complete(&mut self, record: &ExecutionRecord);

    /// Called once with the final report
    fn on_plan_complete(&mut self, report: &RunReport);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_plan_start(&mut self, _operation: Operation, _count: usize) {}
    fn on_resource_start(&mut self, _spec: &ResourceSpec, _description: &str) {}
    fn on_resource_complete(&mut self, _record: &ExecutionRecord) {}
    fn on_plan_complete(&mut self, _report: &RunReport) {}
}

/// Run-scoped state shared by every probe/apply call.
///
/// Replaces ad hoc global flags: one-time facts (index refreshed, service
/// needs restart, proxy needs reload) are recorded as marks.
pub struct RunContext<'a> {
    /// Collaborator used for every external command
    pub host: &'a dyn HostExecutor,
    /// Probe and report, never mutate
    pub dry_run: bool,
    marks: BTreeSet<String>,
}

impl<'a> RunContext<'a> {
    pub fn new(host: &'a dyn HostExecutor) -> Self {
        Self {
            host,
            dry_run: false,
            marks: BTreeSet::new(),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Record a one-time fact; returns `false` if it was already recorded
    pub fn mark(&mut self, mark: impl Into<String>) -> bool {
        self.marks.insert(mark.into())
    }

    pub fn is_marked(&self, mark: &str) -> bool {
        self.marks.contains(mark)
    }

    /// Remove a mark, returning whether it was set
    pub fn take_mark(&mut self, mark: &str) -> bool {
        self.marks.remove(mark)
    }
}
