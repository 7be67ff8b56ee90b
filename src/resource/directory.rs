//! Directories with owner and mode

use std::path::{Path, PathBuf};

use declarative::{ConvergeError, ProbeResult, Resource, ResourceKind, ResourceSpec, RunContext};

use super::{run_apply, run_probe};

#[derive(Debug)]
pub struct Directory {
    spec: ResourceSpec,
    path: PathBuf,
    owner: String,
    group: String,
    mode: String,
}

impl Directory {
    /// `mode` is octal without a leading zero, as `stat -c %a` prints it
    pub fn new(path: impl AsRef<Path>, owner: &str, group: &str, mode: &str) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            spec: ResourceSpec::new(ResourceKind::Directory, path.to_string_lossy())
                .with_attr("owner", format!("{}:{}", owner, group))
                .with_attr("mode", mode),
            path,
            owner: owner.to_string(),
            group: group.to_string(),
            mode: mode.to_string(),
        }
    }
}

impl Resource for Directory {
    fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    fn description(&self) -> String {
        format!("Directory {} ({}:{} {})", self.path.display(), self.owner, self.group, self.mode)
    }

    fn probe(&self, ctx: &RunContext) -> Result<ProbeResult, ConvergeError> {
        if !self.path.is_dir() {
            return Ok(ProbeResult::absent());
        }

        let path = self.path.to_string_lossy();
        let output = run_probe(ctx, &self.spec.identity_key, "stat", &["-c", "%U:%G:%a", &path])?;
        if !output.success {
            return Err(ConvergeError::probe(&self.spec.identity_key, output.diagnostics()));
        }

        let stdout = output.stdout_str();
        let (owner, mode) = stdout.trim().rsplit_once(':').unwrap_or((stdout.trim(), ""));
        let desired_owner = format!("{}:{}", self.owner, self.group);
        Ok(ProbeResult::present()
            .compare("owner", owner, &desired_owner)
            .compare("mode", mode, &self.mode))
    }

    /// `install -d` also fixes owner and mode of an existing directory
    fn apply(&self, ctx: &mut RunContext, _current: &ProbeResult) -> Result<(), ConvergeError> {
        let path = self.path.to_string_lossy();
        run_apply(
            ctx,
            &self.spec.identity_key,
            "install",
            &["-d", "-o", &self.owner, "-g", &self.group, "-m", &self.mode, &path],
        )?;
        Ok(())
    }

    fn preview(&self, current: &ProbeResult) -> Option<String> {
        if !current.exists {
            return Some(format!("mkdir {}", self.path.display()));
        }
        let changes: Vec<String> = current
            .drifted
            .iter()
            .map(|field| {
                format!(
                    "{}: {} -> {}",
                    field,
                    current.observed.get(field).map_or("?", String::as_str),
                    self.spec.attr(field).unwrap_or("?")
                )
            })
            .collect();
        Some(changes.join("\n"))
    }
}
