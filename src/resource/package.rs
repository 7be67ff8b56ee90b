//! Debian packages via dpkg-query / apt-get

use declarative::{ConvergeError, ProbeResult, Resource, ResourceKind, ResourceSpec, RunContext};

use super::{run_apply, run_probe};

#[derive(Debug)]
pub struct Package {
    spec: ResourceSpec,
}

impl Package {
    pub fn new(name: &str) -> Self {
        Self {
            spec: ResourceSpec::new(ResourceKind::Package, name).with_attr("state", "installed"),
        }
    }

    fn name(&self) -> &str {
        &self.spec.identity_key
    }
}

impl Resource for Package {
    fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    fn description(&self) -> String {
        format!("Install package {}", self.name())
    }

    /// Installed at any version counts as present
    fn probe(&self, ctx: &RunContext) -> Result<ProbeResult, ConvergeError> {
        let output = run_probe(
            ctx,
            self.name(),
            "dpkg-query",
            &["-W", "-f=${Status}|${Version}", self.name()],
        )?;
        if !output.success {
            return Ok(ProbeResult::absent().with_observed("state", "not-installed"));
        }

        let stdout = output.stdout_str();
        let (status, version) = stdout.trim().split_once('|').unwrap_or((stdout.trim(), ""));
        if status.ends_with("install ok installed") {
            Ok(ProbeResult::present()
                .with_observed("state", "installed")
                .with_observed("version", version))
        } else {
            Ok(ProbeResult::absent().with_observed("state", status))
        }
    }

    fn apply(&self, ctx: &mut RunContext, _current: &ProbeResult) -> Result<(), ConvergeError> {
        run_apply(
            ctx,
            self.name(),
            "env",
            &[
                "DEBIAN_FRONTEND=noninteractive",
                "apt-get",
                "install",
                "-y",
                "-q",
                self.name(),
            ],
        )?;
        Ok(())
    }

    fn preview(&self, _current: &ProbeResult) -> Option<String> {
        Some(format!("apt-get install {}", self.name()))
    }
}
